// Shared prompt fragments. Each feature module keeps its own prompts.rs
// alongside it; only cross-cutting instructions live here.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps MedGemma from appending exam-style answer blocks.
pub const NO_FINAL_ANSWER: &str = "IMPORTANT: Do NOT append a 'Final Answer:' section or use \
    mathematical LaTeX boxes (\\boxed{}). Just provide the direct text response.";

/// Stop sequences shared by the commentary endpoints.
pub const FINAL_ANSWER_STOPS: [&str; 2] = ["Final Answer:", "Final Answer"];
