//! MedGemma commentary: box localization, twin comparison, case chat,
//! profile synthesis and phrase explanations.

pub mod boxes;
pub mod cleanup;
pub mod handlers;
pub mod prompts;
