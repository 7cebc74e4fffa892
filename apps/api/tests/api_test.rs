use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use casetwin_api::config::Config;
use casetwin_api::llm_client::{
    ChatRequest, ImageEmbedder, InlineImage, LlmError, VisionLanguageModel,
};
use casetwin_api::routes::build_router;
use casetwin_api::search::{CaseIndex, IndexPoint, ScoredPoint, StoredPoint, VectorStoreError};
use casetwin_api::state::{AppState, WebServices};

const BOUNDARY: &str = "casetwin-test-boundary";

struct FixedReply(Result<String, ()>);

#[async_trait]
impl VisionLanguageModel for FixedReply {
    async fn generate(&self, _request: &ChatRequest) -> Result<String, LlmError> {
        self.0
            .clone()
            .map_err(|_| LlmError::Api {
                status: 503,
                message: "model unavailable".to_string(),
            })
    }
}

struct FixedEmbedder;

#[async_trait]
impl ImageEmbedder for FixedEmbedder {
    async fn embed_image(&self, _image: &InlineImage) -> Result<Vec<f32>, LlmError> {
        Ok(vec![0.5; 4])
    }
}

struct PresetIndex(Vec<ScoredPoint>);

#[async_trait]
impl CaseIndex for PresetIndex {
    async fn search(&self, _vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }

    async fn scroll(&self, _limit: usize) -> Result<Vec<StoredPoint>, VectorStoreError> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _points: &[IndexPoint]) -> Result<(), VectorStoreError> {
        Ok(())
    }
}

fn scored(id: &str, score: f32, diagnosis: &str) -> ScoredPoint {
    ScoredPoint {
        id: json!(id),
        score,
        payload: json!({
            "case_id": id,
            "assessment": { "diagnosis_primary": diagnosis }
        }),
    }
}

fn test_state(reply: Result<String, ()>, points: Vec<ScoredPoint>) -> AppState {
    let config = Config::default();
    let web = WebServices::from_config(&config, None).expect("web services");
    AppState {
        config,
        vlm: Arc::new(FixedReply(reply)),
        embedder: Arc::new(FixedEmbedder),
        index: Arc::new(PresetIndex(points)),
        agent_llm: None,
        web,
    }
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: Vec<u8>,
    },
}

fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post_form(uri: &str, parts: &[Part]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn sample_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::new_rgb8(8, 8)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    bytes
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(test_state(Ok(String::new()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "casetwin-api");
}

#[tokio::test]
async fn test_search_requires_file() {
    let request = post_form("/search", &[Part::Text("profile", "{}")]);
    let (status, body) = send(test_state(Ok(String::new()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["message"], "Missing required file 'file'");
}

#[tokio::test]
async fn test_search_rejects_non_image() {
    let request = post_form(
        "/search",
        &[Part::File {
            name: "file",
            file_name: "notes.txt",
            content_type: "text/plain",
            bytes: b"not an image".to_vec(),
        }],
    );
    let (status, body) = send(test_state(Ok(String::new()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"]["message"],
        "Only image files are accepted (jpg, png, webp)."
    );
}

#[tokio::test]
async fn test_search_without_profile_keeps_vector_order() {
    let points = vec![
        scored("PMC1_01", 0.80, "tuberculosis"),
        scored("PMC2_01", 0.76, "pneumonia"),
    ];
    let request = post_form(
        "/search?limit=2",
        &[Part::File {
            name: "file",
            file_name: "query.png",
            content_type: "image/png",
            bytes: sample_png(),
        }],
    );
    let (status, body) = send(test_state(Ok(String::new()), points), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["matches"][0]["id"], "PMC1_01");
    assert_eq!(body["matches"][1]["id"], "PMC2_01");
}

#[tokio::test]
async fn test_search_reranks_against_profile() {
    let points = vec![
        scored("PMC1_01", 0.80, "tuberculosis"),
        scored("PMC2_01", 0.76, "pneumonia"),
        scored("PMC3_01", 0.70, "sarcoidosis"),
    ];
    let profile = json!({ "assessment": { "diagnosis_primary": "Pneumonia" } }).to_string();
    let request = post_form(
        "/search?limit=1",
        &[
            Part::File {
                name: "file",
                file_name: "query.png",
                content_type: "image/png",
                bytes: sample_png(),
            },
            Part::Text("profile", &profile),
        ],
    );
    let (status, body) = send(test_state(Ok(String::new()), points), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let top = &body["matches"][0];
    assert_eq!(top["id"], "PMC2_01");
    assert!((top["vector_score"].as_f64().unwrap() - 0.76).abs() < 1e-4);
    assert!(top["score"].as_f64().unwrap() > 0.80);
}

#[tokio::test]
async fn test_extract_from_notes_only() {
    let notes = "67-year-old male with hypertension presenting with fever and cough for 3 days.";
    let request = post_form("/extract", &[Part::Text("notes", notes)]);
    let (status, body) = send(test_state(Err(()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::OK);
    let profile = &body["profile"];
    assert_eq!(profile["patient"]["age_years"], 67);
    assert_eq!(profile["patient"]["sex"], "male");
    assert!(!profile["case_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_twin_reports_model_failure_in_reply() {
    let request = post_form(
        "/chat_twin",
        &[
            Part::Text("query", "Was this treated with antibiotics?"),
            Part::Text("case_text", "A 54-year-old woman with lobar pneumonia."),
        ],
    );
    let (status, body) = send(test_state(Err(()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["reply"],
        "I'm sorry, I couldn't reach the AI reasoning engine to answer this question right now."
    );
}

#[tokio::test]
async fn test_chat_twin_requires_case_text() {
    let request = post_form("/chat_twin", &[Part::Text("query", "Why?")]);
    let (status, body) = send(test_state(Ok(String::new()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Missing required field 'case_text'");
}

#[tokio::test]
async fn test_explain_selection_keeps_two_sentences() {
    let reply = "An air-filled space within the lung. It is usually benign. Large ones can compress tissue.";
    let request = post_form(
        "/explain_selection",
        &[
            Part::Text("selected_text", "bulla"),
            Part::Text("context", "CT showed a large apical bulla."),
        ],
    );
    let (status, body) = send(test_state(Ok(reply.to_string()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["explanation"],
        "An air-filled space within the lung. It is usually benign."
    );
}

#[tokio::test]
async fn test_search_hospitals_without_search_key() {
    let request = post_form("/search_hospitals", &[Part::Text("diagnosis", "pneumothorax")]);
    let (status, body) = send(test_state(Ok(String::new()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_analyze_hospital_page_without_agent_model() {
    let request = post_form(
        "/analyze_hospital_page",
        &[
            Part::Text("url", "https://hospital.example.org/pulmonology"),
            Part::Text("diagnosis", "pneumothorax"),
        ],
    );
    let (status, body) = send(test_state(Ok(String::new()), Vec::new()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["specialists"], json!([]));
    assert_eq!(body["error"], "GEMINI_API_KEY environment variable is missing.");
}
