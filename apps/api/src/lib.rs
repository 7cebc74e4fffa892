//! CaseTwin: chest X-ray case-twin retrieval, MedGemma commentary and care
//! network discovery, plus the offline dataset pipeline.

pub mod cache;
pub mod config;
pub mod diagnosis;
pub mod errors;
pub mod hospitals;
pub mod imaging;
pub mod insights;
pub mod llm_client;
pub mod models;
pub mod pipeline;
pub mod profile;
pub mod routes;
pub mod search;
pub mod specialists;
pub mod state;
pub mod text;
pub mod web;
