//! Physician-finding agents for a candidate hospital.

pub mod agent;
pub mod handlers;
pub mod prompts;
pub mod tools;
