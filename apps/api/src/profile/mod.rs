//! CaseProfile extraction from notes, notes files and images.

pub mod extract;
pub mod handlers;
pub mod notes;
