//! Facility search backed by web search, geocoding and routing.

pub mod finder;
pub mod handlers;
pub mod naming;
