//! # Sightline Application Library
//!
//! HTTP API and CLI layers over `sightline-core`. The binary in `main.rs`
//! is a thin wrapper; integration tests drive these modules directly.

pub mod api;
pub mod cli;
