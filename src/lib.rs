//! REGMARGIN — Frequency-regulation margin dashboard
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod calc;
pub mod session;
pub mod llm;
pub mod dashboard;
