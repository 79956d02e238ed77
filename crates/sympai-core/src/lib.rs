//! Core types, config, and errors for SympAI.

pub mod config;
pub mod error;
pub mod types;
