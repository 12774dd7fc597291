//! ScriptRelay - LLM-backed script generation and a single-slot command relay
//!
//! This crate provides:
//! - A backend adapter that normalizes native, structured-JSON and
//!   chat-completions LLM APIs into one `generate` call
//! - An at-most-once command relay with an in-memory or file-backed slot
//! - The HTTP server exposing `/generate` and `/queue`

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod generate;
pub mod paths;
pub mod relay;
pub mod server;

pub use config::Config;
