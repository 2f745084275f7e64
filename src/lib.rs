//! gigwatch - job-board capture under hostile conditions.
//!
//! Core library: a single authenticated browser session traverses a job
//! board, captures new postings through redundant strategies, and persists
//! them to a TTL store. The binary in `main.rs` wires the CLI on top.

pub mod browser;
pub mod cli;
pub mod config;
pub mod models;
pub mod retry;
pub mod scheduler;
pub mod scrape;
pub mod server;
pub mod store;
