//! `runcomfy-worker` library crate.
//!
//! Composes the workflow store, override engine, media codec and ComfyUI
//! job client into a single request/response transaction, and exposes it
//! over HTTP. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod routes;
pub mod state;
