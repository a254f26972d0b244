//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, history record interpretation and the
//! job lifecycle client that submits a workflow, polls until it reaches a
//! terminal state and hands back its outputs.

pub mod api;
pub mod history;
pub mod job;
