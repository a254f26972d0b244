//! Domain core for the runcomfy worker.
//!
//! Holds the ComfyUI workflow graph model, the override engine that
//! rewrites positional widget values, the media codec used to move
//! binary payloads across the JSON boundary, and the workflow template
//! store.

pub mod error;
pub mod graph;
pub mod media;
pub mod overrides;
pub mod workflow_store;
