use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::orchestrator::Orchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Runs workflow requests.
    pub orchestrator: Arc<Orchestrator>,
    /// Cancelled on shutdown; every in-flight run holds a child token.
    pub shutdown: CancellationToken,
}
