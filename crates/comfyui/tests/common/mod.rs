//! In-process fake of the ComfyUI HTTP API for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Prompt id handed out by the fake.
pub const PROMPT_ID: &str = "prompt-1";

/// How the fake answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return an empty history for `polls - 1` polls, then `{PROMPT_ID: entry}`.
    CompleteAfter { polls: usize, entry: Value },
    /// Never produce a history entry.
    NeverFinish,
    /// Reject submissions with the given status code.
    RejectSubmit(u16),
    /// Accept submissions but omit `prompt_id`.
    MissingPromptId,
}

#[derive(Debug)]
pub struct Recorded {
    pub submitted: Vec<Value>,
    pub history_polls: usize,
    pub cancelled: Vec<String>,
}

#[derive(Clone)]
struct FakeState {
    behavior: Behavior,
    recorded: Arc<Mutex<Recorded>>,
}

/// Handle to a running fake backend.
pub struct FakeComfyUI {
    pub url: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeComfyUI {
    /// Bind on an ephemeral localhost port and serve in the background.
    pub async fn start(behavior: Behavior) -> Self {
        let recorded = Arc::new(Mutex::new(Recorded {
            submitted: Vec::new(),
            history_polls: 0,
            cancelled: Vec::new(),
        }));
        let state = FakeState {
            behavior,
            recorded: Arc::clone(&recorded),
        };

        let app = Router::new()
            .route("/prompt", post(submit))
            .route("/history/{prompt_id}", get(history))
            .route("/queue", post(queue))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            recorded,
        }
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.recorded.lock().unwrap().submitted.clone()
    }

    pub fn history_polls(&self) -> usize {
        self.recorded.lock().unwrap().history_polls
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.recorded.lock().unwrap().cancelled.clone()
    }
}

async fn submit(State(state): State<FakeState>, Json(body): Json<Value>) -> Response {
    state.recorded.lock().unwrap().submitted.push(body);
    match &state.behavior {
        Behavior::RejectSubmit(code) => (
            StatusCode::from_u16(*code).unwrap(),
            "invalid prompt",
        )
            .into_response(),
        Behavior::MissingPromptId => Json(json!({"number": 0})).into_response(),
        _ => Json(json!({"prompt_id": PROMPT_ID, "number": 0, "node_errors": {}})).into_response(),
    }
}

async fn history(State(state): State<FakeState>, Path(prompt_id): Path<String>) -> Json<Value> {
    let polls = {
        let mut recorded = state.recorded.lock().unwrap();
        recorded.history_polls += 1;
        recorded.history_polls
    };
    match &state.behavior {
        Behavior::CompleteAfter { polls: after, entry } if polls >= *after => {
            let mut body = serde_json::Map::new();
            body.insert(prompt_id, entry.clone());
            Json(Value::Object(body))
        }
        _ => Json(json!({})),
    }
}

async fn queue(State(state): State<FakeState>, Json(body): Json<Value>) -> StatusCode {
    let ids = body
        .get("delete")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned);
    state.recorded.lock().unwrap().cancelled.extend(ids);
    StatusCode::OK
}

/// A backend that accepts connections and never writes a byte back.
pub struct SilentBackend {
    pub url: String,
}

impl SilentBackend {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Held open so clients see a live connection with no response.
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        Self {
            url: format!("http://{addr}"),
        }
    }
}
