//! Test fixtures: temporary ComfyUI directories and an in-process fake
//! ComfyUI that writes output files when a prompt is submitted.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing;
use axum::{Json, Router};
use http_body_util::BodyExt;
use runcomfy_comfyui::api::ComfyUIApi;
use runcomfy_comfyui::job::JobClient;
use runcomfy_core::workflow_store::WorkflowStore;
use runcomfy_worker::orchestrator::Orchestrator;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

pub const PROMPT_ID: &str = "prompt-1";

/// Template used by most tests.
pub const TXT2IMG: &str = r#"{
  "last_node_id": 9,
  "nodes": [
    {"id": 3, "type": "KSampler", "widgets_values": [42, "randomize", 20, 7.0, "euler", "normal", 1.0]},
    {"id": 6, "type": "CLIPTextEncode", "widgets_values": ["a photo of a lighthouse"]},
    {"id": 10, "type": "LoadImage", "widgets_values": ["placeholder.png", "image"]},
    {"id": 9, "type": "SaveImage", "widgets_values": ["ComfyUI"]}
  ],
  "links": []
}"#;

/// How the fake finishes a submitted prompt.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Write `files` into the output directory, then report success.
    Succeed { files: Vec<(String, Vec<u8>)> },
    /// Report an execution error with `message`.
    Fail { message: String },
    /// Stay pending forever.
    Hang,
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub submitted: Vec<Value>,
    /// Input directory listing at submission time.
    pub inputs_at_submit: Vec<String>,
    pub cancelled: Vec<String>,
}

#[derive(Clone)]
struct FakeState {
    outcome: Outcome,
    input_dir: PathBuf,
    output_dir: PathBuf,
    recorded: Arc<Mutex<Recorded>>,
}

/// Handle to a running fake backend.
pub struct FakeComfyUI {
    pub url: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeComfyUI {
    pub async fn start(outcome: Outcome, dirs: &Dirs) -> Self {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let state = FakeState {
            outcome,
            input_dir: dirs.input(),
            output_dir: dirs.output(),
            recorded: Arc::clone(&recorded),
        };

        let app = Router::new()
            .route("/prompt", routing::post(submit))
            .route("/history/{prompt_id}", routing::get(history))
            .route("/queue", routing::post(queue))
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

    pub fn inputs_at_submit(&self) -> Vec<String> {
        self.recorded.lock().unwrap().inputs_at_submit.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.recorded.lock().unwrap().cancelled.clone()
    }
}

async fn submit(State(state): State<FakeState>, Json(body): Json<Value>) -> Json<Value> {
    let inputs = list_dir(&state.input_dir);

    if let Outcome::Succeed { files } = &state.outcome {
        std::fs::create_dir_all(&state.output_dir).unwrap();
        for (name, bytes) in files {
            std::fs::write(state.output_dir.join(name), bytes).unwrap();
        }
    }

    let mut recorded = state.recorded.lock().unwrap();
    recorded.submitted.push(body);
    recorded.inputs_at_submit = inputs;
    Json(json!({"prompt_id": PROMPT_ID, "number": 0, "node_errors": {}}))
}

async fn history(State(state): State<FakeState>, UrlPath(prompt_id): UrlPath<String>) -> Json<Value> {
    let entry = match &state.outcome {
        Outcome::Succeed { files } => json!({
            "status": {"status_str": "success", "completed": true, "messages": []},
            "outputs": {"9": {"images": files
                .iter()
                .map(|(name, _)| json!({"filename": name, "subfolder": "", "type": "output"}))
                .collect::<Vec<_>>()}}
        }),
        Outcome::Fail { message } => json!({
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [["execution_error", {"node_id": "3", "exception_message": message}]]
            },
            "outputs": {}
        }),
        Outcome::Hang => return Json(json!({})),
    };
    let mut body = serde_json::Map::new();
    body.insert(prompt_id, entry);
    Json(Value::Object(body))
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

/// Temporary `workflows/`, `input/` and `output/` directories.
pub struct Dirs {
    root: TempDir,
}

impl Dirs {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        for sub in ["workflows", "input", "output"] {
            std::fs::create_dir_all(root.path().join(sub)).unwrap();
        }
        std::fs::write(root.path().join("workflows/txt2img.json"), TXT2IMG).unwrap();
        Self { root }
    }

    pub fn workflows(&self) -> PathBuf {
        self.root.path().join("workflows")
    }

    pub fn input(&self) -> PathBuf {
        self.root.path().join("input")
    }

    pub fn output(&self) -> PathBuf {
        self.root.path().join("output")
    }

    /// Build an orchestrator over these directories with fast polling.
    pub fn orchestrator(&self, fake: &FakeComfyUI, timeout: Duration) -> Orchestrator {
        let jobs = JobClient::new(ComfyUIApi::new(fake.url.clone()))
            .with_poll_interval(Duration::from_millis(10))
            .with_timeout(timeout);
        Orchestrator::new(WorkflowStore::new(self.workflows()), jobs, self.input(), self.output())
    }
}

/// Sorted file names in `dir`; empty if missing.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// The widget values of node `id` in a submitted prompt.
pub fn widgets(prompt: &Value, id: u64) -> Value {
    prompt["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["id"] == id)
        .map(|n| n["widgets_values"].clone())
        .unwrap()
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
