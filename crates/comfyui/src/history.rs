//! Interpretation of ComfyUI `/history/{prompt_id}` records.
//!
//! The history endpoint answers with a map keyed by prompt id. The map is
//! empty while the prompt is queued or running. Completion is signalled
//! either by a status (`"completed"`/`"success"`, or ComfyUI's
//! `{"status_str": "success", "completed": true}` object) or simply by a
//! non-empty `outputs` record; either one counts as terminal.

use serde_json::Value;

/// Output keys under which ComfyUI lists produced files per node.
const OUTPUT_FILE_KEYS: &[&str] = &["images", "gifs", "videos", "audio"];

/// Where a prompt stands according to one history response.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryState {
    /// No entry yet, or an entry without a terminal signal.
    Pending,
    /// The prompt finished; `outputs` is the raw per-node outputs record.
    Completed { outputs: Value },
    /// The backend reported an explicit failure.
    Failed { message: String },
}

/// Classify a history response for `prompt_id`.
///
/// An explicit failure status wins over any partial outputs.
pub fn classify(history: &Value, prompt_id: &str) -> HistoryState {
    let Some(entry) = history.get(prompt_id) else {
        return HistoryState::Pending;
    };

    let status = entry.get("status");
    let outputs = entry.get("outputs").cloned().unwrap_or(Value::Null);

    if let Some(status) = status {
        if is_failure(status) {
            return HistoryState::Failed {
                message: failure_message(status),
            };
        }
        if is_success(status) {
            return HistoryState::Completed { outputs };
        }
    }

    if has_outputs(&outputs) {
        return HistoryState::Completed { outputs };
    }

    HistoryState::Pending
}

/// File names referenced by an outputs record, in node order.
pub fn produced_files(outputs: &Value) -> Vec<String> {
    let Some(nodes) = outputs.as_object() else {
        return Vec::new();
    };

    nodes
        .values()
        .flat_map(|node_output| {
            OUTPUT_FILE_KEYS
                .iter()
                .filter_map(move |key| node_output.get(*key).and_then(Value::as_array))
                .flatten()
        })
        .filter_map(|file| file.get("filename").and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

fn status_word(status: &Value) -> Option<String> {
    match status {
        Value::String(s) => Some(s.to_ascii_lowercase()),
        Value::Object(obj) => obj
            .get("status_str")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase),
        _ => None,
    }
}

fn is_success(status: &Value) -> bool {
    let flagged_complete = status
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    flagged_complete
        || matches!(status_word(status).as_deref(), Some("completed" | "success"))
}

fn is_failure(status: &Value) -> bool {
    matches!(status_word(status).as_deref(), Some("failed" | "error"))
}

fn has_outputs(outputs: &Value) -> bool {
    match outputs {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

/// Pull the `execution_error` message out of ComfyUI's status messages,
/// falling back to a generic description.
fn failure_message(status: &Value) -> String {
    let from_messages = status
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .find(|pair| pair.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|pair| pair.get(1))
        .and_then(|data| data.get("exception_message"))
        .and_then(Value::as_str);

    if let Some(message) = from_messages {
        return message.trim().to_string();
    }
    if let Some(message) = status.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    format!(
        "backend reported status '{}'",
        status_word(status).unwrap_or_default()
    )
}
