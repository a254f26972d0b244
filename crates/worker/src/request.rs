//! Wire types for one run.

use runcomfy_core::media::{MediaItem, OutputRecord};
use runcomfy_core::overrides::OverrideMap;
use serde::{Deserialize, Serialize};

/// A request to run one workflow template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Template file name; the configured default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<OverrideMap>,
    /// Images written to the input directory before submission.
    #[serde(default)]
    pub images: Vec<MediaItem>,
    /// Audio clips written to the input directory before submission.
    #[serde(default)]
    pub audio: Vec<MediaItem>,
}

/// Media produced by a successful run, sorted by file name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub outputs: Vec<OutputRecord>,
}

/// Job envelope accepted by `POST /run`: `{"id"?: string, "input": RunRequest}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    pub input: RunRequest,
}
