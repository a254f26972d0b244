//! Orchestration facade: one request in, encoded outputs out.
//!
//! A run loads the template, applies overrides, stages input media,
//! drives the job to completion and finally collects every produced file
//! from the shared output directory before clearing it. Nothing is
//! collected or cleared unless the job completed.

use std::path::PathBuf;

use runcomfy_comfyui::api::ComfyUIApi;
use runcomfy_comfyui::job::JobClient;
use runcomfy_core::media::{self, MediaItem, OUTPUT_EXTENSIONS};
use runcomfy_core::overrides::{apply_overrides, FieldPositionTable};
use runcomfy_core::workflow_store::WorkflowStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, WorkerConfig};
use crate::error::{RunError, RunResult};
use crate::request::{RunRequest, RunResponse};

/// Runs workflow requests against one ComfyUI instance.
#[derive(Debug)]
pub struct Orchestrator {
    store: WorkflowStore,
    field_table: FieldPositionTable,
    jobs: JobClient,
    input_dir: PathBuf,
    output_dir: PathBuf,
    default_workflow: Option<String>,
    /// Serializes the encode+reset phase across concurrent runs.
    output_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: WorkflowStore,
        jobs: JobClient,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            field_table: FieldPositionTable::default(),
            jobs,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            default_workflow: None,
            output_lock: Mutex::new(()),
        }
    }

    /// Build from worker configuration, loading the field position table.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, ConfigError> {
        let jobs = JobClient::new(ComfyUIApi::new(config.comfyui_url.clone()))
            .with_poll_interval(config.poll_interval)
            .with_timeout(config.job_timeout);

        Ok(Self::new(
            WorkflowStore::new(&config.workflow_dir),
            jobs,
            &config.input_dir,
            &config.output_dir,
        )
        .with_field_table(config.field_position_table()?)
        .with_default_workflow(config.default_workflow.clone()))
    }

    pub fn with_field_table(mut self, field_table: FieldPositionTable) -> Self {
        self.field_table = field_table;
        self
    }

    pub fn with_default_workflow(mut self, name: Option<String>) -> Self {
        self.default_workflow = name;
        self
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Execute one request.
    ///
    /// Errors from every stage propagate unchanged. On failure, timeout or
    /// cancellation the output directory is left as it is.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> RunResult<RunResponse> {
        let name = request
            .workflow
            .as_deref()
            .or(self.default_workflow.as_deref())
            .ok_or_else(|| {
                RunError::BadRequest("request names no workflow and no default is set".into())
            })?;

        let mut graph = self.store.load(name).await?;
        tracing::debug!(workflow = name, nodes = graph.node_count(), "Workflow loaded");

        if let Some(overrides) = &request.overrides {
            let written = apply_overrides(&mut graph, overrides, &self.field_table)?;
            tracing::debug!(workflow = name, written, "Overrides applied");
        }

        let media: Vec<MediaItem> = request
            .images
            .into_iter()
            .chain(request.audio)
            .collect();
        let staged = media::decode_batch(&media, &self.input_dir).await?;
        if !staged.is_empty() {
            tracing::debug!(count = staged.len(), "Input media staged");
        }

        let job = self.jobs.run(&graph, cancel).await?;

        let outputs = {
            let _guard = self.output_lock.lock().await;
            let records = media::encode_directory(&self.output_dir, OUTPUT_EXTENSIONS).await?;
            media::reset_directory(&self.output_dir).await?;
            records
        };

        tracing::info!(
            workflow = name,
            prompt_id = %job.prompt_id,
            outputs = outputs.len(),
            "Run finished",
        );

        Ok(RunResponse { outputs })
    }
}
