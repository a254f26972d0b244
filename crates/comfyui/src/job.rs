//! Job lifecycle client.
//!
//! [`JobClient`] drives one workflow through
//! `Submitted -> Polling -> {Completed, Failed, TimedOut, Cancelled}`:
//! it queues the graph via `POST /prompt`, polls `GET /history/{id}`
//! until the record is terminal, and returns the outputs record. Polling
//! suspends the calling task between requests and observes a
//! [`CancellationToken`], so a cancelled or timed-out job stops within
//! one poll interval. Abandoned jobs are removed from the backend queue
//! on a best-effort basis.

use std::time::Duration;

use runcomfy_core::graph::Graph;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::history::{classify, produced_files, HistoryState};

/// Default delay between two history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on how long a job may take.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound on the best-effort cancellation request.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle phases, used for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// Outputs of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutputs {
    pub prompt_id: String,
    /// Raw per-node outputs record from the history entry.
    pub outputs: Value,
    /// File names referenced by `outputs`.
    pub files: Vec<String>,
}

/// Errors from the job lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The backend refused the workflow or answered without a prompt id.
    #[error("Workflow submission failed: {0}")]
    Submission(String),

    /// The backend reported an explicit failure.
    #[error("Job {prompt_id} failed: {message}")]
    Failed { prompt_id: String, message: String },

    /// The job did not finish within the configured timeout. `prompt_id`
    /// is `None` when ComfyUI had not acknowledged the submission yet.
    #[error("Job {} did not finish within {}s", job_label(.prompt_id), .timeout.as_secs())]
    Timeout {
        prompt_id: Option<String>,
        timeout: Duration,
    },

    /// The caller stopped the job.
    #[error("Job {} was cancelled", job_label(.prompt_id))]
    Cancelled { prompt_id: Option<String> },
}

fn job_label(prompt_id: &Option<String>) -> &str {
    prompt_id.as_deref().unwrap_or("(not yet queued)")
}

/// Drives jobs against one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct JobClient {
    api: ComfyUIApi,
    /// Client id sent with every submission.
    client_id: String,
    poll_interval: Duration,
    timeout: Duration,
}

enum WaitOutcome {
    Finished(Result<Value, JobError>),
    TimedOut,
    Cancelled,
}

impl JobClient {
    /// Create a client with the default poll interval and timeout.
    pub fn new(api: ComfyUIApi) -> Self {
        Self {
            api,
            client_id: uuid::Uuid::new_v4().to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue `graph` on the backend and return its prompt id.
    pub async fn submit(&self, graph: &Graph) -> Result<String, JobError> {
        let response = self
            .api
            .submit_workflow(graph.as_value(), &self.client_id)
            .await
            .map_err(|e| JobError::Submission(e.to_string()))?;

        if response.prompt_id.is_empty() {
            return Err(JobError::Submission(
                "backend returned an empty prompt_id".into(),
            ));
        }

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = ?response.number,
            phase = ?JobPhase::Submitted,
            "Workflow submitted to ComfyUI",
        );

        Ok(response.prompt_id)
    }

    /// Poll until `prompt_id` is terminal, the timeout elapses, or `cancel`
    /// fires. Returns the raw outputs record on completion.
    ///
    /// Transport errors on individual polls are logged and retried; only
    /// the timeout bounds them.
    pub async fn await_completion(
        &self,
        prompt_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, JobError> {
        let deadline = Instant::now() + self.timeout;
        self.await_until(prompt_id, deadline, cancel).await
    }

    /// Package a completed job's outputs record.
    pub fn collect_outputs(&self, prompt_id: &str, outputs: Value) -> JobOutputs {
        let files = produced_files(&outputs);
        tracing::debug!(prompt_id, file_count = files.len(), "Collected job outputs");
        JobOutputs {
            prompt_id: prompt_id.to_owned(),
            outputs,
            files,
        }
    }

    /// Submit, wait and collect in one call.
    ///
    /// The timeout covers the whole job, submission included, and `cancel`
    /// is observed while the submission is in flight.
    pub async fn run(
        &self,
        graph: &Graph,
        cancel: &CancellationToken,
    ) -> Result<JobOutputs, JobError> {
        let deadline = Instant::now() + self.timeout;

        let prompt_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(phase = ?JobPhase::Cancelled, "Job cancelled before submission");
                return Err(JobError::Cancelled { prompt_id: None });
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    phase = ?JobPhase::TimedOut,
                    "ComfyUI did not acknowledge the submission in time",
                );
                return Err(JobError::Timeout { prompt_id: None, timeout: self.timeout });
            }
            result = self.submit(graph) => result?,
        };

        let outputs = self.await_until(&prompt_id, deadline, cancel).await?;
        Ok(self.collect_outputs(&prompt_id, outputs))
    }

    // ---- private helpers ----

    async fn await_until(
        &self,
        prompt_id: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Value, JobError> {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => WaitOutcome::TimedOut,
            result = self.poll_until_terminal(prompt_id) => WaitOutcome::Finished(result),
        };

        match outcome {
            WaitOutcome::Finished(result) => result,
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    prompt_id,
                    timeout_secs = self.timeout.as_secs(),
                    phase = ?JobPhase::TimedOut,
                    "Job timed out",
                );
                self.release(prompt_id).await;
                Err(JobError::Timeout {
                    prompt_id: Some(prompt_id.to_owned()),
                    timeout: self.timeout,
                })
            }
            WaitOutcome::Cancelled => {
                tracing::info!(prompt_id, phase = ?JobPhase::Cancelled, "Job cancelled");
                self.release(prompt_id).await;
                Err(JobError::Cancelled {
                    prompt_id: Some(prompt_id.to_owned()),
                })
            }
        }
    }

    async fn poll_until_terminal(&self, prompt_id: &str) -> Result<Value, JobError> {
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            match self.api.get_history(prompt_id).await {
                Ok(history) => match classify(&history, prompt_id) {
                    HistoryState::Completed { outputs } => {
                        tracing::info!(
                            prompt_id,
                            polls,
                            phase = ?JobPhase::Completed,
                            "Job completed",
                        );
                        return Ok(outputs);
                    }
                    HistoryState::Failed { message } => {
                        tracing::error!(
                            prompt_id,
                            polls,
                            error = %message,
                            phase = ?JobPhase::Failed,
                            "Job failed",
                        );
                        return Err(JobError::Failed {
                            prompt_id: prompt_id.to_owned(),
                            message,
                        });
                    }
                    HistoryState::Pending => {
                        tracing::trace!(prompt_id, polls, phase = ?JobPhase::Polling, "Job pending");
                    }
                },
                Err(e) => {
                    tracing::warn!(prompt_id, polls, error = %e, "History poll failed, retrying");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Ask the backend to drop an abandoned prompt. Failures are logged
    /// and otherwise ignored.
    async fn release(&self, prompt_id: &str) {
        match tokio::time::timeout(RELEASE_TIMEOUT, self.api.cancel_execution(prompt_id)).await {
            Ok(Ok(())) => tracing::info!(prompt_id, "Abandoned job removed from ComfyUI queue"),
            Ok(Err(e)) => {
                tracing::warn!(prompt_id, error = %e, "Failed to cancel abandoned job")
            }
            Err(_) => tracing::warn!(prompt_id, "Timed out cancelling abandoned job"),
        }
    }
}
