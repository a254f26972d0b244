//! Workflow template directory.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::graph::Graph;
use crate::media::is_plain_file_name;

/// Read-only access to the workflow templates in one directory.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: PathBuf,
}

impl WorkflowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load and parse the template `name`.
    ///
    /// Names that are not a single file name (`../x.json`, `a/b.json`) are
    /// reported as [`CoreError::WorkflowNotFound`] so lookups never leave
    /// the template directory.
    pub async fn load(&self, name: &str) -> Result<Graph, CoreError> {
        if !is_plain_file_name(name) {
            return Err(CoreError::WorkflowNotFound(name.to_owned()));
        }

        let path = self.dir.join(name);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::WorkflowNotFound(format!(
                    "{name} not found in {}",
                    self.dir.display()
                )));
            }
            Err(e) => return Err(CoreError::io(path, e)),
        };

        Graph::parse(&raw)
    }

    /// Names of all `*.json` templates, sorted. A missing directory lists
    /// as empty.
    pub async fn list(&self) -> Result<Vec<String>, CoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::io(&self.dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.to_ascii_lowercase().ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
