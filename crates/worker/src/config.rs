use std::path::{Path, PathBuf};
use std::time::Duration;

use runcomfy_core::overrides::FieldPositionTable;

/// Default ComfyUI installation root; the directory defaults hang off it.
const DEFAULT_COMFYUI_HOME: &str = "/workspace/ComfyUI";

/// Template used when a request does not name one.
const DEFAULT_WORKFLOW: &str = "fluxmania_txt2img_upscale.json";

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a ComfyUI container; override
/// them via environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Base HTTP URL of the ComfyUI instance.
    pub comfyui_url: String,
    /// Directory holding workflow templates.
    pub workflow_dir: PathBuf,
    /// Directory input media are written to before submission.
    pub input_dir: PathBuf,
    /// Directory ComfyUI writes produced media to.
    pub output_dir: PathBuf,
    /// Template used when a request omits `workflow`.
    pub default_workflow: Option<String>,
    /// Delay between history polls.
    pub poll_interval: Duration,
    /// Upper bound on one job's runtime.
    pub job_timeout: Duration,
    /// Optional JSON file extending the field position table.
    pub field_positions_path: Option<PathBuf>,
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Failed to read field position table {path}: {source}")]
    FieldTableRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid field position table {path}: {source}")]
    FieldTableParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                             |
    /// |------------------------|-------------------------------------|
    /// | `HOST`                 | `0.0.0.0`                           |
    /// | `PORT`                 | `8000`                              |
    /// | `COMFYUI_URL`          | `http://127.0.0.1:8188`             |
    /// | `COMFYUI_HOME`         | `/workspace/ComfyUI`                |
    /// | `WORKFLOW_DIR`         | `$COMFYUI_HOME/workflows`           |
    /// | `INPUT_DIR`            | `$COMFYUI_HOME/input`               |
    /// | `OUTPUT_DIR`           | `$COMFYUI_HOME/output`              |
    /// | `DEFAULT_WORKFLOW`     | `fluxmania_txt2img_upscale.json`    |
    /// | `POLL_INTERVAL_MS`     | `1000`                              |
    /// | `JOB_TIMEOUT_SECS`     | `600`                               |
    /// | `FIELD_POSITIONS_PATH` | unset                               |
    ///
    /// Setting `DEFAULT_WORKFLOW` to an empty string disables the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_var(&lookup, "PORT", "8000", "a valid u16")?;

        let comfyui_url =
            lookup("COMFYUI_URL").unwrap_or_else(|| "http://127.0.0.1:8188".into());

        let home = lookup("COMFYUI_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COMFYUI_HOME));
        let dir = |name: &str, sub: &str| {
            lookup(name)
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(sub))
        };
        let workflow_dir = dir("WORKFLOW_DIR", "workflows");
        let input_dir = dir("INPUT_DIR", "input");
        let output_dir = dir("OUTPUT_DIR", "output");

        let default_workflow = match lookup("DEFAULT_WORKFLOW") {
            Some(name) if name.trim().is_empty() => None,
            Some(name) => Some(name),
            None => Some(DEFAULT_WORKFLOW.into()),
        };

        let poll_interval_ms: u64 =
            parse_var(&lookup, "POLL_INTERVAL_MS", "1000", "a positive integer")?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "POLL_INTERVAL_MS",
                expected: "a positive integer",
                value: "0".into(),
            });
        }
        let job_timeout_secs: u64 =
            parse_var(&lookup, "JOB_TIMEOUT_SECS", "600", "a positive integer")?;
        if job_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "JOB_TIMEOUT_SECS",
                expected: "a positive integer",
                value: "0".into(),
            });
        }

        let field_positions_path = lookup("FIELD_POSITIONS_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            host,
            port,
            comfyui_url,
            workflow_dir,
            input_dir,
            output_dir,
            default_workflow,
            poll_interval: Duration::from_millis(poll_interval_ms),
            job_timeout: Duration::from_secs(job_timeout_secs),
            field_positions_path,
        })
    }

    /// Build the field position table: built-in defaults, extended by
    /// `FIELD_POSITIONS_PATH` when set.
    pub fn field_position_table(&self) -> Result<FieldPositionTable, ConfigError> {
        let mut table = FieldPositionTable::default();
        if let Some(path) = &self.field_positions_path {
            load_field_table(&mut table, path)?;
        }
        Ok(table)
    }
}

fn load_field_table(table: &mut FieldPositionTable, path: &Path) -> Result<(), ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FieldTableRead {
        path: path.to_path_buf(),
        source,
    })?;
    let merged = table
        .merge_json(&raw)
        .map_err(|source| ConfigError::FieldTableParse {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::info!(path = %path.display(), merged, "Loaded field position overrides");
    Ok(())
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = lookup(name).unwrap_or_else(|| default.into());
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use runcomfy_core::overrides::FieldPosition;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.comfyui_url, "http://127.0.0.1:8188");
        assert_eq!(config.workflow_dir, PathBuf::from("/workspace/ComfyUI/workflows"));
        assert_eq!(config.input_dir, PathBuf::from("/workspace/ComfyUI/input"));
        assert_eq!(config.output_dir, PathBuf::from("/workspace/ComfyUI/output"));
        assert_eq!(config.default_workflow.as_deref(), Some(DEFAULT_WORKFLOW));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert!(config.field_positions_path.is_none());
    }

    #[test]
    fn home_and_explicit_dirs() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("COMFYUI_HOME", "/srv/comfy"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("DEFAULT_WORKFLOW", ""),
            ("POLL_INTERVAL_MS", "250"),
            ("JOB_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.workflow_dir, PathBuf::from("/srv/comfy/workflows"));
        assert_eq!(config.input_dir, PathBuf::from("/srv/comfy/input"));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert!(config.default_workflow.is_none());
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.job_timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert_matches!(
            WorkerConfig::from_lookup(lookup(&[("PORT", "eighty")])),
            Err(ConfigError::Invalid { name: "PORT", .. })
        );
        assert_matches!(
            WorkerConfig::from_lookup(lookup(&[("POLL_INTERVAL_MS", "0")])),
            Err(ConfigError::Invalid { name: "POLL_INTERVAL_MS", .. })
        );
        assert_matches!(
            WorkerConfig::from_lookup(lookup(&[("JOB_TIMEOUT_SECS", "0")])),
            Err(ConfigError::Invalid { name: "JOB_TIMEOUT_SECS", .. })
        );
        assert_matches!(
            WorkerConfig::from_lookup(lookup(&[("JOB_TIMEOUT_SECS", "-5")])),
            Err(ConfigError::Invalid { name: "JOB_TIMEOUT_SECS", .. })
        );
    }

    #[test]
    fn field_table_file_extends_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.json");
        std::fs::write(&path, r#"{"cfg": 3, "strength": "last"}"#).unwrap();

        let config = WorkerConfig::from_lookup(lookup(&[(
            "FIELD_POSITIONS_PATH",
            path.to_str().unwrap(),
        )]))
        .unwrap();
        let table = config.field_position_table().unwrap();

        assert_eq!(table.get("cfg"), Some(FieldPosition::Index(3)));
        assert_eq!(table.get("strength"), Some(FieldPosition::Last));
        assert_eq!(table.get("steps"), Some(FieldPosition::Index(2)));
    }

    #[test]
    fn missing_field_table_file_is_an_error() {
        let config = WorkerConfig::from_lookup(lookup(&[(
            "FIELD_POSITIONS_PATH",
            "/nonexistent/fields.json",
        )]))
        .unwrap();
        assert_matches!(
            config.field_position_table(),
            Err(ConfigError::FieldTableRead { .. })
        );
    }
}
