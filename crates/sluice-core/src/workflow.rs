//! Workflow files: a pipeline's task list stored as YAML, TOML or JSON.
//!
//! ```yaml
//! tasks:
//!   - type: read-json
//!     default: planet.jsonl
//!     pipes: { outPipe: raw }
//!   - type: sort
//!     pipes: { inPipe: raw }
//!   - type: write-json
//!     args: { file: sorted.jsonl }
//! ```

use crate::spec::TaskSpec;
use serde::{Deserialize, Serialize};

/// A serializable pipeline definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Tasks in declaration order. Producers must precede their consumers.
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task, assigning its positional id if it has none.
    pub fn task(mut self, mut spec: TaskSpec) -> Self {
        spec.ensure_id(self.tasks.len() + 1);
        self.tasks.push(spec);
        self
    }

    /// Parse workflow from bytes, detecting the format from `path`.
    ///
    /// Defaults to YAML when there is no recognizable extension.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, WorkflowError> {
        let format = path.and_then(detect_format).unwrap_or("yaml");
        Self::from_bytes_format(data, format)
    }

    /// Parse workflow from bytes with explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, WorkflowError> {
        let mut workflow: Workflow = match format {
            "json" => serde_json::from_slice(data).map_err(|e| WorkflowError::Parse(e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| WorkflowError::Parse(e.to_string()))?
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| WorkflowError::Parse(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| WorkflowError::Parse(e.to_string()))?
            }
            _ => return Err(WorkflowError::UnsupportedFormat(format.to_string())),
        };

        for (index, spec) in workflow.tasks.iter_mut().enumerate() {
            if spec.task_type.is_empty() {
                return Err(WorkflowError::Incomplete(format!(
                    "task {} has no type",
                    index + 1
                )));
            }
            spec.ensure_id(index + 1);
        }
        Ok(workflow)
    }

    /// Serialize workflow to bytes.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, WorkflowError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| WorkflowError::Serialize(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(String::into_bytes)
                .map_err(|e| WorkflowError::Serialize(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(String::into_bytes)
                .map_err(|e| WorkflowError::Serialize(e.to_string())),
            _ => Err(WorkflowError::UnsupportedFormat(format.to_string())),
        }
    }
}

/// Errors related to workflow files.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("failed to parse workflow: {0}")]
    Parse(String),

    #[error("failed to serialize workflow: {0}")]
    Serialize(String),

    #[error("incomplete workflow: {0}")]
    Incomplete(String),

    #[error("unsupported workflow format: {0}")]
    UnsupportedFormat(String),
}

/// Detect format from file path extension.
pub fn detect_format(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        _ => None,
    }
}
