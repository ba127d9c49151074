//! Declarative description of one task instance.

use crate::pipe::{IN_PIPE, OUT_PIPE, PipeArgs, PipeError, is_pipe_key};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One entry in a pipeline's ordered task list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Registered task type name (or alias).
    #[serde(rename = "type", default)]
    pub task_type: String,

    /// Unique id within the pipeline. Empty until assigned.
    #[serde(rename = "id", default, skip_serializing_if = "String::is_empty")]
    pub task_id: String,

    /// Named configuration arguments.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub args: IndexMap<String, String>,

    /// The single unnamed argument, if given.
    #[serde(rename = "default", default, skip_serializing_if = "Option::is_none")]
    pub default_arg: Option<String>,

    /// `inPipe[.n]` / `outPipe[.n]` entries.
    #[serde(rename = "pipes", default, skip_serializing_if = "IndexMap::is_empty")]
    pub pipe_args: IndexMap<String, String>,
}

impl TaskSpec {
    /// A spec at 1-based `position`, with the positional default id.
    pub fn new(position: usize, task_type: impl Into<String>) -> Self {
        let task_type = task_type.into();
        Self {
            task_id: default_task_id(position, &task_type),
            task_type,
            ..Default::default()
        }
    }

    /// A spec with no id yet; see [`TaskSpec::ensure_id`].
    pub fn of_type(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    /// Build a spec from raw `key=value` arguments, separating pipe keys.
    pub fn from_args(
        position: usize,
        task_type: impl Into<String>,
        default_arg: Option<String>,
        raw: IndexMap<String, String>,
    ) -> Self {
        let mut spec = Self::new(position, task_type);
        spec.default_arg = default_arg;
        for (key, value) in raw {
            if is_pipe_key(&key) {
                spec.pipe_args.insert(key, value);
            } else {
                spec.args.insert(key, value);
            }
        }
        spec
    }

    pub fn id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn default_arg(mut self, value: impl Into<String>) -> Self {
        self.default_arg = Some(value.into());
        self
    }

    /// Read input `slot` from the named pipe.
    pub fn in_pipe(mut self, slot: usize, pipe: impl Into<String>) -> Self {
        self.pipe_args.insert(pipe_key(IN_PIPE, slot), pipe.into());
        self
    }

    /// Publish output `slot` under the named pipe.
    pub fn out_pipe(mut self, slot: usize, pipe: impl Into<String>) -> Self {
        self.pipe_args.insert(pipe_key(OUT_PIPE, slot), pipe.into());
        self
    }

    /// Assign the positional id if none was given.
    pub fn ensure_id(&mut self, position: usize) {
        if self.task_id.is_empty() {
            self.task_id = default_task_id(position, &self.task_type);
        }
    }

    pub fn pipes(&self) -> Result<PipeArgs, PipeError> {
        PipeArgs::parse(&self.task_id, &self.pipe_args)
    }

    /// Merge defaults under the explicit arguments; explicit ones win.
    pub fn merge_defaults<'a>(&mut self, defaults: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (key, value) in defaults {
            if !self.args.contains_key(key) {
                self.args.insert(key.clone(), value.clone());
            }
        }
    }
}

fn pipe_key(direction: &str, slot: usize) -> String {
    if slot == 0 {
        direction.to_string()
    } else {
        format!("{}.{}", direction, slot)
    }
}

/// Positional id: `"<position>-<task_type>"`.
pub fn default_task_id(position: usize, task_type: &str) -> String {
    format!("{}-{}", position, task_type)
}
