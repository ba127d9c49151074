//! Pipe matching during the connection phase.
//!
//! Tasks name their inputs and outputs with symbolic pipes. An output is
//! published under its pipe name, or queued as a default output when it has
//! none; an input claims a named output, or the oldest queued default one.
//! A pipe connects exactly one producer to one consumer: claiming removes it.

use crate::task::StreamKind;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::fmt;

/// Reserved argument key for input pipes.
pub const IN_PIPE: &str = "inPipe";
/// Reserved argument key for output pipes.
pub const OUT_PIPE: &str = "outPipe";

/// A published output: which task and slot produces it, and what it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEndpoint {
    /// Id of the producing task.
    pub task_id: String,
    /// Position of the producing task in the pipeline.
    pub handle: usize,
    /// Output slot on the producing task.
    pub slot: usize,
    pub kind: StreamKind,
    /// Pipe name, or `None` for a default pipe.
    pub pipe: Option<String>,
}

impl fmt::Display for OutputEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pipe {
            Some(pipe) => write!(f, "pipe '{}' from task '{}'", pipe, self.task_id),
            None => write!(
                f,
                "default pipe from task '{}' (output {})",
                self.task_id, self.slot
            ),
        }
    }
}

/// Configuration errors raised while connecting tasks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipeError {
    #[error("task '{task_id}' publishes pipe '{pipe}', which is already published and unclaimed")]
    Duplicate { task_id: String, pipe: String },

    #[error("task '{task_id}' reads pipe '{pipe}', which no earlier task publishes")]
    Unresolved { task_id: String, pipe: String },

    #[error("task '{task_id}' needs a default input but no earlier task has an unclaimed default output")]
    NoAvailableInput { task_id: String },

    #[error("task '{task_id}' expects {expected} records on input {slot} but {endpoint} carries {actual} records")]
    TypeMismatch {
        task_id: String,
        slot: usize,
        expected: StreamKind,
        actual: StreamKind,
        endpoint: String,
    },

    #[error("unclaimed outputs: {}", describe(.0))]
    Dangling(Vec<OutputEndpoint>),

    #[error("task '{task_id}' has no {direction} pipe {index} (it has {count})")]
    UnknownSlot {
        task_id: String,
        direction: &'static str,
        index: usize,
        count: usize,
    },

    #[error("task '{task_id}': malformed pipe argument '{key}'")]
    MalformedKey { task_id: String, key: String },
}

fn describe(endpoints: &[OutputEndpoint]) -> String {
    endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pipe names declared by one task, by slot index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipeArgs {
    pub inputs: IndexMap<usize, String>,
    pub outputs: IndexMap<usize, String>,
}

impl PipeArgs {
    /// Parse `inPipe`, `inPipe.<n>`, `outPipe`, `outPipe.<n>` entries.
    pub fn parse<'a>(
        task_id: &str,
        args: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self, PipeError> {
        let mut parsed = PipeArgs::default();
        for (key, pipe) in args {
            let (direction, index) = split_pipe_key(key).ok_or_else(|| PipeError::MalformedKey {
                task_id: task_id.to_string(),
                key: key.clone(),
            })?;
            let map = if direction == IN_PIPE {
                &mut parsed.inputs
            } else {
                &mut parsed.outputs
            };
            map.insert(index, pipe.clone());
        }
        Ok(parsed)
    }

    /// Reject pipe names on slots the task does not have.
    pub fn validate(&self, task_id: &str, inputs: usize, outputs: usize) -> Result<(), PipeError> {
        let check = |map: &IndexMap<usize, String>, direction: &'static str, count: usize| {
            match map.keys().find(|&&index| index >= count) {
                Some(&index) => Err(PipeError::UnknownSlot {
                    task_id: task_id.to_string(),
                    direction,
                    index,
                    count,
                }),
                None => Ok(()),
            }
        };
        check(&self.inputs, "input", inputs)?;
        check(&self.outputs, "output", outputs)
    }
}

/// Whether an argument key is a pipe key (well-formed or not).
pub fn is_pipe_key(key: &str) -> bool {
    key == IN_PIPE
        || key == OUT_PIPE
        || key.starts_with("inPipe.")
        || key.starts_with("outPipe.")
}

fn split_pipe_key(key: &str) -> Option<(&'static str, usize)> {
    for direction in [IN_PIPE, OUT_PIPE] {
        if key == direction {
            return Some((direction, 0));
        }
        if let Some(index) = key
            .strip_prefix(direction)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            return index.parse().ok().map(|i| (direction, i));
        }
    }
    None
}

/// Connection-phase table of published, not yet claimed outputs.
#[derive(Debug, Default)]
pub struct PipeRegistry {
    named: IndexMap<String, OutputEndpoint>,
    defaults: VecDeque<OutputEndpoint>,
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an output under `pipe`, or queue it as a default output.
    pub fn publish_output(
        &mut self,
        task_id: &str,
        pipe: Option<&str>,
        endpoint: OutputEndpoint,
    ) -> Result<(), PipeError> {
        match pipe {
            Some(name) => {
                if self.named.contains_key(name) {
                    return Err(PipeError::Duplicate {
                        task_id: task_id.to_string(),
                        pipe: name.to_string(),
                    });
                }
                self.named.insert(name.to_string(), endpoint);
            }
            None => self.defaults.push_back(endpoint),
        }
        Ok(())
    }

    /// Claim the output for input `slot` of `task_id`.
    pub fn claim_input(
        &mut self,
        task_id: &str,
        slot: usize,
        pipe: Option<&str>,
        required: StreamKind,
    ) -> Result<OutputEndpoint, PipeError> {
        let endpoint = match pipe {
            Some(name) => {
                self.named
                    .shift_remove(name)
                    .ok_or_else(|| PipeError::Unresolved {
                        task_id: task_id.to_string(),
                        pipe: name.to_string(),
                    })?
            }
            None => self
                .defaults
                .pop_front()
                .ok_or_else(|| PipeError::NoAvailableInput {
                    task_id: task_id.to_string(),
                })?,
        };

        if endpoint.kind != required {
            return Err(PipeError::TypeMismatch {
                task_id: task_id.to_string(),
                slot,
                expected: required,
                actual: endpoint.kind,
                endpoint: endpoint.to_string(),
            });
        }
        Ok(endpoint)
    }

    /// Outputs still waiting for a consumer: named ones first, then defaults.
    pub fn remaining_unclaimed(&self) -> Vec<OutputEndpoint> {
        self.named
            .values()
            .chain(self.defaults.iter())
            .cloned()
            .collect()
    }
}
