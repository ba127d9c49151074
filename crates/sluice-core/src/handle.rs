//! Per-task lifecycle within a pipeline.
//!
//! A handle owns one instantiated task from connection until it is either
//! moved into its upstream producer (passive tasks) or handed to a
//! [`TaskRunner`] (active tasks).

use crate::pipe::{OutputEndpoint, PipeArgs, PipeError, PipeRegistry};
use crate::runner::{Outcome, RunnerError, TaskRunner};
use crate::task::{AnySink, Capability, StreamKind, Task, TaskError};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Errors from driving a handle out of order.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("task '{0}' is already connected")]
    AlreadyConnected(String),

    #[error("task '{0}' has not been connected")]
    NotConnected(String),

    #[error("task '{0}' is already started")]
    AlreadyStarted(String),

    #[error("task '{0}' has not been started")]
    NotStarted(String),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// A resolved producer → consumer edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub producer: String,
    pub producer_slot: usize,
    pub consumer: String,
    pub consumer_slot: usize,
    pub kind: StreamKind,
    /// `None` for a default pipe.
    pub pipe: Option<String>,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] -> {}[{}] ({}",
            self.producer, self.producer_slot, self.consumer, self.consumer_slot, self.kind
        )?;
        match &self.pipe {
            Some(pipe) => write!(f, ", pipe '{}')", pipe),
            None => write!(f, ", default pipe)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Built,
    Connected,
    Started,
    Finished,
}

pub struct TaskHandle {
    index: usize,
    task_id: String,
    capability: Capability,
    input_kinds: Vec<StreamKind>,
    output_kinds: Vec<StreamKind>,
    pipes: PipeArgs,
    task: Option<Task>,
    inputs: Vec<OutputEndpoint>,
    runner: Option<TaskRunner>,
    stage: Stage,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("index", &self.index)
            .field("task_id", &self.task_id)
            .field("capability", &self.capability)
            .field("stage", &self.stage)
            .finish()
    }
}

impl TaskHandle {
    /// Wrap an instantiated task at position `index` (0-based).
    ///
    /// Fails if the pipe arguments name slots the task does not have.
    pub fn new(
        index: usize,
        task_id: impl Into<String>,
        pipes: PipeArgs,
        task: Task,
    ) -> Result<Self, PipeError> {
        let task_id = task_id.into();
        let input_kinds = task.input_kinds();
        let output_kinds = task.output_kinds();
        pipes.validate(&task_id, input_kinds.len(), output_kinds.len())?;

        Ok(Self {
            index,
            task_id,
            capability: task.capability(),
            input_kinds,
            output_kinds,
            pipes,
            task: Some(task),
            inputs: Vec::new(),
            runner: None,
            stage: Stage::Built,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn is_active(&self) -> bool {
        self.capability.is_active()
    }

    /// Producers claimed by this task's inputs, by input slot.
    pub fn inputs(&self) -> &[OutputEndpoint] {
        &self.inputs
    }

    /// Edges feeding this task.
    pub fn bindings(&self) -> Vec<Binding> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(slot, endpoint)| Binding {
                producer: endpoint.task_id.clone(),
                producer_slot: endpoint.slot,
                consumer: self.task_id.clone(),
                consumer_slot: slot,
                kind: endpoint.kind,
                pipe: endpoint.pipe.clone(),
            })
            .collect()
    }

    /// Claim every input (lowest slot first), then publish every output.
    pub fn connect(&mut self, registry: &mut PipeRegistry) -> Result<(), ConnectError> {
        if self.stage != Stage::Built {
            return Err(HandleError::AlreadyConnected(self.task_id.clone()).into());
        }

        for (slot, kind) in self.input_kinds.iter().enumerate() {
            let pipe = self.pipes.inputs.get(&slot).map(String::as_str);
            let endpoint = registry.claim_input(&self.task_id, slot, pipe, *kind)?;
            debug!(
                consumer = %self.task_id,
                slot,
                producer = %endpoint.task_id,
                producer_slot = endpoint.slot,
                pipe = pipe.unwrap_or("<default>"),
                "bound input"
            );
            self.inputs.push(endpoint);
        }

        for (slot, kind) in self.output_kinds.iter().enumerate() {
            let pipe = self.pipes.outputs.get(&slot).cloned();
            let endpoint = OutputEndpoint {
                task_id: self.task_id.clone(),
                handle: self.index,
                slot,
                kind: *kind,
                pipe: pipe.clone(),
            };
            registry.publish_output(&self.task_id, pipe.as_deref(), endpoint)?;
        }

        self.stage = Stage::Connected;
        Ok(())
    }

    /// The sinks upstream producers must write into, one per input slot.
    ///
    /// Passive tasks give themselves up here; a runnable sink-source hands
    /// out its postbox senders and keeps running on its own thread later.
    pub fn take_input_sinks(&mut self) -> Result<Vec<AnySink>, TaskError> {
        let sinks = match self.task.take() {
            Some(Task::Sink(sink)) => vec![sink],
            Some(Task::SinkSource(task)) => vec![task.into_sink()],
            Some(Task::RunnableSinkSource(mut task)) => {
                let sinks = task.take_inputs();
                self.task = Some(Task::RunnableSinkSource(task));
                sinks
            }
            other => {
                self.task = other;
                Vec::new()
            }
        };

        if sinks.len() != self.input_kinds.len() {
            return Err(TaskError::Failed(format!(
                "task provided {} input sink(s) for {} input(s)",
                sinks.len(),
                self.input_kinds.len()
            )));
        }
        Ok(sinks)
    }

    /// Bind a consumer to output `slot`.
    pub fn bind_output(&mut self, slot: usize, sink: AnySink) -> Result<(), TaskError> {
        match self.task.as_mut() {
            Some(task) => task.set_sink(slot, sink),
            None => Err(TaskError::Failed(format!(
                "task '{}' was already moved into its producer",
                self.task_id
            ))),
        }
    }

    /// Launch the task's thread if it is active. A no-op for passive tasks.
    pub fn start(&mut self) -> Result<(), HandleError> {
        match self.stage {
            Stage::Built => return Err(HandleError::NotConnected(self.task_id.clone())),
            Stage::Started | Stage::Finished => {
                return Err(HandleError::AlreadyStarted(self.task_id.clone()));
            }
            Stage::Connected => {}
        }
        self.stage = Stage::Started;

        if let Some(work) = self.task.take().and_then(Task::into_work) {
            let mut runner = TaskRunner::new(self.task_id.clone(), work);
            runner.start()?;
            self.runner = Some(runner);
        }
        Ok(())
    }

    /// Wait for the task to finish. `Ok(false)` means it failed; the cause is
    /// available from [`TaskHandle::take_failure`].
    pub fn await_completion(&mut self) -> Result<bool, HandleError> {
        match self.stage {
            Stage::Built | Stage::Connected => {
                return Err(HandleError::NotStarted(self.task_id.clone()));
            }
            Stage::Started | Stage::Finished => {}
        }
        self.stage = Stage::Finished;

        match self.runner.as_mut() {
            Some(runner) => {
                runner.join()?;
                Ok(runner.is_successful())
            }
            None => Ok(true),
        }
    }

    /// The error a failed active task ended with.
    pub fn take_failure(&mut self) -> Option<TaskError> {
        match self.runner.as_mut()?.take_outcome()? {
            Outcome::Failed(e) => Some(e),
            Outcome::Succeeded => None,
        }
    }
}

/// Failure while connecting one handle.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Pipe(#[from] PipeError),

    #[error(transparent)]
    Handle(#[from] HandleError),
}
