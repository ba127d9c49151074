//! Pipeline assembly and execution.
//!
//! A run moves through `Built → Connected → Running → Completed | Failed`:
//!
//! 1. [`Pipeline::prepare`] instantiates every task, resolves pipes in one
//!    left-to-right pass, rejects unclaimed outputs and wires sinks into
//!    producers. Nothing runs if any of this fails.
//! 2. [`Pipeline::execute`] starts every handle in declaration order; only
//!    active tasks get a thread.
//! 3. [`Pipeline::await_completion`] joins every handle in declaration order
//!    and aggregates failures. Siblings of a failed task are never cancelled;
//!    postbox failure signalling unblocks them.

use crate::handle::{Binding, ConnectError, HandleError, TaskHandle};
use crate::pipe::{PipeError, PipeRegistry};
use crate::registry::{RegistryError, TaskRegistry};
use crate::spec::TaskSpec;
use crate::task::TaskError;
use indexmap::IndexSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Built,
    Connected,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Built => "built",
            PipelineState::Connected => "connected",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One task's failure in an otherwise aggregated run.
#[derive(Debug)]
pub struct TaskFailure {
    pub task_id: String,
    pub error: TaskError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task_id, self.error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline is {actual}, expected {expected}")]
    InvalidState {
        expected: PipelineState,
        actual: PipelineState,
    },

    #[error("duplicate task id '{0}'")]
    DuplicateTaskId(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Pipe(#[from] PipeError),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("failed to wire task '{task_id}': {source}")]
    Wiring {
        task_id: String,
        #[source]
        source: TaskError,
    },

    #[error("{} task(s) failed: {}", .0.len(), join_failures(.0))]
    TasksFailed(Vec<TaskFailure>),
}

impl From<ConnectError> for PipelineError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Pipe(e) => PipelineError::Pipe(e),
            ConnectError::Handle(e) => PipelineError::Handle(e),
        }
    }
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// An ordered list of tasks wired into a graph and run to completion.
pub struct Pipeline {
    registry: Arc<TaskRegistry>,
    handles: Vec<TaskHandle>,
    bindings: Vec<Binding>,
    state: PipelineState,
    started_at: Option<Instant>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("handles", &self.handles)
            .finish()
    }
}

impl Pipeline {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            handles: Vec::new(),
            bindings: Vec::new(),
            state: PipelineState::Built,
            started_at: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Resolved edges, in connection order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(TaskHandle::task_id)
    }

    /// Instantiate and connect `specs`. On error the pipeline is `Failed`
    /// and no task has been started.
    pub fn prepare(&mut self, specs: &[TaskSpec]) -> Result<(), PipelineError> {
        self.expect_state(PipelineState::Built)?;
        match self.build_and_connect(specs) {
            Ok(()) => {
                self.state = PipelineState::Connected;
                debug!(
                    tasks = self.handles.len(),
                    bindings = self.bindings.len(),
                    "pipeline connected"
                );
                Ok(())
            }
            Err(e) => {
                self.handles.clear();
                self.bindings.clear();
                self.state = PipelineState::Failed;
                Err(e)
            }
        }
    }

    /// Start every task in declaration order.
    pub fn execute(&mut self) -> Result<(), PipelineError> {
        self.expect_state(PipelineState::Connected)?;
        self.state = PipelineState::Running;
        self.started_at = Some(Instant::now());

        let active = self.handles.iter().filter(|h| h.is_active()).count();
        info!(tasks = self.handles.len(), threads = active, "starting pipeline");

        for handle in &mut self.handles {
            handle.start()?;
        }
        Ok(())
    }

    /// Wait for every task and aggregate the outcome.
    pub fn await_completion(&mut self) -> Result<(), PipelineError> {
        self.expect_state(PipelineState::Running)?;

        let mut failures = Vec::new();
        for handle in &mut self.handles {
            let error = match handle.await_completion() {
                Ok(true) => continue,
                Ok(false) => handle
                    .take_failure()
                    .unwrap_or_else(|| TaskError::Failed("task failed without a cause".into())),
                Err(e) => TaskError::Other(Box::new(e)),
            };
            error!(task = handle.task_id(), error = %error, "task failed");
            failures.push(TaskFailure {
                task_id: handle.task_id().to_string(),
                error,
            });
        }

        let elapsed_ms = self
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or_default();

        if failures.is_empty() {
            self.state = PipelineState::Completed;
            info!(elapsed_ms, "pipeline completed");
            Ok(())
        } else {
            self.state = PipelineState::Failed;
            info!(elapsed_ms, failed = failures.len(), "pipeline failed");
            Err(PipelineError::TasksFailed(failures))
        }
    }

    /// Prepare, execute and await in one call.
    pub fn run(registry: Arc<TaskRegistry>, specs: &[TaskSpec]) -> Result<(), PipelineError> {
        let mut pipeline = Pipeline::new(registry);
        pipeline.prepare(specs)?;
        pipeline.execute()?;
        pipeline.await_completion()
    }

    fn expect_state(&self, expected: PipelineState) -> Result<(), PipelineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    fn build_and_connect(&mut self, specs: &[TaskSpec]) -> Result<(), PipelineError> {
        let mut ids = IndexSet::new();
        for (index, spec) in specs.iter().enumerate() {
            let mut spec = spec.clone();
            spec.ensure_id(index + 1);
            if !ids.insert(spec.task_id.clone()) {
                return Err(PipelineError::DuplicateTaskId(spec.task_id));
            }

            let pipes = spec.pipes()?;
            let task = self.registry.create(&spec)?;
            debug!(task = %spec.task_id, capability = %task.capability(), "instantiated task");
            self.handles
                .push(TaskHandle::new(index, spec.task_id.clone(), pipes, task)?);
        }

        let mut pipes = PipeRegistry::new();
        for handle in &mut self.handles {
            handle.connect(&mut pipes)?;
            self.bindings.extend(handle.bindings());
        }

        let dangling = pipes.remaining_unclaimed();
        if !dangling.is_empty() {
            return Err(PipeError::Dangling(dangling).into());
        }

        self.assemble()
    }

    /// Move every consumer into its producer, last task first, so each
    /// consumer is fully wired before it is handed upstream.
    fn assemble(&mut self) -> Result<(), PipelineError> {
        for index in (0..self.handles.len()).rev() {
            let consumer = &mut self.handles[index];
            let task_id = consumer.task_id().to_string();
            let inputs = consumer.inputs().to_vec();
            let sinks = consumer
                .take_input_sinks()
                .map_err(|source| PipelineError::Wiring { task_id, source })?;

            for (endpoint, sink) in inputs.into_iter().zip(sinks) {
                let producer = &mut self.handles[endpoint.handle];
                producer
                    .bind_output(endpoint.slot, sink)
                    .map_err(|source| PipelineError::Wiring {
                        task_id: endpoint.task_id.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }
}
