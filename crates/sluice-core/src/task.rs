//! Task capabilities and the sink contract.
//!
//! The engine never looks at concrete task types. It only recognizes the
//! capability a task was instantiated with ([`Task`]) and the stream kinds
//! of its ports. Records cross task boundaries exclusively through
//! [`Sink`] calls, either inline on the caller's thread or through a
//! postbox when the consumer runs on its own thread.

use crate::entity::{ChangeContainer, EntityContainer};
use crate::metadata::Metadata;
use crate::postbox::{PostboxError, PostboxSender};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// The element type carried by a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// [`EntityContainer`] records.
    Entity,
    /// [`ChangeContainer`] records.
    Change,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Entity => f.write_str("entity"),
            StreamKind::Change => f.write_str("change"),
        }
    }
}

/// Errors raised by tasks, during instantiation or while running.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid value for argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("output slot {0} has no sink bound")]
    UnboundOutput(usize),

    #[error("output slot {slot} does not exist (task has {count})")]
    NoSuchSlot { slot: usize, count: usize },

    #[error("output slot {slot} produces {expected} records but was given a {actual} sink")]
    SinkKindMismatch {
        slot: usize,
        expected: StreamKind,
        actual: StreamKind,
    },

    #[error(transparent)]
    Postbox(#[from] PostboxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Parse(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Consumer side of a record stream.
///
/// Producers call `initialize` once, `process` per record, `complete` once on
/// success, and `release` exactly once whatever happened.
pub trait Sink<T>: Send {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError>;

    fn process(&mut self, record: T) -> Result<(), TaskError>;

    /// Flush everything; the stream ended successfully.
    fn complete(&mut self) -> Result<(), TaskError>;

    /// Free resources. Must not fail; log cleanup problems instead.
    fn release(&mut self);
}

/// A boxed sink of either stream kind.
pub enum AnySink {
    Entity(Box<dyn Sink<EntityContainer>>),
    Change(Box<dyn Sink<ChangeContainer>>),
}

impl AnySink {
    pub fn kind(&self) -> StreamKind {
        match self {
            AnySink::Entity(_) => StreamKind::Entity,
            AnySink::Change(_) => StreamKind::Change,
        }
    }
}

impl fmt::Debug for AnySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnySink({})", self.kind())
    }
}

/// Record types that can flow through a pipe.
pub trait Record: Send + 'static {
    const KIND: StreamKind;

    /// Unwrap a sink of this record type, handing it back on mismatch.
    fn from_any(sink: AnySink) -> Result<Box<dyn Sink<Self>>, AnySink>;

    fn into_any(sink: Box<dyn Sink<Self>>) -> AnySink;
}

impl Record for EntityContainer {
    const KIND: StreamKind = StreamKind::Entity;

    fn from_any(sink: AnySink) -> Result<Box<dyn Sink<Self>>, AnySink> {
        match sink {
            AnySink::Entity(sink) => Ok(sink),
            other => Err(other),
        }
    }

    fn into_any(sink: Box<dyn Sink<Self>>) -> AnySink {
        AnySink::Entity(sink)
    }
}

impl Record for ChangeContainer {
    const KIND: StreamKind = StreamKind::Change;

    fn from_any(sink: AnySink) -> Result<Box<dyn Sink<Self>>, AnySink> {
        match sink {
            AnySink::Change(sink) => Ok(sink),
            other => Err(other),
        }
    }

    fn into_any(sink: Box<dyn Sink<Self>>) -> AnySink {
        AnySink::Change(sink)
    }
}

/// Owns a downstream sink and releases it exactly once, at the latest on drop.
pub struct SinkGuard<T> {
    sink: Box<dyn Sink<T>>,
    released: bool,
}

impl<T> SinkGuard<T> {
    pub fn new(sink: Box<dyn Sink<T>>) -> Self {
        Self {
            sink,
            released: false,
        }
    }
}

impl<T: Send> Sink<T> for SinkGuard<T> {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError> {
        self.sink.initialize(metadata)
    }

    fn process(&mut self, record: T) -> Result<(), TaskError> {
        self.sink.process(record)
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        self.sink.complete()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sink.release();
        }
    }
}

impl<T> Drop for SinkGuard<T> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.sink.release();
        }
    }
}

/// One output port of a task: empty until the pipeline binds a consumer.
pub struct Output<T> {
    guard: Option<SinkGuard<T>>,
}

impl<T> Default for Output<T> {
    fn default() -> Self {
        Self { guard: None }
    }
}

impl<T: Record> Output<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the consumer for output `slot`, checking its stream kind.
    pub fn bind(&mut self, slot: usize, sink: AnySink) -> Result<(), TaskError> {
        let actual = sink.kind();
        let sink = T::from_any(sink).map_err(|_| TaskError::SinkKindMismatch {
            slot,
            expected: T::KIND,
            actual,
        })?;
        self.guard = Some(SinkGuard::new(sink));
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.guard.is_some()
    }

    /// Borrow the bound sink; `slot` is only used for the error.
    pub fn sink(&mut self, slot: usize) -> Result<&mut SinkGuard<T>, TaskError> {
        self.guard.as_mut().ok_or(TaskError::UnboundOutput(slot))
    }

    /// Take ownership of the bound sink.
    pub fn take(&mut self, slot: usize) -> Result<SinkGuard<T>, TaskError> {
        self.guard.take().ok_or(TaskError::UnboundOutput(slot))
    }

    /// Release the bound sink, if any. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(guard) = self.guard.as_mut() {
            guard.release();
        }
    }
}

/// Output ports of a producing task.
pub trait Outputs {
    /// Stream kind of each output slot, by index.
    fn output_kinds(&self) -> Vec<StreamKind>;

    /// Bind a consumer to output `slot`. Called once per slot during wiring.
    fn set_sink(&mut self, slot: usize, sink: AnySink) -> Result<(), TaskError>;
}

/// Active task with no inputs (a reader). Runs on its own thread.
///
/// `run` must initialize, feed and complete every output, and must release
/// every output regardless of outcome ([`SinkGuard`] does the latter).
pub trait RunnableSource: Outputs + Send {
    fn run(self: Box<Self>) -> Result<(), TaskError>;
}

/// Passive task with one input and one or more outputs (a filter or tee).
///
/// Executes on whichever thread drives its input.
pub trait SinkSource: Outputs + Send {
    fn input_kind(&self) -> StreamKind;

    /// Become the sink for the single input, once all outputs are bound.
    fn into_sink(self: Box<Self>) -> AnySink;
}

/// Active task that consumes one or more streams through postboxes and
/// drives its outputs from its own thread (buffer, merge).
pub trait RunnableSinkSource: Outputs + Send {
    fn input_kinds(&self) -> Vec<StreamKind>;

    /// Producer halves of the input postboxes, one per input slot, in order.
    /// Called exactly once during wiring.
    fn take_inputs(&mut self) -> Vec<AnySink>;

    fn run(self: Box<Self>) -> Result<(), TaskError>;
}

/// Active task with neither inputs nor outputs.
pub trait RunnableTask: Send {
    fn run(self: Box<Self>) -> Result<(), TaskError>;
}

/// Capability family of an instantiated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Source,
    Sink,
    SinkSource,
    RunnableSinkSource,
    Runnable,
}

impl Capability {
    /// Active tasks get a dedicated thread; passive ones run inline.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Capability::Source | Capability::RunnableSinkSource | Capability::Runnable
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Source => "source",
            Capability::Sink => "sink",
            Capability::SinkSource => "sink-source",
            Capability::RunnableSinkSource => "runnable-sink-source",
            Capability::Runnable => "runnable",
        };
        f.write_str(name)
    }
}

/// An instantiated task, tagged by capability.
pub enum Task {
    Source(Box<dyn RunnableSource>),
    Sink(AnySink),
    SinkSource(Box<dyn SinkSource>),
    RunnableSinkSource(Box<dyn RunnableSinkSource>),
    Runnable(Box<dyn RunnableTask>),
}

/// Work function handed to a task runner.
pub type Work = Box<dyn FnOnce() -> Result<(), TaskError> + Send>;

impl Task {
    pub fn capability(&self) -> Capability {
        match self {
            Task::Source(_) => Capability::Source,
            Task::Sink(_) => Capability::Sink,
            Task::SinkSource(_) => Capability::SinkSource,
            Task::RunnableSinkSource(_) => Capability::RunnableSinkSource,
            Task::Runnable(_) => Capability::Runnable,
        }
    }

    pub fn is_active(&self) -> bool {
        self.capability().is_active()
    }

    pub fn input_kinds(&self) -> Vec<StreamKind> {
        match self {
            Task::Source(_) | Task::Runnable(_) => Vec::new(),
            Task::Sink(sink) => vec![sink.kind()],
            Task::SinkSource(task) => vec![task.input_kind()],
            Task::RunnableSinkSource(task) => task.input_kinds(),
        }
    }

    pub fn output_kinds(&self) -> Vec<StreamKind> {
        match self {
            Task::Sink(_) | Task::Runnable(_) => Vec::new(),
            Task::Source(task) => task.output_kinds(),
            Task::SinkSource(task) => task.output_kinds(),
            Task::RunnableSinkSource(task) => task.output_kinds(),
        }
    }

    /// Bind a consumer to one of this task's outputs.
    pub fn set_sink(&mut self, slot: usize, sink: AnySink) -> Result<(), TaskError> {
        match self {
            Task::Source(task) => task.set_sink(slot, sink),
            Task::SinkSource(task) => task.set_sink(slot, sink),
            Task::RunnableSinkSource(task) => task.set_sink(slot, sink),
            Task::Sink(_) | Task::Runnable(_) => Err(TaskError::NoSuchSlot { slot, count: 0 }),
        }
    }

    /// The entry point for an active task; `None` for passive ones.
    pub fn into_work(self) -> Option<Work> {
        match self {
            Task::Source(task) => Some(Box::new(move || task.run())),
            Task::RunnableSinkSource(task) => Some(Box::new(move || task.run())),
            Task::Runnable(task) => Some(Box::new(move || task.run())),
            Task::Sink(_) | Task::SinkSource(_) => None,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("capability", &self.capability())
            .field("inputs", &self.input_kinds())
            .field("outputs", &self.output_kinds())
            .finish()
    }
}

/// The producer half of a postbox is a sink like any other.
impl<T: Send> Sink<T> for PostboxSender<T> {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError> {
        PostboxSender::initialize(self, metadata.clone())?;
        Ok(())
    }

    fn process(&mut self, record: T) -> Result<(), TaskError> {
        self.put(record)?;
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        PostboxSender::complete(self)?;
        Ok(())
    }

    fn release(&mut self) {
        PostboxSender::release(self);
    }
}

/// Report a cleanup failure without propagating it.
pub fn log_release_error(task: &str, err: &dyn std::error::Error) {
    warn!(task, error = %err, "error while releasing resources");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Node};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        processed: usize,
        completed: usize,
        released: usize,
    }

    struct CountingSink(Arc<Mutex<Calls>>);

    impl Sink<EntityContainer> for CountingSink {
        fn initialize(&mut self, _metadata: &Metadata) -> Result<(), TaskError> {
            Ok(())
        }

        fn process(&mut self, _record: EntityContainer) -> Result<(), TaskError> {
            self.0.lock().unwrap().processed += 1;
            Ok(())
        }

        fn complete(&mut self) -> Result<(), TaskError> {
            self.0.lock().unwrap().completed += 1;
            Ok(())
        }

        fn release(&mut self) {
            self.0.lock().unwrap().released += 1;
        }
    }

    fn node(id: i64) -> EntityContainer {
        EntityContainer::new(Entity::Node(Node {
            id,
            version: 1,
            tags: Vec::new(),
            lat: 0.0,
            lon: 0.0,
        }))
    }

    #[test]
    fn test_guard_releases_once() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        {
            let mut guard: SinkGuard<EntityContainer> =
                SinkGuard::new(Box::new(CountingSink(Arc::clone(&calls))));
            guard.process(node(1)).unwrap();
            guard.complete().unwrap();
            guard.release();
            guard.release();
        }
        let calls = calls.lock().unwrap();
        assert_eq!(calls.processed, 1);
        assert_eq!(calls.completed, 1);
        assert_eq!(calls.released, 1);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        drop(SinkGuard::new(
            Box::new(CountingSink(Arc::clone(&calls))) as Box<dyn Sink<EntityContainer>>
        ));
        assert_eq!(calls.lock().unwrap().released, 1);
    }

    #[test]
    fn test_output_rejects_wrong_kind() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut output: Output<ChangeContainer> = Output::new();

        let err = output
            .bind(0, AnySink::Entity(Box::new(CountingSink(calls))))
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::SinkKindMismatch {
                slot: 0,
                expected: StreamKind::Change,
                actual: StreamKind::Entity,
            }
        ));
        assert!(!output.is_bound());
    }

    #[test]
    fn test_unbound_output() {
        let mut output: Output<EntityContainer> = Output::new();
        assert!(matches!(output.sink(3), Err(TaskError::UnboundOutput(3))));
    }

    #[test]
    fn test_capability_activity() {
        assert!(Capability::Source.is_active());
        assert!(Capability::Runnable.is_active());
        assert!(Capability::RunnableSinkSource.is_active());
        assert!(!Capability::Sink.is_active());
        assert!(!Capability::SinkSource.is_active());
    }
}
