//! Sluice: pipeline assembly and concurrent execution for streaming geodata
//!
//! A pipeline is an ordered list of task specs. Sluice instantiates each task
//! through a [`TaskRegistry`], resolves symbolic pipes into producer →
//! consumer bindings in one left-to-right pass, runs every active task on its
//! own thread and aggregates the outcome.

mod entity;
mod handle;
mod metadata;
mod pipe;
mod pipeline;
pub mod postbox;
mod registry;
mod runner;
mod spec;
mod task;
mod workflow;

pub use entity::{
    Bound, ChangeAction, ChangeContainer, Entity, EntityContainer, EntityType, Node, Relation,
    RelationMember, Tag, Way,
};
pub use handle::{Binding, ConnectError, HandleError, TaskHandle};
pub use metadata::{Metadata, MetadataExt, Value};
pub use pipe::{IN_PIPE, OUT_PIPE, OutputEndpoint, PipeArgs, PipeError, PipeRegistry, is_pipe_key};
pub use pipeline::{Pipeline, PipelineError, PipelineState, TaskFailure};
pub use postbox::{PostboxError, PostboxReceiver, PostboxSender};
pub use registry::{
    FnFactory, RegistryError, TaskConfig, TaskDecl, TaskDescription, TaskFactory, TaskRegistry,
    find_similar, levenshtein,
};
pub use runner::{Outcome, RunnerError, TaskRunner};
pub use spec::{TaskSpec, default_task_id};
pub use task::{
    AnySink, Capability, Output, Outputs, Record, RunnableSinkSource, RunnableSource,
    RunnableTask, Sink, SinkGuard, SinkSource, StreamKind, Task, TaskError, Work,
    log_release_error,
};
pub use workflow::{Workflow, WorkflowError, detect_format};
