//! Thread wrapper for one active task.
//!
//! The runner owns the task's work function, runs it on a named OS thread and
//! turns both error returns and panics into a recorded outcome. Nothing
//! escapes the thread.

use crate::task::{TaskError, Work};
use std::any::Any;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Errors from misusing a runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("task '{0}' is already running")]
    AlreadyRunning(String),

    #[error("task '{0}' was never started")]
    NotStarted(String),
}

/// How a finished task ended.
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed(TaskError),
}

pub struct TaskRunner {
    name: String,
    work: Option<Work>,
    handle: Option<JoinHandle<Result<(), TaskError>>>,
    started_at: Option<Instant>,
    outcome: Option<Outcome>,
    elapsed: Option<Duration>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.name)
            .field("started", &self.work.is_none())
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl TaskRunner {
    pub fn new(name: impl Into<String>, work: Work) -> Self {
        Self {
            name: name.into(),
            work: Some(work),
            handle: None,
            started_at: None,
            outcome: None,
            elapsed: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch the work function on its own thread.
    ///
    /// A thread that cannot be spawned is recorded as a failed outcome rather
    /// than returned, so `join` still reports it.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        let work = self
            .work
            .take()
            .ok_or_else(|| RunnerError::AlreadyRunning(self.name.clone()))?;

        debug!(task = %self.name, "starting task thread");
        self.started_at = Some(Instant::now());

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(work);

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                warn!(task = %self.name, error = %e, "failed to spawn task thread");
                self.outcome = Some(Outcome::Failed(TaskError::Io(e)));
            }
        }
        Ok(())
    }

    /// Block until the task's thread finishes and record its outcome.
    ///
    /// Calling again after the outcome is known returns immediately.
    pub fn join(&mut self) -> Result<(), RunnerError> {
        if self.outcome.is_some() {
            return Ok(());
        }
        let handle = self
            .handle
            .take()
            .ok_or_else(|| RunnerError::NotStarted(self.name.clone()))?;

        let outcome = match handle.join() {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(e)) => Outcome::Failed(e),
            Err(payload) => Outcome::Failed(TaskError::Panicked(panic_message(payload.as_ref()))),
        };

        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        match &outcome {
            Outcome::Succeeded => {
                info!(task = %self.name, elapsed_ms = elapsed.as_millis() as u64, "task finished")
            }
            Outcome::Failed(e) => {
                info!(task = %self.name, elapsed_ms = elapsed.as_millis() as u64, error = %e, "task failed")
            }
        }
        self.elapsed = Some(elapsed);
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Whether the task ran to completion. False until `join` has returned.
    pub fn is_successful(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Succeeded))
    }

    /// The error the task ended with, once joined.
    pub fn failure_cause(&self) -> Option<&TaskError> {
        match &self.outcome {
            Some(Outcome::Failed(e)) => Some(e),
            _ => None,
        }
    }

    /// Take the recorded outcome, leaving the runner empty.
    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }

    /// Wall-clock run time, once joined.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_successful_run() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut runner = TaskRunner::new(
            "1-test",
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );

        runner.start().unwrap();
        runner.join().unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert!(runner.is_successful());
        assert!(runner.failure_cause().is_none());
        assert!(runner.elapsed().is_some());
    }

    #[test]
    fn test_error_is_recorded() {
        let mut runner =
            TaskRunner::new("2-test", Box::new(|| Err(TaskError::Failed("boom".into()))));

        runner.start().unwrap();
        runner.join().unwrap();

        assert!(!runner.is_successful());
        assert_eq!(runner.failure_cause().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_panic_is_recorded() {
        let mut runner = TaskRunner::new("3-test", Box::new(|| panic!("exploded")));

        runner.start().unwrap();
        runner.join().unwrap();

        assert!(!runner.is_successful());
        assert!(matches!(
            runner.failure_cause(),
            Some(TaskError::Panicked(msg)) if msg == "exploded"
        ));
    }

    #[test]
    fn test_start_twice_fails() {
        let mut runner = TaskRunner::new("4-test", Box::new(|| Ok(())));
        runner.start().unwrap();
        assert!(matches!(runner.start(), Err(RunnerError::AlreadyRunning(_))));
        runner.join().unwrap();
    }

    #[test]
    fn test_join_before_start_fails() {
        let mut runner = TaskRunner::new("5-test", Box::new(|| Ok(())));
        assert!(!runner.is_successful());
        assert!(matches!(runner.join(), Err(RunnerError::NotStarted(_))));
    }

    #[test]
    fn test_join_is_repeatable() {
        let mut runner = TaskRunner::new("6-test", Box::new(|| Ok(())));
        runner.start().unwrap();
        runner.join().unwrap();
        runner.join().unwrap();
        assert!(runner.is_successful());
    }
}
