//! Task arguments on the command line.
//!
//! ```text
//! --read-json in.jsonl outPipe=raw --sort inPipe=raw type=IdThenType --write-json out.jsonl
//! ```
//!
//! Every `--<task-type>` starts a new task. The tokens up to the next one are
//! `key=value` arguments, plus at most one bare default argument.

use indexmap::IndexMap;
use rhi_sluice_core::TaskSpec;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("argument '{0}' does not belong to a task; start a task with --<task-type>")]
    Orphan(String),

    #[error("'--' must be followed by a task type")]
    MissingTaskType,

    #[error("task {position} ({task_type}) has more than one default argument: '{first}' and '{second}'")]
    SecondDefault {
        position: usize,
        task_type: String,
        first: String,
        second: String,
    },

    #[error("task {position} ({task_type}) sets '{key}' twice")]
    DuplicateKey {
        position: usize,
        task_type: String,
        key: String,
    },

    #[error("task {position} ({task_type}) has an argument with an empty name: '{arg}'")]
    EmptyKey {
        position: usize,
        task_type: String,
        arg: String,
    },
}

struct Pending {
    position: usize,
    task_type: String,
    default_arg: Option<String>,
    raw: IndexMap<String, String>,
}

impl Pending {
    fn new(position: usize, task_type: &str) -> Self {
        Self {
            position,
            task_type: task_type.to_string(),
            default_arg: None,
            raw: IndexMap::new(),
        }
    }

    fn push(&mut self, arg: &str) -> Result<(), ArgsError> {
        let Some((key, value)) = arg.split_once('=') else {
            if let Some(first) = &self.default_arg {
                return Err(ArgsError::SecondDefault {
                    position: self.position,
                    task_type: self.task_type.clone(),
                    first: first.clone(),
                    second: arg.to_string(),
                });
            }
            self.default_arg = Some(arg.to_string());
            return Ok(());
        };

        if key.is_empty() {
            return Err(ArgsError::EmptyKey {
                position: self.position,
                task_type: self.task_type.clone(),
                arg: arg.to_string(),
            });
        }
        if self.raw.insert(key.to_string(), value.to_string()).is_some() {
            return Err(ArgsError::DuplicateKey {
                position: self.position,
                task_type: self.task_type.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn finish(self) -> TaskSpec {
        TaskSpec::from_args(self.position, self.task_type, self.default_arg, self.raw)
    }
}

/// Split command-line tokens into task specs, in order.
pub fn parse_task_args<S: AsRef<str>>(args: &[S]) -> Result<Vec<TaskSpec>, ArgsError> {
    let mut specs = Vec::new();
    let mut current: Option<Pending> = None;

    for arg in args {
        let arg = arg.as_ref();
        if let Some(task_type) = arg.strip_prefix("--") {
            if task_type.is_empty() {
                return Err(ArgsError::MissingTaskType);
            }
            if let Some(done) = current.take() {
                specs.push(done.finish());
            }
            current = Some(Pending::new(specs.len() + 1, task_type));
            continue;
        }

        match current.as_mut() {
            Some(pending) => pending.push(arg)?,
            None => return Err(ArgsError::Orphan(arg.to_string())),
        }
    }

    if let Some(done) = current {
        specs.push(done.finish());
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chain() {
        let specs = parse_task_args(&[
            "--read-json",
            "in.jsonl",
            "outPipe=raw",
            "--sort",
            "inPipe=raw",
            "type=IdThenType",
            "--write-json",
            "file=out.jsonl",
        ])
        .unwrap();

        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].task_id, "1-read-json");
        assert_eq!(specs[0].default_arg.as_deref(), Some("in.jsonl"));
        assert_eq!(specs[0].pipe_args.get("outPipe").map(String::as_str), Some("raw"));
        assert!(specs[0].args.is_empty());

        assert_eq!(specs[1].task_id, "2-sort");
        assert_eq!(specs[1].args.get("type").map(String::as_str), Some("IdThenType"));
        assert_eq!(specs[1].pipe_args.get("inPipe").map(String::as_str), Some("raw"));

        assert_eq!(specs[2].args.get("file").map(String::as_str), Some("out.jsonl"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let specs = parse_task_args(&["--tag-filter", "accept-ways", "name=a=b"]).unwrap();
        assert_eq!(specs[0].args.get("name").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn test_empty() {
        let specs = parse_task_args::<&str>(&[]).unwrap();
        assert!(specs.is_empty());
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse_task_args(&["in.jsonl"]),
            Err(ArgsError::Orphan("in.jsonl".into()))
        );
        assert_eq!(parse_task_args(&["--"]), Err(ArgsError::MissingTaskType));
        assert!(matches!(
            parse_task_args(&["--read-json", "a", "b"]),
            Err(ArgsError::SecondDefault { position: 1, .. })
        ));
        assert!(matches!(
            parse_task_args(&["--null", "--sort", "type=a", "type=b"]),
            Err(ArgsError::DuplicateKey { position: 2, .. })
        ));
        assert!(matches!(
            parse_task_args(&["--sort", "=x"]),
            Err(ArgsError::EmptyKey { .. })
        ));
    }
}
