//! Registry of task factories.
//!
//! The registry is an explicit value built once per run and shared with the
//! pipeline. Factories read their arguments through a [`TaskConfig`], which
//! remembers what was read so that unrecognized arguments fail instantiation
//! before anything is wired.

use crate::spec::TaskSpec;
use crate::task::{Task, TaskError};
use indexmap::{IndexMap, IndexSet};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Declaration of a task type: its name and what it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDecl {
    pub name: String,
    pub description: String,
    /// Human-readable port summary, e.g. `entity -> 2×entity`.
    pub ports: String,
    /// Named argument the unnamed default argument stands in for.
    pub default_arg: Option<String>,
}

impl TaskDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            ports: String::new(),
            default_arg: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn ports(mut self, ports: impl Into<String>) -> Self {
        self.ports = ports.into();
        self
    }

    pub fn default_arg(mut self, name: impl Into<String>) -> Self {
        self.default_arg = Some(name.into());
        self
    }
}

/// Instantiates one task type.
pub trait TaskFactory: Send + Sync {
    fn decl(&self) -> &TaskDecl;

    fn create(&self, config: &mut TaskConfig) -> Result<Task, TaskError>;
}

/// A factory built from a declaration and a closure.
pub struct FnFactory<F> {
    decl: TaskDecl,
    create: F,
}

impl<F> FnFactory<F>
where
    F: Fn(&mut TaskConfig) -> Result<Task, TaskError> + Send + Sync,
{
    pub fn new(decl: TaskDecl, create: F) -> Self {
        Self { decl, create }
    }
}

impl<F> TaskFactory for FnFactory<F>
where
    F: Fn(&mut TaskConfig) -> Result<Task, TaskError> + Send + Sync,
{
    fn decl(&self) -> &TaskDecl {
        &self.decl
    }

    fn create(&self, config: &mut TaskConfig) -> Result<Task, TaskError> {
        (self.create)(config)
    }
}

/// Errors from looking up or instantiating a task.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown task type '{name}'{}", suggestion_hint(.suggestion))]
    UnknownTaskType {
        name: String,
        suggestion: Option<String>,
    },

    #[error("task '{task_id}' does not recognize argument(s): {}", .args.join(", "))]
    UnrecognizedArguments { task_id: String, args: Vec<String> },

    #[error("task '{task_id}': {source}")]
    Task {
        task_id: String,
        #[source]
        source: TaskError,
    },
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

/// Argument view handed to a factory.
#[derive(Debug)]
pub struct TaskConfig {
    task_id: String,
    args: IndexMap<String, String>,
    default_arg: Option<String>,
    default_name: Option<String>,
    read: IndexSet<String>,
    default_read: bool,
}

impl TaskConfig {
    pub fn new(spec: &TaskSpec, default_name: Option<&str>) -> Self {
        Self {
            task_id: spec.task_id.clone(),
            args: spec.args.clone(),
            default_arg: spec.default_arg.clone(),
            default_name: default_name.map(String::from),
            read: IndexSet::new(),
            default_read: false,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Raw string value. Falls back to the default argument when `name` is
    /// the argument it stands in for.
    pub fn string(&mut self, name: &str) -> Option<String> {
        if let Some(value) = self.args.get(name) {
            self.read.insert(name.to_string());
            return Some(value.clone());
        }
        if self.default_name.as_deref() == Some(name) && self.default_arg.is_some() {
            self.default_read = true;
            return self.default_arg.clone();
        }
        None
    }

    pub fn string_or(&mut self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or_else(|| default.to_string())
    }

    pub fn required_string(&mut self, name: &str) -> Result<String, TaskError> {
        self.string(name)
            .ok_or_else(|| TaskError::MissingArgument(name.to_string()))
    }

    /// Integer value of any width.
    pub fn int_or<N>(&mut self, name: &str, default: N) -> Result<N, TaskError>
    where
        N: FromStr,
        N::Err: Display,
    {
        self.parse_or(name, default)
    }

    pub fn float_or(&mut self, name: &str, default: f64) -> Result<f64, TaskError> {
        self.parse_or(name, default)
    }

    pub fn bool_or(&mut self, name: &str, default: bool) -> Result<bool, TaskError> {
        match self.string(name) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(TaskError::InvalidArgument {
                    name: name.to_string(),
                    reason: format!("'{}' is not a boolean", value),
                }),
            },
        }
    }

    /// Claim every named argument not read so far.
    pub fn remaining(&mut self) -> IndexMap<String, String> {
        let remaining: IndexMap<String, String> = self
            .args
            .iter()
            .filter(|(key, _)| !self.read.contains(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.read.extend(remaining.keys().cloned());
        remaining
    }

    /// Arguments the factory never looked at.
    pub fn unread(&self) -> Vec<String> {
        let mut unread: Vec<String> = self
            .args
            .keys()
            .filter(|key| !self.read.contains(*key))
            .cloned()
            .collect();
        match &self.default_arg {
            Some(value) if !self.default_read => unread.push(format!("'{}' (unnamed)", value)),
            _ => {}
        }
        unread
    }

    fn parse_or<N>(&mut self, name: &str, default: N) -> Result<N, TaskError>
    where
        N: FromStr,
        N::Err: Display,
    {
        match self.string(name) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: N::Err| TaskError::InvalidArgument {
                name: name.to_string(),
                reason: format!("'{}': {}", value, e),
            }),
        }
    }
}

/// Description of a registered task, for listings.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub ports: String,
}

/// Registry of available task types.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: IndexMap<String, Arc<dyn TaskFactory>>,
    aliases: IndexMap<String, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its declared name, replacing any previous one.
    pub fn register(&mut self, factory: impl TaskFactory + 'static) {
        let name = factory.decl().name.clone();
        self.factories.insert(name, Arc::new(factory));
    }

    /// Register `short` as another name for `name`.
    pub fn alias(&mut self, short: impl Into<String>, name: impl Into<String>) {
        self.aliases.insert(short.into(), name.into());
    }

    /// Look up a factory by name or alias.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskFactory>> {
        let name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.factories.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn describe(&self) -> Vec<TaskDescription> {
        self.factories
            .values()
            .map(|factory| {
                let decl = factory.decl();
                TaskDescription {
                    name: decl.name.clone(),
                    aliases: self
                        .aliases
                        .iter()
                        .filter(|(_, target)| **target == decl.name)
                        .map(|(short, _)| short.clone())
                        .collect(),
                    description: decl.description.clone(),
                    ports: decl.ports.clone(),
                }
            })
            .collect()
    }

    /// Instantiate the task described by `spec`.
    pub fn create(&self, spec: &TaskSpec) -> Result<Task, RegistryError> {
        let factory = self
            .get(&spec.task_type)
            .ok_or_else(|| RegistryError::UnknownTaskType {
                name: spec.task_type.clone(),
                suggestion: self.suggest(&spec.task_type),
            })?;

        let decl = factory.decl();
        let mut config = TaskConfig::new(spec, decl.default_arg.as_deref());
        let task = factory
            .create(&mut config)
            .map_err(|source| RegistryError::Task {
                task_id: spec.task_id.clone(),
                source,
            })?;

        let unread = config.unread();
        if !unread.is_empty() {
            return Err(RegistryError::UnrecognizedArguments {
                task_id: spec.task_id.clone(),
                args: unread,
            });
        }
        Ok(task)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn suggest(&self, name: &str) -> Option<String> {
        find_similar(name, self.factories.keys().chain(self.aliases.keys()))
    }
}

/// Closest candidate within edit distance 2, if any.
pub fn find_similar<'a>(
    input: &str,
    candidates: impl IntoIterator<Item = &'a String>,
) -> Option<String> {
    candidates
        .into_iter()
        .map(|c| (levenshtein(input, c), c))
        .filter(|(d, c)| *d <= 2 && c.as_str() != input)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.clone())
}

/// Simple Levenshtein distance for short strings.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RunnableTask;

    struct Noop;

    impl RunnableTask for Noop {
        fn run(self: Box<Self>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn make_test_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register(FnFactory::new(
            TaskDecl::new("write-state")
                .description("Write a state file")
                .default_arg("file"),
            |config| {
                config.required_string("file")?;
                let _: u64 = config.int_or("sequence", 0)?;
                Ok(Task::Runnable(Box::new(Noop)))
            },
        ));
        registry.register(FnFactory::new(TaskDecl::new("tag-filter"), |config| {
            config.remaining();
            Ok(Task::Runnable(Box::new(Noop)))
        }));
        registry.alias("ws", "write-state");
        registry
    }

    #[test]
    fn test_create_by_alias_with_default_arg() {
        let registry = make_test_registry();
        let spec = TaskSpec::new(1, "ws").default_arg("state.txt");
        let task = registry.create(&spec).unwrap();
        assert!(task.is_active());
    }

    #[test]
    fn test_unrecognized_argument() {
        let registry = make_test_registry();
        let spec = TaskSpec::new(1, "write-state")
            .arg("file", "state.txt")
            .arg("bogus", "1");

        match registry.create(&spec) {
            Err(RegistryError::UnrecognizedArguments { task_id, args }) => {
                assert_eq!(task_id, "1-write-state");
                assert_eq!(args, vec!["bogus".to_string()]);
            }
            other => panic!("expected unrecognized arguments, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unread_default_argument() {
        let registry = make_test_registry();
        let spec = TaskSpec::new(1, "write-state")
            .arg("file", "a.txt")
            .default_arg("b.txt");
        assert!(matches!(
            registry.create(&spec),
            Err(RegistryError::UnrecognizedArguments { .. })
        ));
    }

    #[test]
    fn test_remaining_claims_everything() {
        let registry = make_test_registry();
        let spec = TaskSpec::new(1, "tag-filter")
            .arg("highway", "*")
            .arg("name", "a,b");
        assert!(registry.create(&spec).is_ok());
    }

    #[test]
    fn test_invalid_argument() {
        let registry = make_test_registry();
        let spec = TaskSpec::new(2, "write-state")
            .arg("file", "s")
            .arg("sequence", "seven");
        let err = registry.create(&spec).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Task {
                source: TaskError::InvalidArgument { .. },
                ..
            }
        ));
        assert!(err.to_string().contains("2-write-state"));
    }

    #[test]
    fn test_unknown_type_suggestion() {
        let registry = make_test_registry();
        let err = registry
            .create(&TaskSpec::new(1, "write-stat"))
            .unwrap_err();
        match err {
            RegistryError::UnknownTaskType { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("write-state"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_describe_lists_aliases() {
        let registry = make_test_registry();
        let described = registry.describe();
        assert_eq!(described.len(), 2);
        assert_eq!(described[0].name, "write-state");
        assert_eq!(described[0].aliases, vec!["ws".to_string()]);
    }

    #[test]
    fn test_bool_parsing() {
        let spec = TaskSpec::new(1, "x").arg("flag", "yes").arg("bad", "maybe");
        let mut config = TaskConfig::new(&spec, None);
        assert!(config.bool_or("flag", false).unwrap());
        assert!(config.bool_or("missing", true).unwrap());
        assert!(config.bool_or("bad", false).is_err());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("tee", "tee"), 0);
        assert_eq!(levenshtein("tee", "teee"), 1);
        assert_eq!(levenshtein("abc", "xyz"), 3);
    }
}
