//! Bundled tasks for Sluice.
//!
//! Readers and writers for JSON-lines files, stream plumbing (tee, buffer,
//! merge), entity filters and reporting sinks. Everything is made available
//! to a pipeline through [`register_all`].

mod buffer;
mod filter;
mod json;
mod merge;
mod report;
mod sort;
mod tee;

#[cfg(test)]
mod testing;

pub use buffer::Buffer;
pub use filter::{BoundingBox, Extent, TagFilter, TagFilterMode, TagPattern};
pub use json::{JsonReader, JsonWriter};
pub use merge::{ConflictResolution, Merge};
pub use report::{EntityCounts, LogProgress, NullSink, ReportEntity, WriteState};
pub use sort::{Sort, SortOrder};
pub use tee::Tee;

use rhi_sluice_core::postbox::DEFAULT_CAPACITY;
use rhi_sluice_core::{
    AnySink, ChangeContainer, EntityContainer, FnFactory, Task, TaskConfig, TaskDecl, TaskError,
    TaskRegistry,
};
use std::path::PathBuf;
use std::str::FromStr;

/// Register every bundled task, with its short alias, in `registry`.
pub fn register_all(registry: &mut TaskRegistry) {
    register_io(registry);
    register_plumbing(registry);
    register_filters(registry);
    register_reports(registry);
}

fn register_io(registry: &mut TaskRegistry) {
    registry.register(FnFactory::new(
        TaskDecl::new("read-json")
            .description("Read entities from a JSON-lines file")
            .ports("-> entity")
            .default_arg("file"),
        |config| {
            let file = config.required_string("file")?;
            Ok(Task::Source(Box::new(JsonReader::<EntityContainer>::new(file))))
        },
    ));
    registry.alias("rj", "read-json");

    registry.register(FnFactory::new(
        TaskDecl::new("write-json")
            .description("Write entities to a JSON-lines file")
            .ports("entity ->")
            .default_arg("file"),
        |config| {
            let file = config.required_string("file")?;
            Ok(Task::Sink(AnySink::Entity(Box::new(
                JsonWriter::<EntityContainer>::new(file),
            ))))
        },
    ));
    registry.alias("wj", "write-json");

    registry.register(FnFactory::new(
        TaskDecl::new("read-change-json")
            .description("Read changes from a JSON-lines file")
            .ports("-> change")
            .default_arg("file"),
        |config| {
            let file = config.required_string("file")?;
            Ok(Task::Source(Box::new(JsonReader::<ChangeContainer>::new(file))))
        },
    ));
    registry.alias("rcj", "read-change-json");

    registry.register(FnFactory::new(
        TaskDecl::new("write-change-json")
            .description("Write changes to a JSON-lines file")
            .ports("change ->")
            .default_arg("file"),
        |config| {
            let file = config.required_string("file")?;
            Ok(Task::Sink(AnySink::Change(Box::new(
                JsonWriter::<ChangeContainer>::new(file),
            ))))
        },
    ));
    registry.alias("wcj", "write-change-json");
}

fn register_plumbing(registry: &mut TaskRegistry) {
    registry.register(FnFactory::new(
        TaskDecl::new("tee")
            .description("Copy an entity stream to several outputs")
            .ports("entity -> N×entity"),
        |config| {
            let count = positive(config, "outputCount", 2)?;
            Ok(Task::SinkSource(Box::new(Tee::<EntityContainer>::new(count))))
        },
    ));
    registry.alias("t", "tee");

    registry.register(FnFactory::new(
        TaskDecl::new("tee-change")
            .description("Copy a change stream to several outputs")
            .ports("change -> N×change"),
        |config| {
            let count = positive(config, "outputCount", 2)?;
            Ok(Task::SinkSource(Box::new(Tee::<ChangeContainer>::new(count))))
        },
    ));
    registry.alias("tc", "tee-change");

    registry.register(FnFactory::new(
        TaskDecl::new("buffer")
            .description("Run downstream entity tasks on a separate thread")
            .ports("entity -> entity"),
        |config| {
            let capacity = positive(config, "bufferCapacity", DEFAULT_CAPACITY)?;
            Ok(Task::RunnableSinkSource(Box::new(
                Buffer::<EntityContainer>::new(capacity),
            )))
        },
    ));
    registry.alias("b", "buffer");

    registry.register(FnFactory::new(
        TaskDecl::new("buffer-change")
            .description("Run downstream change tasks on a separate thread")
            .ports("change -> change"),
        |config| {
            let capacity = positive(config, "bufferCapacity", DEFAULT_CAPACITY)?;
            Ok(Task::RunnableSinkSource(Box::new(
                Buffer::<ChangeContainer>::new(capacity),
            )))
        },
    ));
    registry.alias("bc", "buffer-change");

    registry.register(FnFactory::new(
        TaskDecl::new("merge")
            .description("Merge two sorted entity streams")
            .ports("2×entity -> entity"),
        |config| {
            let resolution: ConflictResolution =
                parsed(config, "conflictResolution", "version")?;
            let capacity = positive(config, "bufferCapacity", DEFAULT_CAPACITY)?;
            Ok(Task::RunnableSinkSource(Box::new(Merge::new(
                resolution, capacity,
            ))))
        },
    ));
    registry.alias("m", "merge");
}

fn register_filters(registry: &mut TaskRegistry) {
    registry.register(FnFactory::new(
        TaskDecl::new("sort")
            .description("Sort an entity stream in memory")
            .ports("entity -> entity"),
        |config| {
            let order: SortOrder = parsed(config, "type", "TypeThenId")?;
            Ok(Task::SinkSource(Box::new(Sort::new(order))))
        },
    ));
    registry.alias("s", "sort");

    registry.register(FnFactory::new(
        TaskDecl::new("bounding-box")
            .description("Keep entities inside a geographic extent")
            .ports("entity -> entity"),
        |config| {
            let extent = Extent::new(
                config.float_or("left", -180.0)?,
                config.float_or("right", 180.0)?,
                config.float_or("top", 90.0)?,
                config.float_or("bottom", -90.0)?,
            )?;
            Ok(Task::SinkSource(Box::new(BoundingBox::new(extent))))
        },
    ));
    registry.alias("bb", "bounding-box");

    registry.register(FnFactory::new(
        TaskDecl::new("tag-filter")
            .description("Accept or reject entities of one type by tag")
            .ports("entity -> entity")
            .default_arg("mode"),
        |config| {
            let mode: TagFilterMode =
                parse_value("mode", &config.required_string("mode")?)?;
            let patterns = config
                .remaining()
                .into_iter()
                .map(|(key, value)| (key, TagPattern::parse(&value)))
                .collect();
            Ok(Task::SinkSource(Box::new(TagFilter::new(mode, patterns))))
        },
    ));
    registry.alias("tf", "tag-filter");
}

fn register_reports(registry: &mut TaskRegistry) {
    registry.register(FnFactory::new(
        TaskDecl::new("log-progress")
            .description("Log throughput while passing entities through")
            .ports("entity -> entity"),
        |config| {
            let interval = positive(config, "interval", 1000u64)?;
            Ok(Task::SinkSource(Box::new(LogProgress::new(interval))))
        },
    ));
    registry.alias("lp", "log-progress");

    registry.register(FnFactory::new(
        TaskDecl::new("report-entity")
            .description("Count entities by type")
            .ports("entity ->")
            .default_arg("file"),
        |config| {
            let file = config.string("file").map(PathBuf::from);
            Ok(Task::Sink(AnySink::Entity(Box::new(ReportEntity::new(file)))))
        },
    ));
    registry.alias("re", "report-entity");

    registry.register(FnFactory::new(
        TaskDecl::new("null")
            .description("Discard an entity stream")
            .ports("entity ->"),
        |_| Ok(Task::Sink(AnySink::Entity(Box::<NullSink<EntityContainer>>::default()))),
    ));
    registry.alias("n", "null");

    registry.register(FnFactory::new(
        TaskDecl::new("null-change")
            .description("Discard a change stream")
            .ports("change ->"),
        |_| Ok(Task::Sink(AnySink::Change(Box::<NullSink<ChangeContainer>>::default()))),
    ));
    registry.alias("nc", "null-change");

    registry.register(FnFactory::new(
        TaskDecl::new("write-state")
            .description("Write a replication sequence number to a state file")
            .ports("-")
            .default_arg("file"),
        |config| {
            let file = config.required_string("file")?;
            let sequence = config.int_or("sequence", 0u64)?;
            Ok(Task::Runnable(Box::new(WriteState::new(file, sequence))))
        },
    ));
    registry.alias("ws", "write-state");
}

/// Integer argument that must be at least 1.
fn positive<N>(config: &mut TaskConfig, name: &str, default: N) -> Result<N, TaskError>
where
    N: FromStr + PartialOrd + From<u8> + std::fmt::Display,
    N::Err: std::fmt::Display,
{
    let value = config.int_or(name, default)?;
    if value < N::from(1) {
        return Err(TaskError::InvalidArgument {
            name: name.to_string(),
            reason: format!("must be at least 1, got {}", value),
        });
    }
    Ok(value)
}

/// Enumerated argument parsed through `FromStr`.
fn parsed<T>(config: &mut TaskConfig, name: &str, default: &str) -> Result<T, TaskError>
where
    T: FromStr<Err = String>,
{
    parse_value(name, &config.string_or(name, default))
}

fn parse_value<T>(name: &str, value: &str) -> Result<T, TaskError>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|reason| TaskError::InvalidArgument {
        name: name.to_string(),
        reason,
    })
}
