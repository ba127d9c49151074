//! Progress logging, entity reports and null sinks.

use crate::filter::entity_filter;
use rhi_sluice_core::{
    EntityContainer, EntityType, Metadata, Output, Sink, TaskError, log_release_error,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Passes records through, logging a line every `interval` records.
pub struct LogProgress {
    interval: u64,
    count: u64,
    started_at: Instant,
    output: Output<EntityContainer>,
}

impl LogProgress {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            count: 0,
            started_at: Instant::now(),
            output: Output::new(),
        }
    }

    fn rate(&self) -> f64 {
        let secs = self.started_at.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        }
    }
}

entity_filter!(LogProgress);

impl Sink<EntityContainer> for LogProgress {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError> {
        self.started_at = Instant::now();
        self.output.sink(0)?.initialize(metadata)
    }

    fn process(&mut self, record: EntityContainer) -> Result<(), TaskError> {
        self.count += 1;
        if self.count % self.interval == 0 {
            info!(
                records = self.count,
                current = %format!("{} {}", record.entity.entity_type(), record.entity.id()),
                per_second = self.rate() as u64,
                "progress"
            );
        }
        self.output.sink(0)?.process(record)
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        info!(
            records = self.count,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "processing complete"
        );
        self.output.sink(0)?.complete()
    }

    fn release(&mut self) {
        self.output.release();
    }
}

/// Entity counts per type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub bounds: u64,
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

impl EntityCounts {
    pub fn add(&mut self, entity_type: EntityType) {
        match entity_type {
            EntityType::Bound => self.bounds += 1,
            EntityType::Node => self.nodes += 1,
            EntityType::Way => self.ways += 1,
            EntityType::Relation => self.relations += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.bounds + self.nodes + self.ways + self.relations
    }

    /// Plain-text report, one `name: count` line per type.
    pub fn render(&self) -> String {
        format!(
            "bounds: {}\nnodes: {}\nways: {}\nrelations: {}\ntotal: {}\n",
            self.bounds,
            self.nodes,
            self.ways,
            self.relations,
            self.total()
        )
    }
}

/// Counts entities by type and reports on `complete`: to `file` if given,
/// otherwise to the log.
pub struct ReportEntity {
    file: Option<PathBuf>,
    counts: EntityCounts,
}

impl ReportEntity {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            file,
            counts: EntityCounts::default(),
        }
    }
}

impl Sink<EntityContainer> for ReportEntity {
    fn initialize(&mut self, _metadata: &Metadata) -> Result<(), TaskError> {
        Ok(())
    }

    fn process(&mut self, record: EntityContainer) -> Result<(), TaskError> {
        self.counts.add(record.entity.entity_type());
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        match &self.file {
            Some(path) => {
                let mut writer = BufWriter::new(File::create(path)?);
                writer.write_all(self.counts.render().as_bytes())?;
                writer.flush()?;
            }
            None => info!(
                bounds = self.counts.bounds,
                nodes = self.counts.nodes,
                ways = self.counts.ways,
                relations = self.counts.relations,
                "entity report"
            ),
        }
        Ok(())
    }

    fn release(&mut self) {}
}

/// Discards everything.
pub struct NullSink<T> {
    _record: PhantomData<fn(T)>,
}

impl<T> Default for NullSink<T> {
    fn default() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T: Send> Sink<T> for NullSink<T> {
    fn initialize(&mut self, _metadata: &Metadata) -> Result<(), TaskError> {
        Ok(())
    }

    fn process(&mut self, _record: T) -> Result<(), TaskError> {
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// Writes `sequenceNumber=<n>` to a state file, for replication tooling
/// that tracks how far a run got.
pub struct WriteState {
    path: PathBuf,
    sequence: u64,
}

impl WriteState {
    pub fn new(path: impl Into<PathBuf>, sequence: u64) -> Self {
        Self {
            path: path.into(),
            sequence,
        }
    }
}

impl rhi_sluice_core::RunnableTask for WriteState {
    fn run(self: Box<Self>) -> Result<(), TaskError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writeln!(writer, "sequenceNumber={}", self.sequence)?;
            writer.flush()?;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                log_release_error(&tmp.display().to_string(), &cleanup);
            }
            return Err(e.into());
        }
        info!(path = %self.path.display(), sequence = self.sequence, "state written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CollectingSink, node, way};
    use rhi_sluice_core::{Outputs, RunnableTask};

    #[test]
    fn test_log_progress_passes_through() {
        let collected = CollectingSink::default();
        let mut progress = LogProgress::new(2);
        progress.set_sink(0, collected.boxed()).unwrap();

        progress.initialize(&Metadata::new()).unwrap();
        for id in 1..=5 {
            progress.process(node(id)).unwrap();
        }
        progress.complete().unwrap();

        assert_eq!(collected.ids(), vec![1, 2, 3, 4, 5]);
        assert!(collected.completed());
    }

    #[test]
    fn test_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");

        let mut report = ReportEntity::new(Some(path.clone()));
        report.initialize(&Metadata::new()).unwrap();
        for record in [node(1), node(2), way(3)] {
            report.process(record).unwrap();
        }
        report.complete().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("nodes: 2\n"));
        assert!(text.contains("ways: 1\n"));
        assert!(text.contains("total: 3\n"));
    }

    #[test]
    fn test_write_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.txt");

        Box::new(WriteState::new(&path, 42)).run().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "sequenceNumber=42\n"
        );
        assert!(!path.with_extension("tmp").exists());
    }
}
