//! JSON-lines readers and writers.
//!
//! One record per line: entities as `{"type": "node", ...}`, changes as
//! `{"action": "create", "entity": {...}}`. Blank lines are skipped.

use rhi_sluice_core::{
    AnySink, Metadata, MetadataExt, Output, Outputs, Record, RunnableSource, Sink, StreamKind,
    TaskError, log_release_error,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing::debug;

/// Reads a JSON-lines file and emits every record.
pub struct JsonReader<T> {
    path: PathBuf,
    output: Output<T>,
}

impl<T: Record> JsonReader<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output: Output::new(),
        }
    }
}

impl<T: Record> Outputs for JsonReader<T> {
    fn output_kinds(&self) -> Vec<StreamKind> {
        vec![T::KIND]
    }

    fn set_sink(&mut self, slot: usize, sink: AnySink) -> Result<(), TaskError> {
        if slot != 0 {
            return Err(TaskError::NoSuchSlot { slot, count: 1 });
        }
        self.output.bind(slot, sink)
    }
}

impl<T: Record + DeserializeOwned> RunnableSource for JsonReader<T> {
    fn run(mut self: Box<Self>) -> Result<(), TaskError> {
        let file = File::open(&self.path)?;
        let source = self.path.display().to_string();
        let sink = self.output.sink(0)?;
        sink.initialize(&Metadata::new().with("source", source.as_str()))?;

        let mut count = 0u64;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: T = serde_json::from_str(&line)
                .map_err(|e| TaskError::Parse(format!("{}:{}: {}", source, index + 1, e)))?;
            sink.process(record)?;
            count += 1;
        }

        debug!(source = %source, records = count, "finished reading");
        sink.complete()
    }
}

/// Writes every record it receives as one JSON line.
///
/// The file is created on `initialize`, flushed on `complete` and closed on
/// `release`.
pub struct JsonWriter<T> {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    _record: std::marker::PhantomData<fn(T)>,
}

impl<T> JsonWriter<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            _record: std::marker::PhantomData,
        }
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, TaskError> {
        if self.writer.is_none() {
            let file = File::create(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| TaskError::Failed("writer unavailable".into()))
    }
}

impl<T: Record + Serialize> Sink<T> for JsonWriter<T> {
    fn initialize(&mut self, _metadata: &Metadata) -> Result<(), TaskError> {
        self.writer()?;
        Ok(())
    }

    fn process(&mut self, record: T) -> Result<(), TaskError> {
        let writer = self.writer()?;
        serde_json::to_writer(&mut *writer, &record)
            .map_err(|e| TaskError::Other(Box::new(e)))?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        self.writer()?.flush()?;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                log_release_error(&self.path.display().to_string(), &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhi_sluice_core::{Entity, EntityContainer, Node};

    #[test]
    fn test_writer_creates_file_on_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let mut writer: JsonWriter<EntityContainer> = JsonWriter::new(&path);
        assert!(!path.exists());
        writer.initialize(&Metadata::new()).unwrap();
        writer
            .process(EntityContainer::new(Entity::Node(Node {
                id: 7,
                version: 2,
                tags: Vec::new(),
                lat: 1.0,
                lon: 2.0,
            })))
            .unwrap();
        writer.complete().unwrap();
        writer.release();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("{\"type\":\"node\",\"id\":7"));
    }
}
