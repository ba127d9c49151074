//! In-memory entity sort.

use rhi_sluice_core::{
    AnySink, Entity, EntityContainer, Metadata, Output, Outputs, Sink, SinkSource, StreamKind,
    TaskError,
};
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    TypeThenId,
    IdThenType,
}

impl SortOrder {
    fn compare(self, a: &Entity, b: &Entity) -> Ordering {
        match self {
            SortOrder::TypeThenId => a.compare_type_then_id(b),
            SortOrder::IdThenType => a.compare_id_then_type(b),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TypeThenId" => Ok(SortOrder::TypeThenId),
            "IdThenType" => Ok(SortOrder::IdThenType),
            other => Err(format!("unknown sort order '{}'", other)),
        }
    }
}

/// Holds the whole stream until `complete`, then emits it in order.
pub struct Sort {
    order: SortOrder,
    records: Vec<EntityContainer>,
    output: Output<EntityContainer>,
}

impl Sort {
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            records: Vec::new(),
            output: Output::new(),
        }
    }
}

impl Outputs for Sort {
    fn output_kinds(&self) -> Vec<StreamKind> {
        vec![StreamKind::Entity]
    }

    fn set_sink(&mut self, slot: usize, sink: AnySink) -> Result<(), TaskError> {
        if slot != 0 {
            return Err(TaskError::NoSuchSlot { slot, count: 1 });
        }
        self.output.bind(slot, sink)
    }
}

impl SinkSource for Sort {
    fn input_kind(&self) -> StreamKind {
        StreamKind::Entity
    }

    fn into_sink(self: Box<Self>) -> AnySink {
        AnySink::Entity(self)
    }
}

impl Sink<EntityContainer> for Sort {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError> {
        self.output.sink(0)?.initialize(metadata)
    }

    fn process(&mut self, record: EntityContainer) -> Result<(), TaskError> {
        self.records.push(record);
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        let order = self.order;
        // Stable, so equal keys keep arrival order.
        self.records
            .sort_by(|a, b| order.compare(&a.entity, &b.entity));

        let sink = self.output.sink(0)?;
        for record in self.records.drain(..) {
            sink.process(record)?;
        }
        sink.complete()
    }

    fn release(&mut self) {
        self.records.clear();
        self.output.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CollectingSink, node, way};

    #[test]
    fn test_type_then_id() {
        let collected = CollectingSink::default();
        let mut sort = Sort::new(SortOrder::TypeThenId);
        sort.set_sink(0, collected.boxed()).unwrap();

        sort.initialize(&Metadata::new()).unwrap();
        for record in [way(1), node(9), node(3)] {
            sort.process(record).unwrap();
        }
        assert!(collected.ids().is_empty());
        sort.complete().unwrap();

        assert_eq!(collected.ids(), vec![3, 9, 1]);
    }

    #[test]
    fn test_id_then_type() {
        let collected = CollectingSink::default();
        let mut sort = Sort::new("IdThenType".parse().unwrap());
        sort.set_sink(0, collected.boxed()).unwrap();

        sort.initialize(&Metadata::new()).unwrap();
        for record in [way(1), node(9), node(3)] {
            sort.process(record).unwrap();
        }
        sort.complete().unwrap();

        assert_eq!(collected.ids(), vec![1, 3, 9]);
    }
}
