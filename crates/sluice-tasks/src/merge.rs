//! Merge two sorted entity streams into one.

use rhi_sluice_core::postbox::{self, PostboxReceiver, PostboxSender};
use rhi_sluice_core::{
    AnySink, EntityContainer, Output, Outputs, RunnableSinkSource, Sink, SinkGuard,
    StreamKind, TaskError,
};
use std::cmp::Ordering;
use std::str::FromStr;

/// Which record wins when both inputs carry the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the higher version; on a tie keep the second input's.
    Version,
    /// Always keep the second input's.
    LastSource,
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "version" => Ok(ConflictResolution::Version),
            "lastSource" => Ok(ConflictResolution::LastSource),
            other => Err(format!("unknown conflict resolution '{}'", other)),
        }
    }
}

/// Active two-way merge. Both inputs must be sorted type-then-id.
pub struct Merge {
    inputs: Vec<PostboxSender<EntityContainer>>,
    receivers: [PostboxReceiver<EntityContainer>; 2],
    output: Output<EntityContainer>,
    resolution: ConflictResolution,
}

impl Merge {
    pub fn new(resolution: ConflictResolution, capacity: usize) -> Self {
        let (first_tx, first_rx) = postbox::channel(capacity);
        let (second_tx, second_rx) = postbox::channel(capacity);
        Self {
            inputs: vec![first_tx, second_tx],
            receivers: [first_rx, second_rx],
            output: Output::new(),
            resolution,
        }
    }
}

impl Outputs for Merge {
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

impl RunnableSinkSource for Merge {
    fn input_kinds(&self) -> Vec<StreamKind> {
        vec![StreamKind::Entity; 2]
    }

    fn take_inputs(&mut self) -> Vec<AnySink> {
        self.inputs
            .drain(..)
            .map(|sender| AnySink::Entity(Box::new(sender)))
            .collect()
    }

    fn run(self: Box<Self>) -> Result<(), TaskError> {
        let Merge {
            receivers: [mut first, mut second],
            mut output,
            resolution,
            ..
        } = *self;

        let mut metadata = first.wait_initialize()?;
        for (key, value) in second.wait_initialize()? {
            metadata.entry(key).or_insert(value);
        }

        let sink = output.sink(0)?;
        sink.initialize(&metadata)?;

        let mut left = Sorted::new(0);
        let mut right = Sorted::new(1);
        let mut a = left.next(&mut first)?;
        let mut b = right.next(&mut second)?;

        loop {
            match (a.take(), b.take()) {
                (None, None) => break,
                (Some(x), None) => {
                    sink.process(x)?;
                    a = left.next(&mut first)?;
                }
                (None, Some(y)) => {
                    sink.process(y)?;
                    b = right.next(&mut second)?;
                }
                (Some(x), Some(y)) => match x.entity.compare_type_then_id(&y.entity) {
                    Ordering::Less if !same_entity(&x, &y) => {
                        sink.process(x)?;
                        a = left.next(&mut first)?;
                        b = Some(y);
                    }
                    Ordering::Greater if !same_entity(&x, &y) => {
                        sink.process(y)?;
                        b = right.next(&mut second)?;
                        a = Some(x);
                    }
                    _ => {
                        emit_winner(sink, resolution, x, y)?;
                        a = left.next(&mut first)?;
                        b = right.next(&mut second)?;
                    }
                },
            }
        }

        sink.complete()
    }
}

fn same_entity(x: &EntityContainer, y: &EntityContainer) -> bool {
    x.entity.entity_type() == y.entity.entity_type() && x.entity.id() == y.entity.id()
}

fn emit_winner(
    sink: &mut SinkGuard<EntityContainer>,
    resolution: ConflictResolution,
    first: EntityContainer,
    second: EntityContainer,
) -> Result<(), TaskError> {
    let winner = match resolution {
        ConflictResolution::Version if first.entity.version() > second.entity.version() => first,
        _ => second,
    };
    sink.process(winner)
}

/// Pulls from one input and checks it stays sorted.
struct Sorted {
    input: usize,
    last: Option<EntityContainer>,
}

impl Sorted {
    fn new(input: usize) -> Self {
        Self { input, last: None }
    }

    fn next(
        &mut self,
        receiver: &mut PostboxReceiver<EntityContainer>,
    ) -> Result<Option<EntityContainer>, TaskError> {
        let Some(record) = receiver.recv()? else {
            return Ok(None);
        };
        if let Some(last) = &self.last {
            if last.entity.compare_type_then_id(&record.entity) == Ordering::Greater {
                return Err(TaskError::Failed(format!(
                    "merge input {} is not sorted: {} {} follows {} {}",
                    self.input,
                    record.entity.entity_type(),
                    record.entity.id(),
                    last.entity.entity_type(),
                    last.entity.id()
                )));
            }
        }
        self.last = Some(record.clone());
        Ok(Some(record))
    }
}
