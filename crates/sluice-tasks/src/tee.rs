//! Fan one stream out to several consumers.

use rhi_sluice_core::{
    AnySink, Metadata, Output, Outputs, Record, Sink, SinkSource, StreamKind, TaskError,
};

/// Passive tee: every record is cloned into each output, in slot order.
pub struct Tee<T> {
    outputs: Vec<Output<T>>,
}

impl<T: Record> Tee<T> {
    pub fn new(count: usize) -> Self {
        Self {
            outputs: (0..count).map(|_| Output::new()).collect(),
        }
    }
}

impl<T: Record> Outputs for Tee<T> {
    fn output_kinds(&self) -> Vec<StreamKind> {
        vec![T::KIND; self.outputs.len()]
    }

    fn set_sink(&mut self, slot: usize, sink: AnySink) -> Result<(), TaskError> {
        let count = self.outputs.len();
        self.outputs
            .get_mut(slot)
            .ok_or(TaskError::NoSuchSlot { slot, count })?
            .bind(slot, sink)
    }
}

impl<T: Record + Clone> SinkSource for Tee<T> {
    fn input_kind(&self) -> StreamKind {
        T::KIND
    }

    fn into_sink(self: Box<Self>) -> AnySink {
        T::into_any(self)
    }
}

impl<T: Record + Clone> Sink<T> for Tee<T> {
    fn initialize(&mut self, metadata: &Metadata) -> Result<(), TaskError> {
        for (slot, output) in self.outputs.iter_mut().enumerate() {
            output.sink(slot)?.initialize(metadata)?;
        }
        Ok(())
    }

    fn process(&mut self, record: T) -> Result<(), TaskError> {
        let last = self.outputs.len().saturating_sub(1);
        let mut record = Some(record);
        for (slot, output) in self.outputs.iter_mut().enumerate() {
            let copy = if slot == last {
                record.take()
            } else {
                record.clone()
            };
            if let Some(copy) = copy {
                output.sink(slot)?.process(copy)?;
            }
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TaskError> {
        for (slot, output) in self.outputs.iter_mut().enumerate() {
            output.sink(slot)?.complete()?;
        }
        Ok(())
    }

    fn release(&mut self) {
        for output in &mut self.outputs {
            output.release();
        }
    }
}
