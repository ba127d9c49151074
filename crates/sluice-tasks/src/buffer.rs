//! Decouple a producer from its consumer with a bounded postbox.

use rhi_sluice_core::postbox::{self, PostboxReceiver, PostboxSender};
use rhi_sluice_core::{
    AnySink, Output, Outputs, Record, RunnableSinkSource, Sink, StreamKind, TaskError,
};
use tracing::debug;

/// Runs its downstream chain on a thread of its own, fed through a postbox
/// of `capacity` records.
pub struct Buffer<T> {
    input: Option<PostboxSender<T>>,
    receiver: PostboxReceiver<T>,
    output: Output<T>,
}

impl<T: Record> Buffer<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = postbox::channel(capacity);
        Self {
            input: Some(sender),
            receiver,
            output: Output::new(),
        }
    }
}

impl<T: Record> Outputs for Buffer<T> {
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

impl<T: Record> RunnableSinkSource for Buffer<T> {
    fn input_kinds(&self) -> Vec<StreamKind> {
        vec![T::KIND]
    }

    fn take_inputs(&mut self) -> Vec<AnySink> {
        self.input
            .take()
            .map(|sender| T::into_any(Box::new(sender)))
            .into_iter()
            .collect()
    }

    fn run(self: Box<Self>) -> Result<(), TaskError> {
        let Buffer {
            mut receiver,
            mut output,
            ..
        } = *self;

        let metadata = receiver.wait_initialize()?;
        let sink = output.sink(0)?;
        sink.initialize(&metadata)?;

        while let Some(record) = receiver.recv()? {
            sink.process(record)?;
        }
        sink.complete()?;

        debug!(peak = receiver.peak_buffered(), "buffer drained");
        Ok(())
    }
}
