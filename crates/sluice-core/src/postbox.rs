//! Postbox: bounded, chunked handoff of a record stream between two threads.
//!
//! One producer thread writes through a [`PostboxSender`], one consumer thread
//! reads through a [`PostboxReceiver`]. Each end stages records in a private
//! list and only touches the shared list (under the mutex) once per chunk, so
//! lock traffic is amortized over many records while memory stays bounded by
//! `capacity + 2 * chunk_size`.
//!
//! Failure flows both ways:
//! - the producer releasing without completing makes the consumer fail with
//!   [`PostboxError::UpstreamAborted`];
//! - the consumer signalling failure (or being dropped early) makes every
//!   pending and future producer write fail with
//!   [`PostboxError::DownstreamFailed`].

use crate::metadata::Metadata;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::warn;

/// Capacity used by buffering tasks when none is configured.
pub const DEFAULT_CAPACITY: usize = 100;

/// Errors raised by either end of a postbox.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostboxError {
    #[error("downstream consumer failed; no further records are accepted")]
    DownstreamFailed,

    #[error("upstream producer released the stream without completing it")]
    UpstreamAborted,

    #[error("next() called without a staged record; call has_next() first")]
    NoRecordStaged,

    #[error("postbox already closed by the producer")]
    Closed,
}

/// State guarded by the mutex.
struct State<T> {
    central: Vec<T>,
    metadata: Option<Metadata>,
    producer_done: bool,
    released_without_completion: bool,
}

struct Shared<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    changed: Condvar,
    /// Mirrors the flag in `State` so `put` can fail fast without locking.
    consumer_failed: AtomicBool,
    /// Largest size the central list ever reached.
    peak: AtomicUsize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("postbox lock poisoned by a panicking peer; recovering");
            poisoned.into_inner()
        })
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State<T>>) -> MutexGuard<'a, State<T>> {
        self.changed.wait(guard).unwrap_or_else(|poisoned| {
            warn!("postbox wait interrupted by a panicking peer; retrying");
            poisoned.into_inner()
        })
    }
}

/// Create a postbox holding at most `capacity` records in its shared list.
///
/// The chunk size is derived as `capacity / 4`, minimum 1.
pub fn channel<T>(capacity: usize) -> (PostboxSender<T>, PostboxReceiver<T>) {
    let capacity = capacity.max(1);
    channel_with_chunk_size(capacity, capacity / 4)
}

/// Create a postbox with an explicit chunk size (clamped to `1..=capacity`).
pub fn channel_with_chunk_size<T>(
    capacity: usize,
    chunk_size: usize,
) -> (PostboxSender<T>, PostboxReceiver<T>) {
    let capacity = capacity.max(1);
    let chunk_size = chunk_size.clamp(1, capacity);

    let shared = Arc::new(Shared {
        capacity,
        state: Mutex::new(State {
            central: Vec::with_capacity(capacity),
            metadata: None,
            producer_done: false,
            released_without_completion: false,
        }),
        changed: Condvar::new(),
        consumer_failed: AtomicBool::new(false),
        peak: AtomicUsize::new(0),
    });

    let sender = PostboxSender {
        shared: Arc::clone(&shared),
        inbound: Vec::with_capacity(chunk_size),
        chunk_size,
        completed: false,
        released: false,
    };
    let receiver = PostboxReceiver {
        shared,
        outbound: VecDeque::new(),
        finished: false,
    };

    (sender, receiver)
}

/// Producer half of a postbox.
pub struct PostboxSender<T> {
    shared: Arc<Shared<T>>,
    inbound: Vec<T>,
    chunk_size: usize,
    completed: bool,
    released: bool,
}

impl<T> std::fmt::Debug for PostboxSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostboxSender")
            .field("capacity", &self.shared.capacity)
            .field("chunk_size", &self.chunk_size)
            .field("staged", &self.inbound.len())
            .field("completed", &self.completed)
            .finish()
    }
}

impl<T> PostboxSender<T> {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Hand the stream metadata to the consumer. Call once, before any `put`.
    pub fn initialize(&mut self, metadata: Metadata) -> Result<(), PostboxError> {
        self.ensure_open()?;
        let mut state = self.shared.lock();
        if self.shared.consumer_failed.load(Ordering::Acquire) {
            return Err(PostboxError::DownstreamFailed);
        }
        state.metadata = Some(metadata);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Stage one record, flushing a full chunk into the shared list.
    ///
    /// Blocks while the shared list has no room for the chunk.
    pub fn put(&mut self, record: T) -> Result<(), PostboxError> {
        self.ensure_open()?;
        if self.shared.consumer_failed.load(Ordering::Acquire) {
            return Err(PostboxError::DownstreamFailed);
        }

        self.inbound.push(record);
        if self.inbound.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush staged records and mark the stream finished.
    pub fn complete(&mut self) -> Result<(), PostboxError> {
        self.ensure_open()?;
        self.flush()?;

        let mut state = self.shared.lock();
        state.producer_done = true;
        self.completed = true;
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Give up the producer end. Never fails; idempotent.
    ///
    /// If `complete` was never reached the consumer sees
    /// [`PostboxError::UpstreamAborted`].
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inbound.clear();

        if !self.completed {
            let mut state = self.shared.lock();
            state.released_without_completion = true;
            self.shared.changed.notify_all();
        }
    }

    /// Largest number of records the shared list has held.
    pub fn peak_buffered(&self) -> usize {
        self.shared.peak.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), PostboxError> {
        if self.completed || self.released {
            Err(PostboxError::Closed)
        } else {
            Ok(())
        }
    }

    fn flush(&mut self) -> Result<(), PostboxError> {
        let mut state = self.shared.lock();
        loop {
            if self.shared.consumer_failed.load(Ordering::Acquire) {
                return Err(PostboxError::DownstreamFailed);
            }
            if state.central.len() + self.inbound.len() <= self.shared.capacity {
                break;
            }
            state = self.shared.wait(state);
        }

        if !self.inbound.is_empty() {
            state.central.append(&mut self.inbound);
            self.shared
                .peak
                .fetch_max(state.central.len(), Ordering::Relaxed);
            self.shared.changed.notify_all();
        }
        Ok(())
    }
}

impl<T> Drop for PostboxSender<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Consumer half of a postbox.
pub struct PostboxReceiver<T> {
    shared: Arc<Shared<T>>,
    outbound: VecDeque<T>,
    finished: bool,
}

impl<T> std::fmt::Debug for PostboxReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostboxReceiver")
            .field("capacity", &self.shared.capacity)
            .field("staged", &self.outbound.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl<T> PostboxReceiver<T> {
    /// Block until the producer has initialized the stream.
    ///
    /// A producer that completes without initializing yields empty metadata.
    pub fn wait_initialize(&mut self) -> Result<Metadata, PostboxError> {
        let mut state = self.shared.lock();
        loop {
            if let Some(metadata) = state.metadata.take() {
                return Ok(metadata);
            }
            if state.released_without_completion {
                return Err(PostboxError::UpstreamAborted);
            }
            if state.producer_done {
                return Ok(Metadata::new());
            }
            state = self.shared.wait(state);
        }
    }

    /// Whether another record is available, blocking until one arrives or the
    /// stream ends.
    pub fn has_next(&mut self) -> Result<bool, PostboxError> {
        if !self.outbound.is_empty() {
            return Ok(true);
        }
        if self.finished {
            return Ok(false);
        }

        let mut state = self.shared.lock();
        loop {
            if state.released_without_completion {
                return Err(PostboxError::UpstreamAborted);
            }
            if !state.central.is_empty() {
                self.outbound.extend(state.central.drain(..));
                self.shared.changed.notify_all();
                return Ok(true);
            }
            if state.producer_done {
                self.finished = true;
                return Ok(false);
            }
            state = self.shared.wait(state);
        }
    }

    /// Pop the next staged record. Only valid after `has_next` returned true.
    pub fn next(&mut self) -> Result<T, PostboxError> {
        self.outbound
            .pop_front()
            .ok_or(PostboxError::NoRecordStaged)
    }

    /// `has_next` + `next` in one call; `None` at end of stream.
    pub fn recv(&mut self) -> Result<Option<T>, PostboxError> {
        if self.has_next()? {
            self.next().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Tell the producer to stop: pending and future writes fail with
    /// [`PostboxError::DownstreamFailed`].
    pub fn signal_consumer_failure(&self) {
        let _state = self.shared.lock();
        self.shared.consumer_failed.store(true, Ordering::Release);
        self.shared.changed.notify_all();
    }

    pub fn peak_buffered(&self) -> usize {
        self.shared.peak.load(Ordering::Relaxed)
    }
}

impl<T> Drop for PostboxReceiver<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.signal_consumer_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataExt;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn drain<T>(receiver: &mut PostboxReceiver<T>) -> Result<Vec<T>, PostboxError> {
        let mut out = Vec::new();
        while receiver.has_next()? {
            out.push(receiver.next()?);
        }
        Ok(out)
    }

    #[test]
    fn test_chunk_size_derivation() {
        let (tx, _rx) = channel::<u32>(4);
        assert_eq!(tx.chunk_size(), 1);

        let (tx, _rx) = channel::<u32>(100);
        assert_eq!(tx.chunk_size(), 25);

        let (tx, _rx) = channel::<u32>(0);
        assert_eq!(tx.capacity(), 1);
        assert_eq!(tx.chunk_size(), 1);
    }

    #[test]
    fn test_capacity_four_delivers_in_order() {
        let (mut tx, mut rx) = channel::<u32>(4);
        assert_eq!(tx.chunk_size(), 1);

        let producer = thread::spawn(move || {
            for i in 1..=10 {
                tx.put(i)?;
            }
            tx.complete()
        });

        let received = drain(&mut rx).unwrap();
        producer.join().unwrap().unwrap();

        assert_eq!(received, (1..=10).collect::<Vec<_>>());
        assert!(!rx.has_next().unwrap());
    }

    #[test]
    fn test_order_preserved_across_capacities_and_lengths() {
        for capacity in [1, 2, 3, 7, 16, 100] {
            for len in [0usize, 1, 5, 64, 1000] {
                let (mut tx, mut rx) = channel::<usize>(capacity);
                let producer = thread::spawn(move || {
                    for i in 0..len {
                        tx.put(i)?;
                    }
                    tx.complete()
                });

                let received = drain(&mut rx).unwrap();
                producer.join().unwrap().unwrap();
                assert_eq!(
                    received,
                    (0..len).collect::<Vec<_>>(),
                    "capacity {capacity}, len {len}"
                );
            }
        }
    }

    #[test]
    fn test_shared_list_never_exceeds_capacity() {
        let (mut tx, mut rx) = channel_with_chunk_size::<u32>(8, 3);

        let producer = thread::spawn(move || {
            for i in 0..500 {
                tx.put(i)?;
            }
            tx.complete()?;
            Ok::<usize, PostboxError>(tx.peak_buffered())
        });

        let mut count = 0;
        while rx.has_next().unwrap() {
            rx.next().unwrap();
            count += 1;
            if count % 50 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }

        let peak = producer.join().unwrap().unwrap();
        assert_eq!(count, 500);
        assert!(peak <= 8, "peak {peak} exceeded capacity");
        assert!(rx.peak_buffered() <= 8);
    }

    #[test]
    fn test_empty_stream() {
        let (mut tx, mut rx) = channel::<u32>(4);
        tx.complete().unwrap();
        assert_eq!(rx.recv().unwrap(), None);
        assert_eq!(rx.recv().unwrap(), None);
    }

    #[test]
    fn test_next_without_has_next_is_rejected() {
        let (_tx, mut rx) = channel::<u32>(4);
        assert_eq!(rx.next(), Err(PostboxError::NoRecordStaged));
    }

    #[test]
    fn test_release_without_complete_aborts_consumer() {
        let (mut tx, mut rx) = channel::<u32>(4);
        tx.put(1).unwrap();
        tx.release();
        tx.release();

        assert_eq!(rx.has_next(), Err(PostboxError::UpstreamAborted));
    }

    #[test]
    fn test_release_after_complete_is_harmless() {
        let (mut tx, mut rx) = channel::<u32>(4);
        tx.put(1).unwrap();
        tx.complete().unwrap();
        tx.release();

        assert_eq!(drain(&mut rx).unwrap(), vec![1]);
    }

    #[test]
    fn test_dropped_sender_aborts_blocked_consumer() {
        let (tx, mut rx) = channel::<u32>(4);
        let (done_tx, done_rx) = mpsc::channel();

        let consumer = thread::spawn(move || {
            let result = rx.has_next();
            done_tx.send(result).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        drop(tx);

        let result = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("consumer stayed blocked");
        assert_eq!(result, Err(PostboxError::UpstreamAborted));
        consumer.join().unwrap();
    }

    #[test]
    fn test_consumer_failure_unblocks_producer() {
        let (mut tx, rx) = channel::<u32>(1);
        let (done_tx, done_rx) = mpsc::channel();

        let producer = thread::spawn(move || {
            // First record fills the shared list, second blocks.
            let mut result = Ok(());
            for i in 0..10 {
                result = tx.put(i);
                if result.is_err() {
                    break;
                }
            }
            done_tx.send(result).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(done_rx.try_recv().is_err(), "producer should be blocked");

        rx.signal_consumer_failure();

        let result = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("producer stayed blocked");
        assert_eq!(result, Err(PostboxError::DownstreamFailed));
        producer.join().unwrap();
    }

    #[test]
    fn test_consumer_failure_unblocks_complete() {
        let (mut tx, rx) = channel_with_chunk_size::<u32>(2, 2);
        let (done_tx, done_rx) = mpsc::channel();

        let producer = thread::spawn(move || {
            // Two records fill the shared list; the third stays staged until
            // complete has to flush it.
            let result = (1..=3)
                .try_for_each(|i| tx.put(i))
                .and_then(|()| tx.complete());
            done_tx.send(result).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(done_rx.try_recv().is_err(), "complete should be blocked");

        rx.signal_consumer_failure();

        let result = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("complete stayed blocked");
        assert_eq!(result, Err(PostboxError::DownstreamFailed));
        producer.join().unwrap();
    }

    #[test]
    fn test_writes_after_consumer_failure_fail_fast() {
        let (mut tx, rx) = channel::<u32>(100);
        rx.signal_consumer_failure();

        assert_eq!(tx.put(1), Err(PostboxError::DownstreamFailed));
        assert_eq!(tx.complete(), Err(PostboxError::DownstreamFailed));
    }

    #[test]
    fn test_dropped_receiver_counts_as_failure() {
        let (mut tx, rx) = channel::<u32>(100);
        drop(rx);
        assert_eq!(tx.put(1), Err(PostboxError::DownstreamFailed));
    }

    #[test]
    fn test_put_after_complete_is_closed() {
        let (mut tx, _rx) = channel::<u32>(4);
        tx.complete().unwrap();
        assert_eq!(tx.put(1), Err(PostboxError::Closed));
        assert_eq!(tx.complete(), Err(PostboxError::Closed));
    }

    #[test]
    fn test_metadata_handshake() {
        let (mut tx, mut rx) = channel::<u32>(4);

        let producer = thread::spawn(move || {
            tx.initialize(Metadata::new().with("source", "a.jsonl"))?;
            tx.put(1)?;
            tx.complete()
        });

        let metadata = rx.wait_initialize().unwrap();
        assert_eq!(
            metadata.get("source").and_then(|v| v.as_str()),
            Some("a.jsonl")
        );
        assert_eq!(drain(&mut rx).unwrap(), vec![1]);
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_wait_initialize_sees_abort() {
        let (tx, mut rx) = channel::<u32>(4);
        drop(tx);
        assert_eq!(rx.wait_initialize(), Err(PostboxError::UpstreamAborted));
    }
}
