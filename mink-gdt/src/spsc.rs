//! Single-producer/single-consumer handoff queue used to pass decoded records from a client's
//! reader thread to the session's dispatch loop (§5).
//!
//! The original runtime's `SpscQ` keeps head/tail cursors in a raw array and synchronizes
//! with bare memory barriers instead of a lock. This workspace's `unsafe_code = "deny"` lint
//! (§5, the one place this crate deliberately diverges from the teacher's literal code) rules
//! that out, so `Spsc` here is a thin, bounded wrapper over `std::sync::mpsc::sync_channel`:
//! same single-producer/single-consumer contract and the same bounded-capacity backpressure,
//! built from a safe, already-audited primitive instead of a hand-rolled one.
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};

pub struct Producer<T> {
    tx: SyncSender<T>,
}

pub struct Consumer<T> {
    rx: Receiver<T>,
}

/// Create a bounded SPSC channel. `capacity` is rounded up to at least 1.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (Producer { tx }, Consumer { rx })
}

impl<T> Producer<T> {
    /// Enqueue a value without blocking. Fails if the queue is full or the consumer dropped.
    pub fn push(&self, value: T) -> Result<(), T> {
        match self.tx.try_send(value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(value)) => Err(value),
            Err(TrySendError::Disconnected(value)) => Err(value),
        }
    }
}

impl<T> Consumer<T> {
    /// Dequeue a value without blocking.
    pub fn pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a value is available or the producer is dropped.
    pub fn pop_blocking(&self) -> Option<T> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_push_pop_roundtrip() {
        let (producer, consumer) = channel(4);
        producer.push(1).unwrap();
        producer.push(2).unwrap();

        assert_eq!(consumer.pop(), Some(1));
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_full_queue_rejects_push() {
        let (producer, _consumer) = channel(1);
        producer.push(1).unwrap();
        assert_eq!(producer.push(2), Err(2));
    }

    #[test]
    fn test_cross_thread_handoff() {
        let (producer, consumer) = channel(8);

        let handle = thread::spawn(move || {
            for i in 0..100 {
                while producer.push(i).is_err() {
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::new();
        while received.len() < 100 {
            if let Some(value) = consumer.pop_blocking() {
                received.push(value);
            }
        }

        handle.join().unwrap();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }
}
