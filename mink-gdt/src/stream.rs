//! Stream multiplexer and callback model (§4.4).
//!
//! A `Stream` correlates every frame sharing one 64-bit message id. The table lives on a
//! [`crate::client::Client`] and is polled for timeouts by the session's 1 Hz timer thread
//! (§5); callbacks fire on whichever thread observed the event, per the ordering guarantees in
//! §4.4.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::asn1::MessageId;
use crate::pool::{PoolExhausted, SlotPool};

/// Synthetic status handed to a stream-end callback when a stream closes because it went idle
/// past the timeout instead of receiving a terminal frame (spec's "stream errors" table maps
/// timeout onto "stream-end with reason").
pub const TIMEOUT_STATUS: i32 = -1;

/// How many retired ids a table remembers, so a reply that arrives after its stream already
/// timed out is recognized and dropped instead of being mistaken for a new inbound stream.
const RETIRED_MEMORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    New,
    Next,
    End,
    Timeout,
    PayloadSent,
}

#[derive(Debug, Clone, Copy)]
pub enum StreamEvent {
    New { stream_id: MessageId },
    Next { stream_id: MessageId },
    End { stream_id: MessageId, status: i32 },
    Timeout { stream_id: MessageId },
    PayloadSent { stream_id: MessageId },
}

impl StreamEvent {
    pub fn kind(&self) -> StreamEventKind {
        match self {
            StreamEvent::New { .. } => StreamEventKind::New,
            StreamEvent::Next { .. } => StreamEventKind::Next,
            StreamEvent::End { .. } => StreamEventKind::End,
            StreamEvent::Timeout { .. } => StreamEventKind::Timeout,
            StreamEvent::PayloadSent { .. } => StreamEventKind::PayloadSent,
        }
    }

    pub fn stream_id(&self) -> MessageId {
        match *self {
            StreamEvent::New { stream_id }
            | StreamEvent::Next { stream_id }
            | StreamEvent::End { stream_id, .. }
            | StreamEvent::Timeout { stream_id }
            | StreamEvent::PayloadSent { stream_id } => stream_id,
        }
    }
}

pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// One correlated exchange, unidirectional (request + END) or streaming (many Next + END).
pub struct Stream {
    pub id: MessageId,
    pub sequence: u32,
    pub last_activity: Instant,
    pub terminal: bool,
    callback: Option<StreamCallback>,
}

impl Stream {
    fn new(id: MessageId, callback: Option<StreamCallback>) -> Stream {
        Stream {
            id,
            sequence: 0,
            last_activity: Instant::now(),
            terminal: false,
            callback,
        }
    }

    fn fire(&self, event: StreamEvent) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Per-client table of live streams, keyed by message id, backed by a capacity-bounded pool so
/// a client can never accumulate unbounded in-flight streams (§4.2 Open Question resolution).
pub struct StreamTable {
    streams: HashMap<MessageId, Stream>,
    slots: SlotPool<MessageId>,
    slot_of: HashMap<MessageId, usize>,
    retired: VecDeque<MessageId>,
    retired_set: HashSet<MessageId>,
}

impl StreamTable {
    pub fn new(capacity: usize) -> StreamTable {
        StreamTable {
            streams: HashMap::new(),
            slots: SlotPool::new(capacity),
            slot_of: HashMap::new(),
            retired: VecDeque::new(),
            retired_set: HashSet::new(),
        }
    }

    /// Whether `id` belonged to a stream this table has already closed (by end or timeout) and
    /// still remembers. Used to distinguish a late, stale reply from a genuinely new exchange.
    pub fn was_recently_retired(&self, id: MessageId) -> bool {
        self.retired_set.contains(&id)
    }

    fn retire(&mut self, id: MessageId) {
        if self.retired_set.insert(id) {
            self.retired.push_back(id);
            if self.retired.len() > RETIRED_MEMORY {
                if let Some(oldest) = self.retired.pop_front() {
                    self.retired_set.remove(&oldest);
                }
            }
        }
    }

    /// Allocate a new stream entry, failing if the table is at capacity.
    pub fn open(&mut self, id: MessageId, callback: Option<StreamCallback>) -> Result<(), PoolExhausted> {
        let slot = self.slots.push(id)?;
        self.slot_of.insert(id, slot);
        let stream = Stream::new(id, callback);
        stream.fire(StreamEvent::New { stream_id: id });
        self.streams.insert(id, stream);
        Ok(())
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Feed another frame to `id`'s stream, firing `stream-next`.
    pub fn next(&mut self, id: MessageId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.touch();
            stream.sequence += 1;
            stream.fire(StreamEvent::Next { stream_id: id });
        }
    }

    /// Terminate `id`'s stream, firing `stream-end`, and free its table slot.
    pub fn end(&mut self, id: MessageId, status: i32) {
        if let Some(mut stream) = self.streams.remove(&id) {
            stream.terminal = true;
            stream.fire(StreamEvent::End { stream_id: id, status });
            self.reclaim_slot(id);
            self.retire(id);
        }
    }

    pub fn payload_sent(&mut self, id: MessageId) {
        if let Some(stream) = self.streams.get(&id) {
            stream.fire(StreamEvent::PayloadSent { stream_id: id });
        }
    }

    /// Poll every live stream against `timeout`, firing `stream-timeout` and removing any
    /// stream idle past the threshold. Intended to run at 1 Hz from the session timer (§4.4
    /// "Timeouts are polled at 1 Hz").
    pub fn poll_timeouts(&mut self, timeout: Duration) -> Vec<MessageId> {
        let now = Instant::now();
        let timed_out: Vec<MessageId> = self
            .streams
            .iter()
            .filter(|(_, stream)| now.duration_since(stream.last_activity) >= timeout)
            .map(|(&id, _)| id)
            .collect();

        for id in &timed_out {
            if let Some(stream) = self.streams.remove(id) {
                stream.fire(StreamEvent::Timeout { stream_id: *id });
                self.reclaim_slot(*id);
                self.retire(*id);
            }
        }

        timed_out
    }

    fn reclaim_slot(&mut self, id: MessageId) {
        if let Some(idx) = self.slot_of.remove(&id) {
            self.slots.reclaim(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_open_next_end_fires_in_order() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let callback: StreamCallback = Arc::new(move |event: StreamEvent| {
            events_clone.lock().unwrap().push(event.kind());
        });

        let mut table = StreamTable::new(8);
        table.open(1, Some(callback)).unwrap();
        table.next(1);
        table.end(1, 0);

        let recorded = events.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![StreamEventKind::New, StreamEventKind::Next, StreamEventKind::End]
        );
        assert!(!table.contains(1));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut table = StreamTable::new(1);
        table.open(1, None).unwrap();
        assert!(table.open(2, None).is_err());
    }

    #[test]
    fn test_retired_id_is_remembered_after_end() {
        let mut table = StreamTable::new(4);
        table.open(1, None).unwrap();
        assert!(!table.was_recently_retired(1));
        table.end(1, 0);
        assert!(table.was_recently_retired(1));
        assert!(!table.contains(1));
    }

    #[test]
    fn test_retired_id_is_remembered_after_timeout() {
        let mut table = StreamTable::new(4);
        table.open(7, None).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        table.poll_timeouts(Duration::from_millis(10));
        assert!(table.was_recently_retired(7));
    }

    #[test]
    fn test_timeout_fires_and_removes() {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let callback: StreamCallback = Arc::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let mut table = StreamTable::new(4);
        table.open(1, Some(callback)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let timed_out = table.poll_timeouts(Duration::from_millis(10));
        assert_eq!(timed_out, vec![1]);
        assert!(!table.contains(1));
        // one New + one Timeout
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
