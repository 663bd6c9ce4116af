//! Session-id allocation for the overlay mechanism (§3 "Session-scoped overlay", Design Note
//! "Session-scoped overlay mechanism").
//!
//! The propagation logic itself lives on [`crate::asn1::tree::NodeArena`] (`set_overlay`,
//! `unlink`) since it only ever touches one node and its ancestors. What's left here is
//! handing out the small integer session ids that identify which in-flight message currently
//! owns a given binding on the shared schema tree — a fixed-capacity pool like any other
//! resource in this crate (§4.2), since the number of concurrent messages over one schema
//! instance is bounded by the stream table size.
use crate::asn1::tree::SessionId;
use crate::pool::{PoolExhausted, SlotPool};

pub struct SessionIdPool {
    slots: SlotPool<()>,
}

impl SessionIdPool {
    pub fn new(capacity: usize) -> SessionIdPool {
        SessionIdPool { slots: SlotPool::new(capacity) }
    }

    /// Reserve a fresh session id for a new in-flight message's overlay bindings.
    pub fn acquire(&mut self) -> Result<SessionId, PoolExhausted> {
        self.slots.push(()).map(|idx| idx as SessionId)
    }

    /// Release a session id once its message's overlay bindings have all been unlinked.
    pub fn release(&mut self, id: SessionId) {
        self.slots.reclaim(id as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reuses_slot() {
        let mut pool = SessionIdPool::new(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());

        pool.release(a);
        let c = pool.acquire().unwrap();
        assert_eq!(c, a);
        let _ = b;
    }
}
