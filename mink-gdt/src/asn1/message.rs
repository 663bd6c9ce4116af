//! The GDT message envelope (§3 "Message", §6 "Wire format").
//!
//! The wire root is an IMPLICIT APPLICATION 0 SEQUENCE of a header (APPLICATION 1) and an
//! optional body (APPLICATION 2) whose concrete shape is picked by the daemon that owns the
//! stream — registration, service, configuration, or a bare heartbeat probe.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ConfigMessage;
use crate::registration::RegistrationMessage;
use crate::service::ServiceMessage;

pub type MessageId = u64;

/// A (daemon type, daemon id) pair identifying one endpoint in the fabric (§ GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub daemon_type: String,
    pub daemon_id: String,
}

impl Endpoint {
    pub fn new(daemon_type: impl Into<String>, daemon_id: impl Into<String>) -> Endpoint {
        Endpoint {
            daemon_type: daemon_type.into(),
            daemon_id: daemon_id.into(),
        }
    }
}

/// Monotonic per-session message id counter. Id `0` is reserved for "not yet assigned" and is
/// skipped on wraparound (§3 invariant).
pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> MessageIdGenerator {
        MessageIdGenerator { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> MessageId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
            // Wrapped exactly onto the reserved sentinel; draw again.
        }
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Header {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub uuid: u128,
    pub message_id: MessageId,
    pub sequence_num: u32,
    pub sequence_flag: bool,
    pub status: i32,
    pub hop_info: u32,
}

#[derive(Debug, Clone)]
pub enum Body {
    Registration(RegistrationMessage),
    Service(ServiceMessage),
    Config(ConfigMessage),
    Heartbeat,
    Empty,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub body: Body,
}

impl Message {
    pub fn new(header: Header, body: Body) -> Message {
        Message { header, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_generator_never_issues_zero() {
        let gen = MessageIdGenerator::new();
        for _ in 0..10 {
            assert_ne!(gen.next(), 0);
        }
    }

    #[test]
    fn test_message_id_generator_monotonic() {
        let gen = MessageIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert!(b > a);
    }
}
