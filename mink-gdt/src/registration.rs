//! Registration handshake (§4.5).
//!
//! A freshly connected [`crate::client::Client`] reserves its first stream for this exchange:
//! the initiator sends `REG_REQUEST` naming itself, the acceptor answers `REG_RESULT` naming
//! itself and a status. Only after a `status = 0` result does the client's `registered` flag
//! flip and ordinary traffic get admitted (§4.3 invariant).
use std::fmt;

use crate::asn1::tree::{NodeArena, NodeId, SessionId, Value};
use crate::asn1::{decode_root, encode_node, Complexity, DecodeError, Tag, UniversalTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegAction {
    Request,
    Result,
}

#[derive(Debug, Clone)]
pub struct RegistrationMessage {
    pub action: RegAction,
    pub daemon_type: String,
    pub daemon_id: String,
    pub router_flag: bool,
    /// Only meaningful on `Result`: `0` is success, anything else is a registration error.
    pub status: i32,
}

impl RegistrationMessage {
    pub fn request(daemon_type: impl Into<String>, daemon_id: impl Into<String>, router_flag: bool) -> RegistrationMessage {
        RegistrationMessage {
            action: RegAction::Request,
            daemon_type: daemon_type.into(),
            daemon_id: daemon_id.into(),
            router_flag,
            status: 0,
        }
    }

    pub fn result(daemon_type: impl Into<String>, daemon_id: impl Into<String>, router_flag: bool, status: i32) -> RegistrationMessage {
        RegistrationMessage {
            action: RegAction::Result,
            daemon_type: daemon_type.into(),
            daemon_id: daemon_id.into(),
            router_flag,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.action == RegAction::Result && self.status == 0
    }
}

/// Failure modes enumerated in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    Timeout,
    MissingFields,
    /// The peer's (type, id) was already registered under another client.
    ConflictingEndpoint,
    Rejected(i32),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::Timeout => write!(f, "registration timed out"),
            RegistrationError::MissingFields => write!(f, "registration message missing mandatory fields"),
            RegistrationError::ConflictingEndpoint => write!(f, "peer endpoint already registered under another client"),
            RegistrationError::Rejected(status) => write!(f, "registration rejected with status {}", status),
        }
    }
}

impl std::error::Error for RegistrationError {}

pub fn validate(msg: &RegistrationMessage) -> Result<(), RegistrationError> {
    if msg.daemon_type.is_empty() || msg.daemon_id.is_empty() {
        return Err(RegistrationError::MissingFields);
    }
    if msg.daemon_type.len() > 15 || msg.daemon_id.len() > 15 {
        return Err(RegistrationError::MissingFields);
    }
    Ok(())
}

const ACTION_REQUEST: i64 = 1;
const ACTION_RESULT: i64 = 2;

const TAG_ACTION: u32 = 0;
const TAG_DAEMON_TYPE: u32 = 1;
const TAG_DAEMON_ID: u32 = 2;
const TAG_ROUTER_FLAG: u32 = 3;
const TAG_STATUS: u32 = 4;

const TOP_SESSION: SessionId = 1;

struct RegistrationSchema {
    root: NodeId,
    action: NodeId,
    daemon_type: NodeId,
    daemon_id: NodeId,
    router_flag: NodeId,
    status: NodeId,
}

fn context_leaf(arena: &mut NodeArena, parent: NodeId, universal: UniversalTag, tag: u32) -> NodeId {
    let id = arena.add_leaf(Some(parent), universal, false);
    arena.set_tag_override(id, Tag::context(tag, Complexity::Primitive));
    id
}

fn build_schema() -> (NodeArena, RegistrationSchema) {
    let mut arena = NodeArena::new();
    let root = arena.add_constructed(None, UniversalTag::Sequence, false);
    let action = context_leaf(&mut arena, root, UniversalTag::Integer, TAG_ACTION);
    let daemon_type = context_leaf(&mut arena, root, UniversalTag::OctetString, TAG_DAEMON_TYPE);
    let daemon_id = context_leaf(&mut arena, root, UniversalTag::OctetString, TAG_DAEMON_ID);
    let router_flag = context_leaf(&mut arena, root, UniversalTag::Integer, TAG_ROUTER_FLAG);
    let status = context_leaf(&mut arena, root, UniversalTag::Integer, TAG_STATUS);
    (arena, RegistrationSchema { root, action, daemon_type, daemon_id, router_flag, status })
}

pub fn encode(msg: &RegistrationMessage, out: &mut Vec<u8>) {
    let (mut arena, schema) = build_schema();
    let action = match msg.action {
        RegAction::Request => ACTION_REQUEST,
        RegAction::Result => ACTION_RESULT,
    };
    arena.set_overlay(schema.action, TOP_SESSION, Value::Integer(action));
    arena.set_overlay(schema.daemon_type, TOP_SESSION, Value::OctetString(msg.daemon_type.as_bytes().to_vec()));
    arena.set_overlay(schema.daemon_id, TOP_SESSION, Value::OctetString(msg.daemon_id.as_bytes().to_vec()));
    arena.set_overlay(schema.router_flag, TOP_SESSION, Value::Integer(msg.router_flag as i64));
    arena.set_overlay(schema.status, TOP_SESSION, Value::Integer(msg.status as i64));
    arena.set_overlay_constructed(schema.root, TOP_SESSION);
    encode_node(&arena, schema.root, TOP_SESSION, out);
}

pub fn decode(buf: &[u8]) -> Result<RegistrationMessage, DecodeError> {
    let (mut arena, schema) = build_schema();
    decode_root(&mut arena, schema.root, TOP_SESSION, buf)?;

    let action = match *arena.node(schema.action).value() {
        Value::Integer(ACTION_REQUEST) => RegAction::Request,
        Value::Integer(ACTION_RESULT) => RegAction::Result,
        _ => return Err(DecodeError::Malformed),
    };
    let daemon_type = match &*arena.node(schema.daemon_type).value() {
        Value::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return Err(DecodeError::Malformed),
    };
    let daemon_id = match &*arena.node(schema.daemon_id).value() {
        Value::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return Err(DecodeError::Malformed),
    };
    let router_flag = match *arena.node(schema.router_flag).value() {
        Value::Integer(n) => n != 0,
        _ => return Err(DecodeError::Malformed),
    };
    let status = match *arena.node(schema.status).value() {
        Value::Integer(n) => n as i32,
        _ => return Err(DecodeError::Malformed),
    };

    Ok(RegistrationMessage { action, daemon_type, daemon_id, router_flag, status })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let msg = RegistrationMessage::request("y", "b1", true);
        let mut bytes = Vec::new();
        encode(&msg, &mut bytes);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.action, RegAction::Request);
        assert_eq!(decoded.daemon_type, "y");
        assert_eq!(decoded.daemon_id, "b1");
        assert!(decoded.router_flag);
    }

    #[test]
    fn test_request_result_roundtrip_shape() {
        let req = RegistrationMessage::request("y", "b1", false);
        assert_eq!(req.action, RegAction::Request);
        assert!(validate(&req).is_ok());

        let result = RegistrationMessage::result("x", "a1", false, 0);
        assert!(result.is_success());

        let failed = RegistrationMessage::result("x", "a1", false, 1);
        assert!(!failed.is_success());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let msg = RegistrationMessage::request("", "b1", false);
        assert_eq!(validate(&msg), Err(RegistrationError::MissingFields));
    }

    #[test]
    fn test_validate_rejects_oversized_ids() {
        let msg = RegistrationMessage::request("y", "x".repeat(16), false);
        assert_eq!(validate(&msg), Err(RegistrationError::MissingFields));
    }
}
