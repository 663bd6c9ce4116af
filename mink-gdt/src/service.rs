//! Service message layer: typed parameter maps carried as application RPC payloads (§4.8).
//!
//! Wire shape is a BER SEQUENCE of up to [`MAX_PARAM_ENTRIES`] OPTIONAL entries, each a
//! `(id, index, fragment, value)` tuple where `value` is a CHOICE over the typed arms below —
//! built and walked with [`crate::asn1::tree`]'s schema arena rather than a hand-rolled layout,
//! the same primitives every other schema in this crate uses (§4.1).
use indexmap::IndexMap;
use slog::warn;

use crate::asn1::tree::{NodeArena, NodeId, SessionId, Value};
use crate::asn1::{decode_root, encode_node, Complexity, DecodeError, Tag, UniversalTag};
use crate::log;

pub type ParamId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Octets(Vec<u8>),
    Utf8(String),
    /// In-process handoff only; never encoded onto the wire (§4.8).
    Pointer(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ParamKey {
    id: ParamId,
    index: u32,
    fragment: u32,
}

/// Insertion-ordered mapping from a `(param_id, index, fragment)` triple to a typed value
/// (§3 "Parameter map").
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    entries: IndexMap<ParamKey, ParamValue>,
}

impl ParameterMap {
    pub fn new() -> ParameterMap {
        ParameterMap { entries: IndexMap::new() }
    }

    pub fn set(&mut self, param_id: ParamId, value: ParamValue, index: u32, fragment: u32) {
        self.entries.insert(ParamKey { id: param_id, index, fragment }, value);
    }

    pub fn get(&self, param_id: ParamId, index: u32) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key.id == param_id && key.index == index)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, u32, u32, &ParamValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.id, key.index, key.fragment, value))
    }
}

/// A typed wrapper around a [`ParameterMap`], the payload shape for application RPC.
#[derive(Debug, Clone, Default)]
pub struct ServiceMessage {
    pub params: ParameterMap,
    /// Set only when replying inside a stream-new callback, to preserve correlation (§4.8
    /// "reply(values…)").
    pub correlation_id: Option<u64>,
}

impl ServiceMessage {
    pub fn new() -> ServiceMessage {
        ServiceMessage::default()
    }

    pub fn set(&mut self, param_id: ParamId, value: ParamValue) -> &mut Self {
        self.params.set(param_id, value, 0, 0);
        self
    }

    pub fn get(&self, param_id: ParamId) -> Option<&ParamValue> {
        self.params.get(param_id, 0)
    }

    /// Build a reply preserving this message's correlation id, per §4.8 `reply(values…)`.
    pub fn reply_with(&self, params: ParameterMap) -> ServiceMessage {
        ServiceMessage {
            params,
            correlation_id: self.correlation_id,
        }
    }
}

/// Upper bound on parameters carried per message. A fixed-capacity schema lets the parameter
/// map reuse the same pool-allocator discipline as every other resource in this crate (§4.2)
/// instead of an open-ended SEQUENCE OF; 32 comfortably covers every scenario in §8.
pub(crate) const MAX_PARAM_ENTRIES: usize = 32;

const TAG_ID: u32 = 0;
const TAG_INDEX: u32 = 1;
const TAG_FRAGMENT: u32 = 2;
/// Wrapper tag for the value CHOICE itself — it is EXPLICIT (its own tag + length around the
/// selected arm's full TLV) rather than implicit, so the arena's generic length-propagation
/// formula (tag_size + length_size + value_length) holds for it like any other present node;
/// an implicit choice would need special-casing the propagation code does not do.
const TAG_VALUE: u32 = 3;

const ARM_BOOL: u32 = 0;
const ARM_I32: u32 = 1;
const ARM_U32: u32 = 2;
const ARM_I64: u32 = 3;
const ARM_U64: u32 = 4;
const ARM_OCTETS: u32 = 5;
const ARM_UTF8: u32 = 6;

/// The fixed session id every one-shot encode/decode call uses. Each call builds its own arena
/// (see [`build_params_schema`] and friends), so there is never more than one session alive on
/// it and no risk of cross-call collision.
pub(crate) const TOP_SESSION: SessionId = 1;

pub(crate) struct ParamEntrySchema {
    entry: NodeId,
    id: NodeId,
    index: NodeId,
    fragment: NodeId,
    choice: NodeId,
    arm_bool: NodeId,
    arm_i32: NodeId,
    arm_u32: NodeId,
    arm_i64: NodeId,
    arm_u64: NodeId,
    arm_octets: NodeId,
    arm_utf8: NodeId,
}

pub(crate) struct ParamsSchema {
    pub root: NodeId,
    entries: Vec<ParamEntrySchema>,
}

fn context_leaf(arena: &mut NodeArena, parent: NodeId, universal: UniversalTag, tag: u32) -> NodeId {
    let id = arena.add_leaf(Some(parent), universal, false);
    arena.set_tag_override(id, Tag::context(tag, Complexity::Primitive));
    id
}

/// Build `MAX_PARAM_ENTRIES` OPTIONAL entry slots under `parent` (or as the root schema if
/// `parent` is `None`), shared by every message body that carries a [`ParameterMap`].
pub(crate) fn build_params_schema(arena: &mut NodeArena, parent: Option<NodeId>, optional: bool) -> ParamsSchema {
    let root = arena.add_constructed(parent, UniversalTag::Sequence, optional);
    let mut entries = Vec::with_capacity(MAX_PARAM_ENTRIES);

    for _ in 0..MAX_PARAM_ENTRIES {
        let entry = arena.add_constructed(Some(root), UniversalTag::Sequence, true);
        let id = context_leaf(arena, entry, UniversalTag::Integer, TAG_ID);
        let index = context_leaf(arena, entry, UniversalTag::Integer, TAG_INDEX);
        let fragment = context_leaf(arena, entry, UniversalTag::Integer, TAG_FRAGMENT);

        let choice = arena.add_choice(Some(entry), false, true);
        arena.set_tag_override(choice, Tag::context(TAG_VALUE, Complexity::Constructed));
        let arm_bool = context_leaf(arena, choice, UniversalTag::Integer, ARM_BOOL);
        let arm_i32 = context_leaf(arena, choice, UniversalTag::Integer, ARM_I32);
        let arm_u32 = context_leaf(arena, choice, UniversalTag::Integer, ARM_U32);
        let arm_i64 = context_leaf(arena, choice, UniversalTag::Integer, ARM_I64);
        // u64's full range overflows Value::Integer's i64, so its arm is carried as a fixed
        // 8-byte big-endian OCTET STRING instead.
        let arm_u64 = context_leaf(arena, choice, UniversalTag::OctetString, ARM_U64);
        let arm_octets = context_leaf(arena, choice, UniversalTag::OctetString, ARM_OCTETS);
        let arm_utf8 = context_leaf(arena, choice, UniversalTag::OctetString, ARM_UTF8);

        entries.push(ParamEntrySchema {
            entry,
            id,
            index,
            fragment,
            choice,
            arm_bool,
            arm_i32,
            arm_u32,
            arm_i64,
            arm_u64,
            arm_octets,
            arm_utf8,
        });
    }

    ParamsSchema { root, entries }
}

/// Bind `params` onto `schema`'s slots for `session`, truncating (with a warning) past
/// [`MAX_PARAM_ENTRIES`]. `Pointer` values are in-process-only (§4.8) and are skipped.
pub(crate) fn write_params_into_schema(arena: &mut NodeArena, schema: &ParamsSchema, session: SessionId, params: &ParameterMap) {
    let mut used = 0;
    for (id, index, fragment, value) in params.iter() {
        if matches!(value, ParamValue::Pointer(_)) {
            continue;
        }
        if used >= schema.entries.len() {
            warn!(log::root(), "dropping parameter beyond capacity"; "param_id" => id, "capacity" => schema.entries.len());
            continue;
        }

        let slot = &schema.entries[used];
        used += 1;

        arena.set_overlay(slot.id, session, Value::Integer(id as i64));
        arena.set_overlay(slot.index, session, Value::Integer(index as i64));
        arena.set_overlay(slot.fragment, session, Value::Integer(fragment as i64));

        let choice_index = match value {
            ParamValue::Bool(b) => {
                arena.set_overlay(slot.arm_bool, session, Value::Integer(*b as i64));
                0
            }
            ParamValue::I32(n) => {
                arena.set_overlay(slot.arm_i32, session, Value::Integer(*n as i64));
                1
            }
            ParamValue::U32(n) => {
                arena.set_overlay(slot.arm_u32, session, Value::Integer(*n as i64));
                2
            }
            ParamValue::I64(n) => {
                arena.set_overlay(slot.arm_i64, session, Value::Integer(*n));
                3
            }
            ParamValue::U64(n) => {
                arena.set_overlay(slot.arm_u64, session, Value::OctetString(n.to_be_bytes().to_vec()));
                4
            }
            ParamValue::Octets(bytes) => {
                arena.set_overlay(slot.arm_octets, session, Value::OctetString(bytes.clone()));
                5
            }
            ParamValue::Utf8(s) => {
                arena.set_overlay(slot.arm_utf8, session, Value::OctetString(s.as_bytes().to_vec()));
                6
            }
            ParamValue::Pointer(_) => unreachable!("filtered above"),
        };

        arena.select_choice(slot.choice, choice_index);
        // Marks the CHOICE node itself present so its explicit-wrapper length is included
        // when `slot.entry` sums its children below.
        arena.set_overlay_constructed(slot.choice, session);
        arena.set_overlay_constructed(slot.entry, session);
    }
    arena.set_overlay_constructed(schema.root, session);
}

/// Read back every entry present for `session`, in schema (== original insertion) order.
pub(crate) fn read_params_from_schema(arena: &NodeArena, schema: &ParamsSchema, session: SessionId) -> ParameterMap {
    let mut map = ParameterMap::new();
    for slot in &schema.entries {
        if !arena.node(slot.entry).is_present(session) {
            continue;
        }

        let id = match &*arena.node(slot.id).value() {
            Value::Integer(n) => *n as ParamId,
            _ => continue,
        };
        let index = match &*arena.node(slot.index).value() {
            Value::Integer(n) => *n as u32,
            _ => continue,
        };
        let fragment = match &*arena.node(slot.fragment).value() {
            Value::Integer(n) => *n as u32,
            _ => continue,
        };

        let value = match arena.node(slot.choice).selected.get() {
            Some(0) => match &*arena.node(slot.arm_bool).value() {
                Value::Integer(n) => ParamValue::Bool(*n != 0),
                _ => continue,
            },
            Some(1) => match &*arena.node(slot.arm_i32).value() {
                Value::Integer(n) => ParamValue::I32(*n as i32),
                _ => continue,
            },
            Some(2) => match &*arena.node(slot.arm_u32).value() {
                Value::Integer(n) => ParamValue::U32(*n as u32),
                _ => continue,
            },
            Some(3) => match &*arena.node(slot.arm_i64).value() {
                Value::Integer(n) => ParamValue::I64(*n),
                _ => continue,
            },
            Some(4) => match &*arena.node(slot.arm_u64).value() {
                Value::OctetString(bytes) if bytes.len() == 8 => {
                    let mut fixed = [0u8; 8];
                    fixed.copy_from_slice(bytes);
                    ParamValue::U64(u64::from_be_bytes(fixed))
                }
                _ => continue,
            },
            Some(5) => match &*arena.node(slot.arm_octets).value() {
                Value::OctetString(bytes) => ParamValue::Octets(bytes.clone()),
                _ => continue,
            },
            Some(6) => match &*arena.node(slot.arm_utf8).value() {
                Value::OctetString(bytes) => ParamValue::Utf8(String::from_utf8_lossy(bytes).into_owned()),
                _ => continue,
            },
            _ => continue,
        };

        map.set(id, value, index, fragment);
    }
    map
}

pub fn encode_params(params: &ParameterMap, out: &mut Vec<u8>) {
    let mut arena = NodeArena::new();
    let schema = build_params_schema(&mut arena, None, false);
    write_params_into_schema(&mut arena, &schema, TOP_SESSION, params);
    encode_node(&arena, schema.root, TOP_SESSION, out);
}

pub fn decode_params(buf: &[u8]) -> Result<(ParameterMap, usize), DecodeError> {
    let mut arena = NodeArena::new();
    let schema = build_params_schema(&mut arena, None, false);
    let consumed = decode_root(&mut arena, schema.root, TOP_SESSION, buf)?;
    Ok((read_params_from_schema(&arena, &schema, TOP_SESSION), consumed))
}

struct ServiceSchema {
    root: NodeId,
    correlation_id: NodeId,
    params: ParamsSchema,
}

/// The service body's root: an OPTIONAL correlation id (absent means "no correlation") followed
/// by the shared parameter-map subtree.
fn build_service_schema() -> (NodeArena, ServiceSchema) {
    let mut arena = NodeArena::new();
    let root = arena.add_constructed(None, UniversalTag::Sequence, false);
    let correlation_id = arena.add_leaf(Some(root), UniversalTag::Integer, true);
    arena.set_tag_override(correlation_id, Tag::context(0, Complexity::Primitive));
    let params = build_params_schema(&mut arena, Some(root), false);
    (arena, ServiceSchema { root, correlation_id, params })
}

pub fn encode(msg: &ServiceMessage, out: &mut Vec<u8>) {
    let (mut arena, schema) = build_service_schema();
    if let Some(id) = msg.correlation_id {
        arena.set_overlay(schema.correlation_id, TOP_SESSION, Value::Integer(id as i64));
    }
    write_params_into_schema(&mut arena, &schema.params, TOP_SESSION, &msg.params);
    arena.set_overlay_constructed(schema.root, TOP_SESSION);
    encode_node(&arena, schema.root, TOP_SESSION, out);
}

pub fn decode(buf: &[u8]) -> Result<ServiceMessage, DecodeError> {
    let (mut arena, schema) = build_service_schema();
    decode_root(&mut arena, schema.root, TOP_SESSION, buf)?;

    let correlation_id = if arena.node(schema.correlation_id).is_present(TOP_SESSION) {
        match *arena.node(schema.correlation_id).value() {
            Value::Integer(n) => Some(n as u64),
            _ => return Err(DecodeError::Malformed),
        }
    } else {
        None
    };
    let params = read_params_from_schema(&arena, &schema.params, TOP_SESSION);
    Ok(ServiceMessage { params, correlation_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let mut msg = ServiceMessage::new();
        msg.set(101, ParamValue::Utf8("hello".into()));

        assert_eq!(msg.get(101), Some(&ParamValue::Utf8("hello".into())));
        assert_eq!(msg.get(102), None);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut map = ParameterMap::new();
        map.set(3, ParamValue::I32(3), 0, 0);
        map.set(1, ParamValue::I32(1), 0, 0);
        map.set(2, ParamValue::I32(2), 0, 0);

        let ids: Vec<ParamId> = map.iter().map(|(id, ..)| id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_overwrite_same_key() {
        let mut map = ParameterMap::new();
        map.set(1, ParamValue::I32(1), 0, 0);
        map.set(1, ParamValue::I32(2), 0, 0);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(1, 0), Some(&ParamValue::I32(2)));
    }

    #[test]
    fn test_reply_preserves_correlation() {
        let mut req = ServiceMessage::new();
        req.correlation_id = Some(42);

        let mut reply_params = ParameterMap::new();
        reply_params.set(101, ParamValue::Utf8("HELLO".into()), 0, 0);
        let reply = req.reply_with(reply_params);

        assert_eq!(reply.correlation_id, Some(42));
    }

    #[test]
    fn test_wire_roundtrip_mixed_types() {
        let mut msg = ServiceMessage::new();
        msg.correlation_id = Some(99);
        msg.set(1, ParamValue::Bool(true));
        msg.set(2, ParamValue::I32(-7));
        msg.set(3, ParamValue::U32(42));
        msg.set(4, ParamValue::I64(-12345));
        msg.set(5, ParamValue::U64(u64::MAX));
        msg.set(6, ParamValue::Octets(vec![1, 2, 3]));
        msg.set(7, ParamValue::Utf8("round-trip".into()));

        let mut bytes = Vec::new();
        encode(&msg, &mut bytes);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.correlation_id, Some(99));
        assert_eq!(decoded.get(1), Some(&ParamValue::Bool(true)));
        assert_eq!(decoded.get(2), Some(&ParamValue::I32(-7)));
        assert_eq!(decoded.get(3), Some(&ParamValue::U32(42)));
        assert_eq!(decoded.get(4), Some(&ParamValue::I64(-12345)));
        assert_eq!(decoded.get(5), Some(&ParamValue::U64(u64::MAX)));
        assert_eq!(decoded.get(6), Some(&ParamValue::Octets(vec![1, 2, 3])));
        assert_eq!(decoded.get(7), Some(&ParamValue::Utf8("round-trip".into())));
    }

    #[test]
    fn test_pointer_values_are_not_encoded() {
        let mut msg = ServiceMessage::new();
        msg.set(1, ParamValue::Pointer(0xdead_beef));
        msg.set(2, ParamValue::I32(5));

        let mut bytes = Vec::new();
        encode(&msg, &mut bytes);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.get(1), None);
        assert_eq!(decoded.get(2), Some(&ParamValue::I32(5)));
    }

    #[test]
    fn test_capacity_overflow_is_dropped_not_corrupted() {
        let mut msg = ServiceMessage::new();
        for i in 0..(MAX_PARAM_ENTRIES as u32 + 5) {
            msg.set(i, ParamValue::U32(i));
        }

        let mut bytes = Vec::new();
        encode(&msg, &mut bytes);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.params.len(), MAX_PARAM_ENTRIES);
        assert_eq!(decoded.get(0), Some(&ParamValue::U32(0)));
        assert_eq!(decoded.get(MAX_PARAM_ENTRIES as u32 + 4), None);
    }
}
