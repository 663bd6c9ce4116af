//! Single linear-pass BER decoder (§4.1 "Decode algorithm").
use crate::asn1::error::DecodeError;
use crate::asn1::tag::{Tag, UniversalTag};
use crate::asn1::tree::{NodeArena, NodeId, SessionId, Value};

/// Decode one full TLV for `root` out of `buf`, binding every present node onto `session`.
/// Returns the number of bytes of `buf` consumed.
pub fn decode_root(arena: &mut NodeArena, root: NodeId, session: SessionId, buf: &[u8]) -> Result<usize, DecodeError> {
    decode_node(arena, root, session, buf)
}

fn read_length(buf: &[u8]) -> Result<(usize, bool, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Truncated);
    }
    let first = buf[0];
    if first == 0x80 {
        return Ok((0, true, 1));
    }
    if first & 0x80 == 0 {
        return Ok((first as usize, false, 1));
    }
    let n = (first & 0x7F) as usize;
    if buf.len() < 1 + n {
        return Err(DecodeError::Truncated);
    }
    let mut len = 0usize;
    for &b in &buf[1..1 + n] {
        len = len.checked_shl(8).ok_or(DecodeError::Malformed)?;
        len |= b as usize;
    }
    Ok((len, false, 1 + n))
}

/// Decode a node whose tag is expected to already match at `buf[0..]`.
fn decode_node(arena: &mut NodeArena, node_id: NodeId, session: SessionId, buf: &[u8]) -> Result<usize, DecodeError> {
    let universal = arena.node(node_id).universal;

    if universal == UniversalTag::Choice {
        return decode_choice(arena, node_id, session, buf);
    }

    let (tag, tag_len) = Tag::decode(buf)?;
    let expected = arena.node(node_id).tag();
    if tag.number != expected.number || tag.class != expected.class {
        return Err(DecodeError::SchemaMismatch);
    }

    let (value_len, indefinite, len_len) = read_length(&buf[tag_len..])?;
    let header_len = tag_len + len_len;

    if !indefinite && buf.len() < header_len + value_len {
        return Err(DecodeError::Truncated);
    }

    match universal {
        UniversalTag::Sequence | UniversalTag::Set => {
            let value_buf = if indefinite {
                &buf[header_len..]
            } else {
                &buf[header_len..header_len + value_len]
            };
            let consumed_children = decode_children(arena, node_id, session, value_buf)?;
            let trailer = if indefinite { 2 } else { 0 };
            if !indefinite && consumed_children != value_len {
                return Err(DecodeError::TrailingData);
            }
            arena.set_overlay_constructed(node_id, session);
            Ok(header_len + consumed_children + trailer)
        }
        UniversalTag::Any => {
            let raw = buf[header_len..header_len + value_len].to_vec();
            arena.set_overlay(node_id, session, Value::Any(raw));
            Ok(header_len + value_len)
        }
        _ => {
            let value = decode_primitive(universal, &buf[header_len..header_len + value_len])?;
            arena.set_overlay(node_id, session, value);
            Ok(header_len + value_len)
        }
    }
}

/// Decode the ordered children of a constructed node against `buf`, per §4.1 rules (a)-(d).
/// Schema positions not consumed by the end of `buf` must all be OPTIONAL, else the result is
/// a schema mismatch (a missing mandatory field).
fn decode_children(arena: &mut NodeArena, parent: NodeId, session: SessionId, buf: &[u8]) -> Result<usize, DecodeError> {
    let children: Vec<NodeId> = arena.node(parent).children.clone();
    let mut offset = 0usize;
    let mut schema_pos = 0usize;

    while offset < buf.len() {
        if schema_pos >= children.len() {
            return Err(DecodeError::TrailingData);
        }

        let child_id = children[schema_pos];
        let (peeked_tag, _) = Tag::decode(&buf[offset..])?;
        let child = arena.node(child_id);

        if child.universal == UniversalTag::Choice {
            match decode_choice(arena, child_id, session, &buf[offset..]) {
                Ok(consumed) => {
                    offset += consumed;
                    schema_pos += 1;
                    continue;
                }
                Err(DecodeError::NoMatchingChoice) if child.optional => {
                    schema_pos += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let expected = child.tag();
        if peeked_tag.number == expected.number && peeked_tag.class == expected.class {
            let consumed = decode_node(arena, child_id, session, &buf[offset..])?;
            offset += consumed;
            schema_pos += 1;
        } else if child.optional {
            arena.unlink(child_id, session);
            schema_pos += 1;
        } else {
            return Err(DecodeError::SchemaMismatch);
        }
    }

    // Any remaining, un-visited schema children must be optional; mark them absent.
    while schema_pos < children.len() {
        let child_id = children[schema_pos];
        if !arena.node(child_id).optional {
            return Err(DecodeError::SchemaMismatch);
        }
        arena.unlink(child_id, session);
        schema_pos += 1;
    }

    Ok(offset)
}

fn decode_choice(arena: &mut NodeArena, choice_id: NodeId, session: SessionId, buf: &[u8]) -> Result<usize, DecodeError> {
    let is_explicit = arena.node(choice_id).is_explicit;

    let (search_tag, search_buf, header_len) = if is_explicit {
        let (wrapper_tag, tag_len) = Tag::decode(buf)?;
        let expected = arena.node(choice_id).tag();
        if wrapper_tag.number != expected.number || wrapper_tag.class != expected.class {
            return Err(DecodeError::NoMatchingChoice);
        }
        let (value_len, _, len_len) = read_length(&buf[tag_len..])?;
        let header = tag_len + len_len;
        (None, &buf[header..header + value_len], header)
    } else {
        let (tag, _) = Tag::decode(buf)?;
        (Some(tag), buf, 0)
    };

    let children: Vec<NodeId> = arena.node(choice_id).children.clone();
    for (index, &child_id) in children.iter().enumerate() {
        let child_tag = arena.node(child_id).tag();
        let matches = match &search_tag {
            Some(tag) => tag.number == child_tag.number && tag.class == child_tag.class,
            None => {
                let (peeked, _) = Tag::decode(search_buf)?;
                peeked.number == child_tag.number && peeked.class == child_tag.class
            }
        };

        if matches {
            arena.select_choice(choice_id, index);
            let consumed = decode_node(arena, child_id, session, search_buf)?;
            return Ok(header_len + consumed);
        }
    }

    Err(DecodeError::NoMatchingChoice)
}

fn decode_primitive(universal: UniversalTag, bytes: &[u8]) -> Result<Value, DecodeError> {
    match universal {
        UniversalTag::Integer => {
            if bytes.is_empty() {
                return Err(DecodeError::Malformed);
            }
            let mut n: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
            for &b in bytes {
                n = (n << 8) | b as i64;
            }
            Ok(Value::Integer(n))
        }
        UniversalTag::OctetString => Ok(Value::OctetString(bytes.to_vec())),
        UniversalTag::BitString => {
            if bytes.is_empty() {
                return Err(DecodeError::Malformed);
            }
            Ok(Value::BitString(bytes[1..].to_vec()))
        }
        UniversalTag::Null => Ok(Value::None),
        UniversalTag::ObjectIdentifier => Ok(Value::ObjectIdentifier(decode_oid(bytes)?)),
        UniversalTag::Sequence | UniversalTag::Set | UniversalTag::Choice | UniversalTag::Any => {
            unreachable!("handled by caller")
        }
    }
}

fn decode_oid(bytes: &[u8]) -> Result<Vec<u32>, DecodeError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut arcs = vec![(bytes[0] / 40) as u32, (bytes[0] % 40) as u32];
    let mut value: u32 = 0;
    for &b in &bytes[1..] {
        value = value.checked_shl(7).ok_or(DecodeError::Malformed)?;
        value |= (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            arcs.push(value);
            value = 0;
        }
    }
    Ok(arcs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::encode::encode_node;
    use crate::asn1::tag::UniversalTag;

    #[test]
    fn test_roundtrip_sequence_with_optional_skip() {
        let mut arena = NodeArena::new();
        let root = arena.add_constructed(None, UniversalTag::Sequence, false);
        let c0 = arena.add_leaf(Some(root), UniversalTag::OctetString, true);
        let c1 = arena.add_leaf(Some(root), UniversalTag::OctetString, true);
        let c2 = arena.add_leaf(Some(root), UniversalTag::OctetString, true);

        let session = 7;
        arena.set_overlay(c0, session, Value::OctetString(vec![1, 2, 3]));
        arena.set_overlay(c1, session, Value::OctetString(vec![4, 5, 6, 7, 8]));
        arena.set_overlay_constructed(root, session);

        let mut out = Vec::new();
        encode_node(&arena, root, session, &mut out);

        let mut arena2 = NodeArena::new();
        let root2 = arena2.add_constructed(None, UniversalTag::Sequence, false);
        let d0 = arena2.add_leaf(Some(root2), UniversalTag::OctetString, true);
        let d1 = arena2.add_leaf(Some(root2), UniversalTag::OctetString, true);
        let d2 = arena2.add_leaf(Some(root2), UniversalTag::OctetString, true);

        let session2 = 9;
        let consumed = decode_root(&mut arena2, root2, session2, &out).unwrap();
        assert_eq!(consumed, out.len());

        assert!(arena2.node(d0).is_present(session2));
        assert!(arena2.node(d1).is_present(session2));
        assert!(!arena2.node(d2).is_present(session2));
        assert_eq!(*arena2.node(d0).value(), Value::OctetString(vec![1, 2, 3]));
        assert_eq!(*arena2.node(d1).value(), Value::OctetString(vec![4, 5, 6, 7, 8]));
    }

    #[test]
    fn test_roundtrip_integer() {
        let mut arena = NodeArena::new();
        let root = arena.add_leaf(None, UniversalTag::Integer, false);
        let session = 1;
        arena.set_overlay(root, session, Value::Integer(-300));

        let mut out = Vec::new();
        encode_node(&arena, root, session, &mut out);

        let mut arena2 = NodeArena::new();
        let root2 = arena2.add_leaf(None, UniversalTag::Integer, false);
        decode_root(&mut arena2, root2, 2, &out).unwrap();

        assert_eq!(*arena2.node(root2).value(), Value::Integer(-300));
    }
}
