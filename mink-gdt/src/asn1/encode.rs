//! Depth-first BER encoder (§4.1 "Encode algorithm").
use crate::asn1::tag::UniversalTag;
use crate::asn1::tree::{length_of_length, NodeArena, NodeId, SessionId, Value};

/// Encode `root`'s subtree, as currently overlaid onto `session`, into `out`.
///
/// Parent lengths are already correct by the time this runs — every `set_overlay`/`unlink`
/// call propagated its delta up the tree — so this walk never re-sums a subtree, it only
/// writes the tag/length/value octets each node already knows it has.
pub fn encode_node(arena: &NodeArena, root: NodeId, session: SessionId, out: &mut Vec<u8>) {
    let node = arena.node(root);

    if node.universal == UniversalTag::Choice {
        let selected = node.selected.get().expect("choice node encoded without a selection");
        let child_id = node.children[selected];

        if node.is_explicit {
            let child = arena.node(child_id);
            let child_total = child.tag_size() + child.length_size() + child.value_length();
            node.tag().encode(out);
            encode_length(child_total, false, out);
        }
        encode_node(arena, child_id, session, out);
        return;
    }

    if !node.is_present(session) {
        return;
    }

    node.tag().encode(out);
    encode_length(node.value_length(), node.unlimited_size, out);

    match node.universal {
        UniversalTag::Sequence | UniversalTag::Set => {
            for &child in &node.children {
                encode_node(arena, child, session, out);
            }
            if node.unlimited_size {
                out.push(0x00);
                out.push(0x00);
            }
        }
        _ => encode_value(&node.value(), out),
    }
}

/// Write a TLV length prefix per §4.1 "Length encoding".
pub fn encode_length(len: usize, unlimited: bool, out: &mut Vec<u8>) {
    if unlimited {
        out.push(0x80);
        return;
    }
    if len < 128 {
        out.push(len as u8);
        return;
    }
    let n = length_of_length(len, false) - 1;
    out.push(0x80 | n as u8);
    let bytes = (len as u64).to_be_bytes();
    out.extend_from_slice(&bytes[8 - n..]);
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::None => {}
        Value::Integer(n) => encode_integer(*n, out),
        Value::OctetString(bytes) => out.extend_from_slice(bytes),
        Value::BitString(bytes) => {
            out.push(0);
            out.extend_from_slice(bytes);
        }
        Value::ObjectIdentifier(arcs) => encode_oid(arcs, out),
        Value::Any(bytes) => out.extend_from_slice(bytes),
    }
}

fn encode_integer(n: i64, out: &mut Vec<u8>) {
    let bytes = n.to_be_bytes();
    let mut i = 0;
    while i < 7 {
        let byte = bytes[i];
        let next = bytes[i + 1];
        let sign_ok = (byte == 0x00 && next & 0x80 == 0) || (byte == 0xFF && next & 0x80 != 0);
        if !sign_ok {
            break;
        }
        i += 1;
    }
    out.extend_from_slice(&bytes[i..]);
}

fn encode_oid(arcs: &[u32], out: &mut Vec<u8>) {
    if arcs.len() < 2 {
        out.push(0);
        return;
    }
    encode_base128(arcs[0] * 40 + arcs[1], out);
    for &arc in &arcs[2..] {
        encode_base128(arc, out);
    }
}

fn encode_base128(n: u32, out: &mut Vec<u8>) {
    let mut groups = Vec::new();
    let mut v = n;
    loop {
        groups.push((v & 0x7F) as u8);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    groups.reverse();
    let last = groups.len() - 1;
    for (i, g) in groups.into_iter().enumerate() {
        out.push(if i == last { g } else { g | 0x80 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::tag::UniversalTag;

    #[test]
    fn test_encode_simple_sequence() {
        let mut arena = NodeArena::new();
        let root = arena.add_constructed(None, UniversalTag::Sequence, false);
        let leaf = arena.add_leaf(Some(root), UniversalTag::Integer, false);

        let session = 1;
        arena.set_overlay(leaf, session, Value::Integer(5));
        arena.set_overlay_constructed(root, session);

        let mut out = Vec::new();
        encode_node(&arena, root, session, &mut out);

        assert_eq!(out, vec![0x30, 0x03, 0x02, 0x01, 0x05]);
    }

    #[test]
    fn test_encode_length_long_form() {
        let mut out = Vec::new();
        encode_length(300, false, &mut out);
        assert_eq!(out, vec![0x82, 0x01, 0x2C]);
    }
}
