//! Envelope wire codec (§6 "Wire format").
//!
//! The outer shape is exactly what §6 specifies: an IMPLICIT APPLICATION 0 SEQUENCE of a
//! header (APPLICATION 1) and an optional body (APPLICATION 2), built with the same tag/length
//! primitives as [`crate::asn1::encode`]/[`crate::asn1::decode`]. The header's own fields are
//! fixed by the spec (endpoint strings, uuid, message id, sequence fields, status, hop info),
//! so rather than building a full [`crate::asn1::tree::NodeArena`] schema instance for a shape
//! that never varies, they're written as a flat run of primitive TLVs in schema order — still
//! BER, still network byte order, just without a generic tree walk for fields nothing ever
//! reorders or makes optional. The body is one OCTET STRING per variant, its payload produced
//! by that variant's own codec (`registration`, `service`, `config`).
use byteorder::{BigEndian, ByteOrder};

use crate::asn1::encode::encode_length;
use crate::asn1::error::DecodeError;
use crate::asn1::message::{Body, Endpoint, Header, Message};
use crate::asn1::tag::{Complexity, Tag, TagClass};
use crate::config;
use crate::registration;
use crate::service;

const TAG_ROOT: u32 = 0;
const TAG_HEADER: u32 = 1;

// Body is a choice over message kinds (§6): each variant gets its own APPLICATION tag rather
// than sharing one wrapper tag with an internal kind byte, so the variant is recoverable from
// the TLV's tag octet alone, the same way any other BER CHOICE is dispatched.
const TAG_BODY_REGISTRATION: u32 = 2;
const TAG_BODY_SERVICE: u32 = 3;
const TAG_BODY_CONFIG: u32 = 4;
const TAG_BODY_HEARTBEAT: u32 = 5;
const TAG_BODY_EMPTY: u32 = 6;

fn app_tag(number: u32) -> Tag {
    Tag::new(TagClass::Application, number, Complexity::Constructed)
}

fn octet_tag() -> Tag {
    Tag::new(TagClass::Application, 0, Complexity::Primitive)
}

fn write_octets(bytes: &[u8], out: &mut Vec<u8>) {
    octet_tag().encode(out);
    encode_length(bytes.len(), false, out);
    out.extend_from_slice(bytes);
}

fn read_octets(buf: &[u8]) -> Result<(Vec<u8>, usize), DecodeError> {
    let (_tag, tag_len) = Tag::decode(buf)?;
    let (len, _, len_len) = read_length(&buf[tag_len..])?;
    let header_len = tag_len + len_len;
    if buf.len() < header_len + len {
        return Err(DecodeError::Truncated);
    }
    Ok((buf[header_len..header_len + len].to_vec(), header_len + len))
}

fn read_length(buf: &[u8]) -> Result<(usize, bool, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Truncated);
    }
    let first = buf[0];
    if first & 0x80 == 0 {
        return Ok((first as usize, false, 1));
    }
    let n = (first & 0x7F) as usize;
    if buf.len() < 1 + n {
        return Err(DecodeError::Truncated);
    }
    let mut len = 0usize;
    for &b in &buf[1..1 + n] {
        len = (len << 8) | b as usize;
    }
    Ok((len, false, 1 + n))
}

fn encode_header(header: &Header, out: &mut Vec<u8>) {
    let mut body = Vec::new();
    write_octets(header.source.daemon_type.as_bytes(), &mut body);
    write_octets(header.source.daemon_id.as_bytes(), &mut body);
    write_octets(header.destination.daemon_type.as_bytes(), &mut body);
    write_octets(header.destination.daemon_id.as_bytes(), &mut body);

    let mut fixed = [0u8; 16 + 8 + 4 + 1 + 4 + 4];
    BigEndian::write_u128(&mut fixed[0..16], header.uuid);
    BigEndian::write_u64(&mut fixed[16..24], header.message_id);
    BigEndian::write_u32(&mut fixed[24..28], header.sequence_num);
    fixed[28] = header.sequence_flag as u8;
    BigEndian::write_i32(&mut fixed[29..33], header.status);
    BigEndian::write_u32(&mut fixed[33..37], header.hop_info);
    write_octets(&fixed, &mut body);

    app_tag(TAG_HEADER).encode(out);
    encode_length(body.len(), false, out);
    out.extend_from_slice(&body);
}

fn decode_header(buf: &[u8]) -> Result<(Header, usize), DecodeError> {
    let (tag, tag_len) = Tag::decode(buf)?;
    if tag.number != TAG_HEADER {
        return Err(DecodeError::SchemaMismatch);
    }
    let (len, _, len_len) = read_length(&buf[tag_len..])?;
    let header_len = tag_len + len_len;
    if buf.len() < header_len + len {
        return Err(DecodeError::Truncated);
    }
    let body = &buf[header_len..header_len + len];

    let mut offset = 0;
    let (source_type, n) = read_octets(&body[offset..])?;
    offset += n;
    let (source_id, n) = read_octets(&body[offset..])?;
    offset += n;
    let (dest_type, n) = read_octets(&body[offset..])?;
    offset += n;
    let (dest_id, n) = read_octets(&body[offset..])?;
    offset += n;
    let (fixed, _n) = read_octets(&body[offset..])?;

    if fixed.len() < 16 + 8 + 4 + 1 + 4 + 4 {
        return Err(DecodeError::Malformed);
    }

    let header = Header {
        source: Endpoint::new(String::from_utf8_lossy(&source_type), String::from_utf8_lossy(&source_id)),
        destination: Endpoint::new(String::from_utf8_lossy(&dest_type), String::from_utf8_lossy(&dest_id)),
        uuid: BigEndian::read_u128(&fixed[0..16]),
        message_id: BigEndian::read_u64(&fixed[16..24]),
        sequence_num: BigEndian::read_u32(&fixed[24..28]),
        sequence_flag: fixed[28] != 0,
        status: BigEndian::read_i32(&fixed[29..33]),
        hop_info: BigEndian::read_u32(&fixed[33..37]),
    };

    Ok((header, header_len + len))
}

fn encode_body(body: &Body, out: &mut Vec<u8>) {
    let mut payload = Vec::new();
    let tag_number = match body {
        Body::Registration(msg) => {
            registration::encode(msg, &mut payload);
            TAG_BODY_REGISTRATION
        }
        Body::Service(msg) => {
            service::encode(msg, &mut payload);
            TAG_BODY_SERVICE
        }
        Body::Config(msg) => {
            config::encode(msg, &mut payload);
            TAG_BODY_CONFIG
        }
        Body::Heartbeat => TAG_BODY_HEARTBEAT,
        Body::Empty => TAG_BODY_EMPTY,
    };

    app_tag(tag_number).encode(out);
    encode_length(payload.len(), false, out);
    out.extend_from_slice(&payload);
}

fn decode_body(buf: &[u8]) -> Result<(Body, usize), DecodeError> {
    let (tag, tag_len) = Tag::decode(buf)?;
    let (len, _, len_len) = read_length(&buf[tag_len..])?;
    let header_len = tag_len + len_len;
    if buf.len() < header_len + len {
        return Err(DecodeError::Truncated);
    }
    let payload = &buf[header_len..header_len + len];

    let body = match tag.number {
        TAG_BODY_REGISTRATION => Body::Registration(registration::decode(payload)?),
        TAG_BODY_SERVICE => Body::Service(service::decode(payload)?),
        TAG_BODY_CONFIG => Body::Config(config::decode(payload)?),
        TAG_BODY_HEARTBEAT => Body::Heartbeat,
        TAG_BODY_EMPTY => Body::Empty,
        _ => return Err(DecodeError::SchemaMismatch),
    };

    Ok((body, header_len + len))
}

pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut inner = Vec::new();
    encode_header(&message.header, &mut inner);
    encode_body(&message.body, &mut inner);

    let mut out = Vec::new();
    app_tag(TAG_ROOT).encode(&mut out);
    encode_length(inner.len(), false, &mut out);
    out.extend_from_slice(&inner);
    out
}

pub fn decode_message(buf: &[u8]) -> Result<Message, DecodeError> {
    let (tag, tag_len) = Tag::decode(buf)?;
    if tag.number != TAG_ROOT {
        return Err(DecodeError::SchemaMismatch);
    }
    let (len, _, len_len) = read_length(&buf[tag_len..])?;
    let header_len = tag_len + len_len;
    if buf.len() < header_len + len {
        return Err(DecodeError::Truncated);
    }
    let inner = &buf[header_len..header_len + len];

    let (header, consumed) = decode_header(inner)?;
    let (body, body_consumed) = decode_body(&inner[consumed..])?;

    if consumed + body_consumed != inner.len() {
        return Err(DecodeError::TrailingData);
    }

    Ok(Message::new(header, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ParamValue, ServiceMessage};

    #[test]
    fn test_roundtrip_service_message() {
        let mut svc = ServiceMessage::new();
        svc.set(101, ParamValue::Utf8("hello".into()));

        let header = Header {
            source: Endpoint::new("y", "b1"),
            destination: Endpoint::new("x", "a1"),
            uuid: 42,
            message_id: 7,
            sequence_num: 0,
            sequence_flag: false,
            status: 0,
            hop_info: 0,
        };
        let message = Message::new(header, Body::Service(svc));

        let bytes = encode_message(&message);
        let decoded = decode_message(&bytes).unwrap();

        assert_eq!(decoded.header.source.daemon_id, "b1");
        assert_eq!(decoded.header.message_id, 7);
        match decoded.body {
            Body::Service(svc) => {
                assert_eq!(svc.get(101), Some(&ParamValue::Utf8("hello".into())));
            }
            _ => panic!("expected service body"),
        }
    }

    #[test]
    fn test_roundtrip_empty_body() {
        let header = Header {
            source: Endpoint::new("x", "a1"),
            destination: Endpoint::new("y", "b1"),
            uuid: 1,
            message_id: 1,
            sequence_num: 0,
            sequence_flag: false,
            status: 0,
            hop_info: 0,
        };
        let message = Message::new(header, Body::Heartbeat);
        let bytes = encode_message(&message);
        let decoded = decode_message(&bytes).unwrap();
        assert!(matches!(decoded.body, Body::Heartbeat));
    }
}
