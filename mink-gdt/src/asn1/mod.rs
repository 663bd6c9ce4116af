//! ASN.1 BER tag-length-value codec with a session-scoped overlay model (§4.1).
//!
//! A single [`tree::NodeArena`] instance mirrors one message type's schema; many concurrent
//! messages reuse the same arena by binding a different "overlay" payload per session id onto
//! the same schema nodes (§3 "Session-scoped overlay"), instead of allocating a fresh tree per
//! in-flight message.

pub mod decode;
pub mod encode;
pub mod error;
pub mod message;
pub mod overlay;
pub mod tag;
pub mod tree;
pub mod wire;

pub use decode::decode_root;
pub use encode::encode_node;
pub use error::DecodeError;
pub use message::{Body, Endpoint, Header, Message, MessageId, MessageIdGenerator};
pub use overlay::SessionIdPool;
pub use tag::{Complexity, LengthForm, Tag, TagClass, UniversalTag};
pub use tree::{NodeArena, NodeId, SessionId, Value};
pub use wire::{decode_message, encode_message};
