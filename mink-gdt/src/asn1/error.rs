//! Decode error taxonomy (§4.1 "Error conditions").
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Malformed length prefix, or a tag number that overflows 32 bits.
    Malformed,
    /// Unexpected end of buffer mid-TLV.
    Truncated,
    /// A TLV's tag didn't match the expected non-optional schema slot, and no CHOICE arm or
    /// ANY wildcard accepted it either.
    SchemaMismatch,
    /// Choice node with no matching arm.
    NoMatchingChoice,
    /// A value's declared length claims more bytes than its parent has left.
    BoundsExceeded,
    /// The root's declared length was not fully consumed by its children.
    TrailingData,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DecodeError::Malformed => "malformed tag or length prefix",
            DecodeError::Truncated => "unexpected end of buffer",
            DecodeError::SchemaMismatch => "tag did not match a non-optional schema slot",
            DecodeError::NoMatchingChoice => "no choice arm matched the decoded tag",
            DecodeError::BoundsExceeded => "value length exceeds parent bounds",
            DecodeError::TrailingData => "trailing bytes after root was fully decoded",
        };
        write!(f, "{}", msg)
    }
}

impl Error for DecodeError {}
