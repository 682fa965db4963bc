//! STUN message and attribute decoding errors
//!
//! This module defines error types that can occur while decoding STUN messages
//! and the attributes carried in them. All errors implement the standard
//! Error trait for proper error propagation and handling.

use std::fmt;
use std::fmt::Display;

use crate::codec::attr::AttrType;

/// STUN decoding errors
///
/// Represents the failure modes of turning raw bytes into a [`Message`] or
/// into one of the typed attributes.
///
/// [`Message`]: crate::codec::message::Message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer is too short to contain the structure being decoded
    ///
    /// Occurs when:
    /// - A message is shorter than the 20 byte header
    /// - The header length field points past the end of the buffer
    /// - An address attribute value is 4 bytes or less, or is missing address bytes
    /// - A CHANGE-REQUEST value is shorter than 4 bytes
    TooShort,

    /// Message header is malformed
    ///
    /// Occurs when the magic cookie is not 0x2112A442, the two leading bits
    /// of the message type are set, or the length is not a multiple of 4.
    Invalid,

    /// Address family byte is neither 0x01 (IPv4) nor 0x02 (IPv6)
    UnsupportedFamily(u8),

    /// The requested attribute is not present in the message
    AttributeNotFound(AttrType),
}

impl std::error::Error for CodecError {}

impl Display for CodecError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::TooShort => "unexpected end of buffer".fmt(fmt),
            CodecError::Invalid => "invalid stun message".fmt(fmt),
            CodecError::UnsupportedFamily(family) => {
                write!(fmt, "address attribute: bad family value {}", family)
            }
            CodecError::AttributeNotFound(t) => write!(fmt, "attribute {} not found", t),
        }
    }
}
