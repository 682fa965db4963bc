//! STUN message codec (RFC 5389)
//!
//! Only what behavior discovery needs: building binding requests and
//! responses, a list of raw attributes, and the XOR-MAPPED-ADDRESS attribute.
//!
//! # Message Header Format (20 bytes)
//! ```text
//! +--------+--------+--------+--------+
//! |0 0| Message Type  | Message Length |
//! +--------+--------+--------+--------+
//! |      Magic Cookie (0x2112A442)     |
//! +--------+--------+--------+--------+
//! |      Transaction ID (12 bytes)     |
//! +--------+--------+--------+--------+
//! ```
//!
//! Attributes follow the header as type (2B) / length (2B) / value, each value
//! padded to a 4 byte boundary.

use bytes::{BufMut, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::codec::attr::{AddressAttribute, AttrType};
use crate::codec::errors::CodecError;

/// STUN magic cookie
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Message header length in bytes
pub const HEADER_LEN: usize = 20;

/// Binding method
pub const METHOD_BINDING: u16 = 0x0001;

pub type TransactionId = [u8; 12];

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

/// STUN message type: method plus class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageType {
    pub method: u16,
    pub class: MessageClass,
}

impl MessageType {
    pub const BINDING_REQUEST: MessageType = MessageType {
        method: METHOD_BINDING,
        class: MessageClass::Request,
    };

    pub const BINDING_SUCCESS: MessageType = MessageType {
        method: METHOD_BINDING,
        class: MessageClass::SuccessResponse,
    };

    /// Encodes method and class into the 14 bit type field
    ///
    /// ```text
    ///  0                 1
    ///  2  3  4 5 6 7 8 9 0 1 2 3 4 5
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
    /// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
    /// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn value(&self) -> u16 {
        let class_bits: u16 = match self.class {
            MessageClass::Request => 0b00,
            MessageClass::Indication => 0b01,
            MessageClass::SuccessResponse => 0b10,
            MessageClass::ErrorResponse => 0b11,
        };
        let method = self.method;

        (method & 0x000F)
            | ((class_bits & 0x01) << 4)
            | ((method & 0x0070) << 1)
            | ((class_bits & 0x02) << 7)
            | ((method & 0x0F80) << 2)
    }

    pub fn from_value(v: u16) -> Self {
        let method = (v & 0x000F) | ((v & 0x00E0) >> 1) | ((v & 0x3E00) >> 2);
        let class = match ((v >> 4) & 0x01) | ((v >> 7) & 0x02) {
            0b00 => MessageClass::Request,
            0b01 => MessageClass::Indication,
            0b10 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        };
        MessageType { method, class }
    }
}

/// Attribute as carried on the wire, value undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub typ: AttrType,
    pub value: Vec<u8>,
}

/// A decoded or to-be-encoded STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub typ: MessageType,
    pub transaction_id: TransactionId,
    attributes: Vec<RawAttribute>,
}

impl Message {
    pub fn new(typ: MessageType, transaction_id: TransactionId) -> Self {
        Self {
            typ,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Binding request with a fresh random transaction ID
    pub fn binding_request() -> Self {
        Self::new(MessageType::BINDING_REQUEST, rand::random())
    }

    /// Binding success response answering `transaction_id`
    pub fn binding_success(transaction_id: TransactionId) -> Self {
        Self::new(MessageType::BINDING_SUCCESS, transaction_id)
    }

    pub fn add(&mut self, typ: AttrType, value: Vec<u8>) {
        self.attributes.push(RawAttribute { typ, value });
    }

    /// First attribute of the given type
    pub fn get(&self, typ: AttrType) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|a| a.typ == typ)
            .map(|a| a.value.as_slice())
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len: usize = self
            .attributes
            .iter()
            .map(|a| 4 + padded_len(a.value.len()))
            .sum();

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
        buf.put_u16(self.typ.value());
        buf.put_u16(body_len as u16);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&self.transaction_id);

        for attr in &self.attributes {
            buf.put_u16(attr.typ.0);
            buf.put_u16(attr.value.len() as u16);
            buf.put_slice(&attr.value);
            buf.put_bytes(0, padded_len(attr.value.len()) - attr.value.len());
        }
        buf.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::TooShort);
        }

        let raw_type = u16::from_be_bytes([buf[0], buf[1]]);
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if raw_type & 0xC000 != 0 || cookie != MAGIC_COOKIE || length % 4 != 0 {
            return Err(CodecError::Invalid);
        }

        let end = HEADER_LEN + length;
        if buf.len() < end {
            return Err(CodecError::TooShort);
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&buf[8..HEADER_LEN]);

        let mut attributes = Vec::new();
        let mut offset = HEADER_LEN;
        while offset + 4 <= end {
            let typ = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let len = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            let start = offset + 4;
            if start + len > end {
                return Err(CodecError::TooShort);
            }
            attributes.push(RawAttribute {
                typ: AttrType(typ),
                value: buf[start..start + len].to_vec(),
            });
            offset = start + padded_len(len);
        }

        Ok(Message {
            typ: MessageType::from_value(raw_type),
            transaction_id,
            attributes,
        })
    }

    /// Appends XOR-MAPPED-ADDRESS for `addr`
    pub fn set_xor_mapped_address(&mut self, addr: SocketAddr) {
        let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
        let mut value = Vec::with_capacity(20);
        value.push(0);
        match addr.ip() {
            IpAddr::V4(v4) => {
                value.push(0x01);
                value.extend_from_slice(&port.to_be_bytes());
                value.extend_from_slice(&(u32::from(v4) ^ MAGIC_COOKIE).to_be_bytes());
            }
            IpAddr::V6(v6) => {
                value.push(0x02);
                value.extend_from_slice(&port.to_be_bytes());
                let mut octets = v6.octets();
                xor_with_key(&mut octets, &self.transaction_id);
                value.extend_from_slice(&octets);
            }
        }
        self.add(AttrType::XOR_MAPPED_ADDRESS, value);
    }

    pub fn xor_mapped_address(&self) -> Result<SocketAddr, CodecError> {
        let value = self
            .get(AttrType::XOR_MAPPED_ADDRESS)
            .ok_or(CodecError::AttributeNotFound(AttrType::XOR_MAPPED_ADDRESS))?;
        if value.len() <= 4 {
            return Err(CodecError::TooShort);
        }

        let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
        let ip = match value[1] {
            0x01 => {
                let xor_ip: [u8; 4] = value
                    .get(4..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(CodecError::TooShort)?;
                IpAddr::V4(Ipv4Addr::from(u32::from_be_bytes(xor_ip) ^ MAGIC_COOKIE))
            }
            0x02 => {
                let mut octets: [u8; 16] = value
                    .get(4..20)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(CodecError::TooShort)?;
                xor_with_key(&mut octets, &self.transaction_id);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => return Err(CodecError::UnsupportedFamily(other)),
        };
        Ok(SocketAddr::new(ip, port))
    }

    /// Reflexive address, preferring XOR-MAPPED-ADDRESS over MAPPED-ADDRESS
    pub fn mapped_address(&self) -> Result<SocketAddr, CodecError> {
        match self.xor_mapped_address() {
            Ok(addr) => Ok(addr),
            Err(CodecError::AttributeNotFound(_)) => {
                AddressAttribute::get_from(self, AttrType::MAPPED_ADDRESS)
                    .map(|a| a.socket_addr())
            }
            Err(e) => Err(e),
        }
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// XORs an IPv6 address with magic cookie || transaction ID
fn xor_with_key(octets: &mut [u8; 16], transaction_id: &TransactionId) {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    for (i, b) in octets.iter_mut().enumerate() {
        *b ^= if i < 4 { cookie[i] } else { transaction_id[i - 4] };
    }
}
