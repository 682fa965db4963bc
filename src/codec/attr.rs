//! RFC 3489 / RFC 5780 attributes used by NAT behavior discovery
//!
//! The standard STUN codecs only cover XOR-MAPPED-ADDRESS. Behavior discovery
//! additionally needs CHANGE-REQUEST (to ask the server to answer from its
//! alternate IP and/or port) and CHANGED-ADDRESS / OTHER-ADDRESS (to learn where
//! that alternate endpoint is).
//!
//! # Address attribute value
//! ```text
//! +--------+--------+--------+--------+
//! |Reserved| Family |   Port (2B, BE)  |
//! +--------+--------+--------+--------+
//! |   Address (4 bytes IPv4 / 16 bytes IPv6)
//! +--------+--------+--------+--------+
//! ```
//!
//! # CHANGE-REQUEST value
//! ```text
//! +--------+--------+--------+--------+
//! |0 0 0 0 0 0 0 0 ... 0 0 0 0 0 A B 0|   A = change IP (0x4), B = change port (0x2)
//! +--------+--------+--------+--------+
//! ```

use std::fmt;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::codec::errors::CodecError;
use crate::codec::message::Message;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

const CHANGE_IP_FLAG: u32 = 0x4;
const CHANGE_PORT_FLAG: u32 = 0x2;

/// STUN attribute type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrType(pub u16);

impl AttrType {
    pub const MAPPED_ADDRESS: AttrType = AttrType(0x0001);
    pub const CHANGE_REQUEST: AttrType = AttrType(0x0003);
    pub const CHANGED_ADDRESS: AttrType = AttrType(0x0005);
    pub const XOR_MAPPED_ADDRESS: AttrType = AttrType(0x0020);
    pub const OTHER_ADDRESS: AttrType = AttrType(0x802C);
}

impl Display for AttrType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AttrType::MAPPED_ADDRESS => "MAPPED-ADDRESS".fmt(fmt),
            AttrType::CHANGE_REQUEST => "CHANGE-REQUEST".fmt(fmt),
            AttrType::CHANGED_ADDRESS => "CHANGED-ADDRESS".fmt(fmt),
            AttrType::XOR_MAPPED_ADDRESS => "XOR-MAPPED-ADDRESS".fmt(fmt),
            AttrType::OTHER_ADDRESS => "OTHER-ADDRESS".fmt(fmt),
            AttrType(other) => write!(fmt, "0x{:04X}", other),
        }
    }
}

/// Plain (non-XOR) transport address attribute
///
/// Shared wire form of MAPPED-ADDRESS, CHANGED-ADDRESS and OTHER-ADDRESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAttribute {
    pub ip: IpAddr,
    pub port: u16,
}

impl AddressAttribute {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Decodes the attribute of type `t` from `msg`
    pub fn get_from(msg: &Message, t: AttrType) -> Result<Self, CodecError> {
        let value = msg.get(t).ok_or(CodecError::AttributeNotFound(t))?;
        decode_address(value)
    }

    /// Encodes this address and appends it to `msg` as type `t`
    pub fn add_to(&self, msg: &mut Message, t: AttrType) {
        msg.add(t, encode_address(self));
    }
}

impl From<SocketAddr> for AddressAttribute {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl Display for AddressAttribute {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.socket_addr().fmt(fmt)
    }
}

/// CHANGE-REQUEST attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeRequestAttribute {
    pub change_ip: bool,
    pub change_port: bool,
}

impl ChangeRequestAttribute {
    pub fn new(change_ip: bool, change_port: bool) -> Self {
        Self {
            change_ip,
            change_port,
        }
    }

    /// Decodes the attribute of type `t` from `msg`
    pub fn get_from(msg: &Message, t: AttrType) -> Result<Self, CodecError> {
        let value = msg.get(t).ok_or(CodecError::AttributeNotFound(t))?;
        decode_change_request(value)
    }

    /// Encodes this request and appends it to `msg` as type `t`
    pub fn add_to(&self, msg: &mut Message, t: AttrType) {
        msg.add(t, encode_change_request(self));
    }
}

impl Display for ChangeRequestAttribute {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "changeIP={} changePort={}",
            self.change_ip, self.change_port
        )
    }
}

/// Encodes an address attribute value
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are written in their 4 byte
/// IPv4 form.
pub fn encode_address(attr: &AddressAttribute) -> Vec<u8> {
    let ip = match attr.ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };

    let mut buf = Vec::with_capacity(20);
    // reserved
    buf.push(0);
    match ip {
        IpAddr::V4(v4) => {
            buf.push(FAMILY_IPV4);
            buf.extend_from_slice(&attr.port.to_be_bytes());
            buf.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.push(FAMILY_IPV6);
            buf.extend_from_slice(&attr.port.to_be_bytes());
            buf.extend_from_slice(&v6.octets());
        }
    }
    buf
}

/// Decodes an address attribute value
pub fn decode_address(buf: &[u8]) -> Result<AddressAttribute, CodecError> {
    if buf.len() <= 4 {
        return Err(CodecError::TooShort);
    }

    let family = buf[1];
    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let ip = match family {
        FAMILY_IPV4 => {
            let octets: [u8; 4] = buf
                .get(4..8)
                .and_then(|b| b.try_into().ok())
                .ok_or(CodecError::TooShort)?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            let octets: [u8; 16] = buf
                .get(4..20)
                .and_then(|b| b.try_into().ok())
                .ok_or(CodecError::TooShort)?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(CodecError::UnsupportedFamily(other)),
    };

    Ok(AddressAttribute { ip, port })
}

/// Encodes a CHANGE-REQUEST value
pub fn encode_change_request(attr: &ChangeRequestAttribute) -> Vec<u8> {
    let mut val = 0u32;
    if attr.change_ip {
        val |= CHANGE_IP_FLAG;
    }
    if attr.change_port {
        val |= CHANGE_PORT_FLAG;
    }
    val.to_be_bytes().to_vec()
}

/// Decodes a CHANGE-REQUEST value
pub fn decode_change_request(buf: &[u8]) -> Result<ChangeRequestAttribute, CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::TooShort);
    }
    let val = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    Ok(ChangeRequestAttribute {
        change_ip: val & CHANGE_IP_FLAG != 0,
        change_port: val & CHANGE_PORT_FLAG != 0,
    })
}
