//! NAT behavior discovery (RFC 5780)
//!
//! Classifies the path between this host and a STUN server along two axes:
//! - Mapping: does the NAT reuse the same external address:port for every
//!   destination, or allocate a new one per destination address (or address
//!   and port)?
//! - Filtering: once a mapping exists, does the NAT accept inbound packets
//!   from any source, only from previously contacted addresses, or only from
//!   previously contacted address:port pairs?
//!
//! The combination yields the classic NAT type label:
//!
//! | natted | mapping     | filtering              | label                         |
//! |--------|-------------|------------------------|-------------------------------|
//! | no     | -           | independent            | Open to the Internet          |
//! | no     | -           | dependent              | UDP blocked by firewall       |
//! | yes    | dependent   | -                      | Symmetric NAT                 |
//! | yes    | independent | independent            | Full cone NAT                 |
//! | yes    | independent | address dependent      | Address-restricted cone NAT   |
//! | yes    | independent | address-port dependent | Port-restricted cone NAT      |

pub mod config;
pub mod discover;
pub mod errors;

pub use config::DiscoverConfig;
pub use discover::{Nats, discover};
pub use errors::DiscoverError;

use serde::{Serialize, Serializer};
use std::fmt;
use std::fmt::Display;

/// Whether a NAT behavior depends on the remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointDependencyType {
    /// Independent of the remote address and port
    #[default]
    Independent = 0,
    /// Depends on the remote address only
    AddrDependent = 1,
    /// Depends on the remote address and port
    AddrPortDependent = 2,
    /// The probe could not be completed
    Undefined = 3,
}

impl Display for EndpointDependencyType {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EndpointDependencyType::Independent => "independent".fmt(fmt),
            EndpointDependencyType::AddrDependent => "address dependent".fmt(fmt),
            EndpointDependencyType::AddrPortDependent => "address-port dependent".fmt(fmt),
            EndpointDependencyType::Undefined => "unspecified".fmt(fmt),
        }
    }
}

/// Serialized as its numeric code so the JSON output keeps the historical shape
impl Serialize for EndpointDependencyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Outcome of one discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverResult {
    pub is_natted: bool,
    pub mapping_behavior: EndpointDependencyType,
    pub filtering_behavior: EndpointDependencyType,
    pub port_preservation: bool,
    pub nat_type: String,
    #[serde(rename = "externalIP")]
    pub external_ip: String,
}

/// Human readable NAT type for a combination of observations
pub fn nat_type_label(
    is_natted: bool,
    mapping: EndpointDependencyType,
    filtering: EndpointDependencyType,
) -> &'static str {
    use EndpointDependencyType::*;

    if !is_natted {
        return if filtering == Independent {
            "Open to the Internet"
        } else {
            "UDP blocked by firewall"
        };
    }

    if mapping != Independent {
        return "Symmetric NAT";
    }

    match filtering {
        Independent => "Full cone NAT",
        AddrDependent => "Address-restricted cone NAT",
        AddrPortDependent => "Port-restricted cone NAT",
        Undefined => "(undefined)",
    }
}
