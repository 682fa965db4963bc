use std::fmt;
use std::fmt::Display;
use std::net::SocketAddr;

use crate::codec::attr::AttrType;
use crate::codec::errors::CodecError;
use crate::network::TransactionError;

/// Discovery failures
///
/// Every variant names the probe or attribute at fault so a failed run can be
/// diagnosed from the message alone.
#[derive(Debug)]
pub enum DiscoverError {
    /// A mapping binding request got no usable response
    ///
    /// `probe` is the index of the request: 0 is the primary server address,
    /// 1..=3 are the destinations derived from CHANGED-ADDRESS.
    Transaction {
        probe: usize,
        to: SocketAddr,
        source: TransactionError,
    },

    /// A required attribute is absent or malformed in a binding response
    MissingAttribute {
        probe: usize,
        attr: AttrType,
        source: CodecError,
    },

    /// The server answered a CHANGE-REQUEST from the unchanged IP or port
    ChangeRequestIgnored(&'static str),

    /// A filtering probe could not be carried out
    FilteringProbe {
        change: &'static str,
        source: TransactionError,
    },

    /// The filtering task ended without reporting a result
    FilteringAborted,
}

impl std::error::Error for DiscoverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoverError::Transaction { source, .. } => Some(source),
            DiscoverError::MissingAttribute { source, .. } => Some(source),
            DiscoverError::FilteringProbe { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Display for DiscoverError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DiscoverError::Transaction { probe, to, source } => {
                write!(fmt, "binding request #{} to {} failed: {}", probe, to, source)
            }
            DiscoverError::MissingAttribute { probe, attr, source } => {
                write!(
                    fmt,
                    "{} not found in response #{}: {}",
                    attr, probe, source
                )
            }
            DiscoverError::ChangeRequestIgnored(axis) => {
                write!(fmt, "CHANGE-REQUEST ignored ({})", axis)
            }
            DiscoverError::FilteringProbe { change, source } => {
                write!(fmt, "filtering probe ({}) failed: {}", change, source)
            }
            DiscoverError::FilteringAborted => "filtering behavior discovery aborted".fmt(fmt),
        }
    }
}
