//! The nflow payloads
//!
//! This library turns abstract flow descriptions -- endpoint pairs, an IP
//! protocol, a traffic magnitude -- into byte-exact `NetFlow` v5 export
//! datagrams. Sending those datagrams is the job of the `nflow` crate.

#![deny(clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![allow(clippy::multiple_crate_versions)]

pub mod clock;
pub mod endpoint;
pub mod netflow;
pub mod random;

pub use clock::{Clock, SystemClock};
pub use endpoint::{Endpoint, EndpointPair};
pub use netflow::{FlowParams, NetFlowV5, SnmpIndex};

/// Errors related to flow construction and encoding
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An endpoint-list entry is malformed
    #[error("Malformed endpoint entry '{entry}': {reason}")]
    Format {
        /// The offending entry, as written by the user
        entry: String,
        /// What is wrong with it
        reason: &'static str,
    },
    /// An address is not a valid IPv4 dotted quad
    #[error("Invalid IPv4 address '{addr}'")]
    Address {
        /// The offending address literal
        addr: String,
    },
    /// A value does not fit the width or bounds of its field
    #[error("{field} out of range: {value} exceeds {max}")]
    Range {
        /// Name of the field being computed
        field: &'static str,
        /// The value that was produced or requested
        value: u64,
        /// The largest permissible value
        max: u64,
    },
    /// A random draw was requested from an empty range
    #[error("Empty random range [{min}, {max})")]
    EmptyRange {
        /// Inclusive lower bound
        min: u64,
        /// Exclusive upper bound
        max: u64,
    },
    /// Header record count disagrees with the records handed to the encoder
    #[error("Header declares {declared} records but {actual} were supplied")]
    CountMismatch {
        /// Count carried in the header
        declared: u16,
        /// Number of records supplied
        actual: usize,
    },
    /// A buffer could not be read back as a `NetFlow` v5 datagram
    #[error("Could not decode NetFlow v5 datagram: {0}")]
    Decode(String),
}
