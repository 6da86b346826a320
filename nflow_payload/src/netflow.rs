//! `NetFlow` v5 payload.
//!
//! [`NetFlowV5`] owns the per-exporter state a collector expects to see
//! evolve across datagrams: the start time from which `sys_uptime` is
//! measured and the export sequence counter. Records are synthesized from
//! user supplied [`EndpointPair`]s, everything else about a flow is either a
//! fixed constant or a bounded random draw.

use std::{net::Ipv4Addr, time::Duration};

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    Error,
    clock::{Clock, SystemClock},
    endpoint::EndpointPair,
    random::{random_bounded_int, random_u16, random_u32},
};

pub mod wire;

pub use wire::{Header, Record};

/// Engine type written in every header
pub const ENGINE_TYPE: u8 = 1;
/// Engine id written in every header
pub const ENGINE_ID: u8 = 0;
/// Baseline added to the measured uptime so that the first datagrams do not
/// report a near-zero uptime
pub const UPTIME_OFFSET_MS: u32 = 1_000;
/// Placeholder next hop, 172.199.15.1
pub const NEXT_HOP: Ipv4Addr = Ipv4Addr::new(172, 199, 15, 1);
/// Traffic magnitude of steady, non-spike flows
pub const DEFAULT_TRAFFIC_MAGNITUDE: u32 = 1_024;
/// Largest IPv4 prefix length
pub const MAX_PREFIX_LEN: u8 = 32;

// Each flow ends 10..500ms before the export and lasts 10..500ms.
const FLOW_AGE_MS: (u32, u32) = (10, 500);

/// How SNMP interface indices are assigned to records
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnmpIndex {
    /// Input and output interfaces are both 0
    #[default]
    Zero,
    /// Fictitious but distinct indices: 1 in / 2 out when the source address
    /// is numerically greater than the destination, 2 in / 1 out otherwise
    False,
}

impl SnmpIndex {
    /// The `(input, output)` interface pair for a flow between `src` and `dst`.
    #[must_use]
    pub fn interfaces(self, src: u32, dst: u32) -> (u16, u16) {
        match self {
            SnmpIndex::Zero => (0, 0),
            SnmpIndex::False if src > dst => (1, 2),
            SnmpIndex::False => (2, 1),
        }
    }
}

impl From<bool> for SnmpIndex {
    fn from(false_index: bool) -> Self {
        if false_index {
            SnmpIndex::False
        } else {
            SnmpIndex::Zero
        }
    }
}

/// Per-batch parameters shared by every record in the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowParams {
    /// Exclusive upper bound for packet and octet counts
    pub traffic_magnitude: u32,
    /// IP protocol number
    pub protocol: u8,
    /// Source prefix mask length, at most 32
    pub src_mask: u8,
    /// Interface index policy
    pub snmp_index: SnmpIndex,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            traffic_magnitude: DEFAULT_TRAFFIC_MAGNITUDE,
            protocol: 6,
            src_mask: 24,
            snmp_index: SnmpIndex::Zero,
        }
    }
}

impl FlowParams {
    /// Validate the parameters
    ///
    /// # Errors
    ///
    /// Function will return [`Error::EmptyRange`] for a zero traffic magnitude
    /// and [`Error::Range`] for a source mask longer than 32 bits.
    pub fn valid(&self) -> Result<(), Error> {
        if self.traffic_magnitude == 0 {
            return Err(Error::EmptyRange { min: 0, max: 0 });
        }
        if self.src_mask > MAX_PREFIX_LEN {
            return Err(Error::Range {
                field: "src_mask",
                value: u64::from(self.src_mask),
                max: u64::from(MAX_PREFIX_LEN),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
/// `NetFlow` v5 payload generator
pub struct NetFlowV5<C = SystemClock> {
    clock: C,
    start: Duration,
    flow_sequence: u32,
    sys_uptime: u32,
}

impl Default for NetFlowV5<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl NetFlowV5<SystemClock> {
    /// Create a new generator measuring uptime from now
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C> NetFlowV5<C>
where
    C: Clock,
{
    /// Create a new generator whose start time is the clock's current reading
    pub fn with_clock(clock: C) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            flow_sequence: 0,
            sys_uptime: 0,
        }
    }

    /// Sequence number of the most recently built header, 0 before the first
    #[must_use]
    pub fn flow_sequence(&self) -> u32 {
        self.flow_sequence
    }

    /// Uptime in milliseconds captured by the most recently built header
    #[must_use]
    pub fn sys_uptime(&self) -> u32 {
        self.sys_uptime
    }

    /// Generate the header for a batch of `record_count` records.
    ///
    /// The uptime snapshot and sequence number are stored on `self` and the
    /// records of the same batch are built against them, so this must be
    /// called before [`NetFlowV5::generate_flow_record`].
    ///
    /// # Errors
    ///
    /// Function will return [`Error::Range`] if the record count, uptime or
    /// epoch seconds do not fit their 16 or 32 bit fields. State is not
    /// modified on error.
    pub fn generate_header(&mut self, record_count: usize) -> Result<Header, Error> {
        let count = u16::try_from(record_count).map_err(|_| Error::Range {
            field: "count",
            value: record_count as u64,
            max: u64::from(u16::MAX),
        })?;

        let now = self.clock.now();
        let elapsed_ms = now.saturating_sub(self.start).as_millis();
        let uptime = elapsed_ms.saturating_add(u128::from(UPTIME_OFFSET_MS));
        let sys_uptime = u32::try_from(uptime).map_err(|_| Error::Range {
            field: "sys_uptime",
            value: u64::try_from(uptime).unwrap_or(u64::MAX),
            max: u64::from(u32::MAX),
        })?;
        let unix_secs = u32::try_from(now.as_secs()).map_err(|_| Error::Range {
            field: "unix_secs",
            value: now.as_secs(),
            max: u64::from(u32::MAX),
        })?;

        self.sys_uptime = sys_uptime;
        self.flow_sequence = self.flow_sequence.wrapping_add(1);

        Ok(Header {
            version: wire::VERSION,
            count,
            sys_uptime,
            unix_secs,
            unix_nsecs: now.subsec_nanos(),
            flow_sequence: self.flow_sequence,
            engine_type: ENGINE_TYPE,
            engine_id: ENGINE_ID,
            sampling_interval: 0,
        })
    }

    /// Generate one flow record for `pair` against the current batch uptime.
    ///
    /// # Errors
    ///
    /// Function will return an error if `params` are invalid, see
    /// [`FlowParams::valid`].
    pub fn generate_flow_record<R>(
        &self,
        pair: &EndpointPair,
        params: &FlowParams,
        rng: &mut R,
    ) -> Result<Record, Error>
    where
        R: Rng + ?Sized,
    {
        params.valid()?;

        let srcaddr = u32::from(pair.src.addr);
        let dstaddr = u32::from(pair.dst.addr);
        let (input, output) = params.snmp_index.interfaces(srcaddr, dstaddr);

        let last = self
            .sys_uptime
            .saturating_sub(random_bounded_int(rng, FLOW_AGE_MS.0, FLOW_AGE_MS.1)?);
        let first = last.saturating_sub(random_bounded_int(rng, FLOW_AGE_MS.0, FLOW_AGE_MS.1)?);

        let record = Record {
            srcaddr,
            dstaddr,
            nexthop: u32::from(NEXT_HOP),
            input,
            output,
            d_pkts: random_u32(rng, params.traffic_magnitude)?,
            d_octets: random_u32(rng, params.traffic_magnitude)?,
            first,
            last,
            srcport: pair.src.port,
            dstport: pair.dst.port,
            pad1: 0,
            tcp_flags: 0,
            prot: params.protocol,
            tos: 0,
            src_as: random_u16(rng, u16::MAX)?,
            dst_as: random_u16(rng, u16::MAX)?,
            src_mask: params.src_mask,
            dst_mask: random_bounded_int(rng, 0, MAX_PREFIX_LEN)?,
            pad2: 0,
        };
        trace!(
            "S&D: {srcaddr:x} {dstaddr:x} {} {}, uptime {} first {first} last {last}",
            record.dstport, record.input, self.sys_uptime
        );
        Ok(record)
    }

    /// Build and encode one datagram holding a record per pair, in order.
    ///
    /// # Errors
    ///
    /// Function will return an error if `params` are invalid, if `pairs` is
    /// too long to fit one UDP datagram, or if the header cannot be
    /// represented. Nothing is encoded and the sequence counter is untouched
    /// in any of these cases.
    pub fn build_batch<R>(
        &mut self,
        pairs: &[EndpointPair],
        params: &FlowParams,
        rng: &mut R,
    ) -> Result<Bytes, Error>
    where
        R: Rng + ?Sized,
    {
        params.valid()?;
        if pairs.len() > wire::MAX_RECORDS {
            return Err(Error::Range {
                field: "records per datagram",
                value: pairs.len() as u64,
                max: wire::MAX_RECORDS as u64,
            });
        }

        let header = self.generate_header(pairs.len())?;
        let records = pairs
            .iter()
            .map(|pair| self.generate_flow_record(pair, params, rng))
            .collect::<Result<Vec<_>, _>>()?;
        let bytes = wire::encode(&header, &records)?;

        debug!(
            sequence = header.flow_sequence,
            uptime = header.sys_uptime,
            records = records.len(),
            bytes = bytes.len(),
            "built NetFlow v5 batch"
        );
        Ok(bytes)
    }
}
