//! `NetFlow` v5 wire layout.
//!
//! The datagram is a 24 byte header followed by `count` 48 byte records, all
//! fields big-endian. The layout is not self-describing: no length prefix is
//! written and a collector is assumed to know the format.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

/// `NetFlow` protocol version carried in every header
pub const VERSION: u16 = 5;
/// Encoded header size in bytes
pub const HEADER_LEN: usize = 24;
/// Encoded record size in bytes
pub const RECORD_LEN: usize = 48;
/// Largest UDP payload deliverable over IPv4
pub const MAX_DATAGRAM_LEN: usize = 65_507;
/// Most records that fit in one datagram
pub const MAX_RECORDS: usize = (MAX_DATAGRAM_LEN - HEADER_LEN) / RECORD_LEN;

/// `NetFlow` v5 export header (24 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// `NetFlow` version, always 5
    pub version: u16,
    /// Number of records that follow
    pub count: u16,
    /// Milliseconds since the exporter started
    pub sys_uptime: u32,
    /// Whole seconds since the Unix epoch
    pub unix_secs: u32,
    /// Nanosecond remainder within the current second
    pub unix_nsecs: u32,
    /// Export sequence number
    pub flow_sequence: u32,
    /// Type of flow switching engine
    pub engine_type: u8,
    /// Slot number of the flow switching engine
    pub engine_id: u8,
    /// Sampling mode and interval, zero when unsampled
    pub sampling_interval: u16,
}

/// `NetFlow` v5 flow record (48 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Source IPv4 address
    pub srcaddr: u32,
    /// Destination IPv4 address
    pub dstaddr: u32,
    /// Next hop router address
    pub nexthop: u32,
    /// SNMP index of the input interface
    pub input: u16,
    /// SNMP index of the output interface
    pub output: u16,
    /// Packets in the flow
    pub d_pkts: u32,
    /// Layer 3 bytes in the flow
    pub d_octets: u32,
    /// Uptime at the start of the flow
    pub first: u32,
    /// Uptime when the last packet of the flow was seen
    pub last: u32,
    /// TCP/UDP source port
    pub srcport: u16,
    /// TCP/UDP destination port
    pub dstport: u16,
    /// Unused
    pub pad1: u8,
    /// Cumulative OR of TCP flags
    pub tcp_flags: u8,
    /// IP protocol number
    pub prot: u8,
    /// IP type of service
    pub tos: u8,
    /// Source autonomous system number
    pub src_as: u16,
    /// Destination autonomous system number
    pub dst_as: u16,
    /// Source address prefix mask length
    pub src_mask: u8,
    /// Destination address prefix mask length
    pub dst_mask: u8,
    /// Unused
    pub pad2: u16,
}

/// Exact encoded length of a datagram holding `count` records.
#[must_use]
pub const fn encoded_len(count: usize) -> usize {
    HEADER_LEN + RECORD_LEN * count
}

fn put_header<B>(header: &Header, buf: &mut B)
where
    B: BufMut,
{
    buf.put_u16(header.version);
    buf.put_u16(header.count);
    buf.put_u32(header.sys_uptime);
    buf.put_u32(header.unix_secs);
    buf.put_u32(header.unix_nsecs);
    buf.put_u32(header.flow_sequence);
    buf.put_u8(header.engine_type);
    buf.put_u8(header.engine_id);
    buf.put_u16(header.sampling_interval);
}

fn put_record<B>(record: &Record, buf: &mut B)
where
    B: BufMut,
{
    buf.put_u32(record.srcaddr);
    buf.put_u32(record.dstaddr);
    buf.put_u32(record.nexthop);
    buf.put_u16(record.input);
    buf.put_u16(record.output);
    buf.put_u32(record.d_pkts);
    buf.put_u32(record.d_octets);
    buf.put_u32(record.first);
    buf.put_u32(record.last);
    buf.put_u16(record.srcport);
    buf.put_u16(record.dstport);
    buf.put_u8(record.pad1);
    buf.put_u8(record.tcp_flags);
    buf.put_u8(record.prot);
    buf.put_u8(record.tos);
    buf.put_u16(record.src_as);
    buf.put_u16(record.dst_as);
    buf.put_u8(record.src_mask);
    buf.put_u8(record.dst_mask);
    buf.put_u16(record.pad2);
}

/// Serialize a header and its records into one contiguous datagram.
///
/// # Errors
///
/// Function will return [`Error::CountMismatch`] if `header.count` is not the
/// number of `records`.
pub fn encode(header: &Header, records: &[Record]) -> Result<Bytes, Error> {
    if usize::from(header.count) != records.len() {
        return Err(Error::CountMismatch {
            declared: header.count,
            actual: records.len(),
        });
    }

    let mut buf = BytesMut::with_capacity(encoded_len(records.len()));
    put_header(header, &mut buf);
    for record in records {
        put_record(record, &mut buf);
    }
    debug_assert_eq!(buf.len(), encoded_len(records.len()));
    Ok(buf.freeze())
}

/// Parse a datagram produced by [`encode`].
///
/// # Errors
///
/// Function will return [`Error::Decode`] if the buffer is shorter than a
/// header, carries a version other than 5, or its length disagrees with the
/// record count in the header.
pub fn decode(mut buf: &[u8]) -> Result<(Header, Vec<Record>), Error> {
    if buf.len() < HEADER_LEN {
        return Err(Error::Decode(format!(
            "{} bytes is shorter than the {HEADER_LEN} byte header",
            buf.len()
        )));
    }

    let header = Header {
        version: buf.get_u16(),
        count: buf.get_u16(),
        sys_uptime: buf.get_u32(),
        unix_secs: buf.get_u32(),
        unix_nsecs: buf.get_u32(),
        flow_sequence: buf.get_u32(),
        engine_type: buf.get_u8(),
        engine_id: buf.get_u8(),
        sampling_interval: buf.get_u16(),
    };
    if header.version != VERSION {
        return Err(Error::Decode(format!(
            "version {} is not {VERSION}",
            header.version
        )));
    }
    let count = usize::from(header.count);
    if buf.len() != RECORD_LEN * count {
        return Err(Error::Decode(format!(
            "header declares {count} records, body holds {} bytes",
            buf.len()
        )));
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(Record {
            srcaddr: buf.get_u32(),
            dstaddr: buf.get_u32(),
            nexthop: buf.get_u32(),
            input: buf.get_u16(),
            output: buf.get_u16(),
            d_pkts: buf.get_u32(),
            d_octets: buf.get_u32(),
            first: buf.get_u32(),
            last: buf.get_u32(),
            srcport: buf.get_u16(),
            dstport: buf.get_u16(),
            pad1: buf.get_u8(),
            tcp_flags: buf.get_u8(),
            prot: buf.get_u8(),
            tos: buf.get_u8(),
            src_as: buf.get_u16(),
            dst_as: buf.get_u16(),
            src_mask: buf.get_u8(),
            dst_mask: buf.get_u8(),
            pad2: buf.get_u16(),
        });
    }
    Ok((header, records))
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn sample_header(count: u16) -> Header {
        Header {
            version: VERSION,
            count,
            sys_uptime: 0x0102_0304,
            unix_secs: 1_700_000_000,
            unix_nsecs: 999_999_999,
            flow_sequence: 7,
            engine_type: 1,
            engine_id: 0,
            sampling_interval: 0,
        }
    }

    fn sample_record() -> Record {
        Record {
            srcaddr: 0x0A00_0005,
            dstaddr: 0x0A00_0009,
            nexthop: 0xACC7_0F01,
            input: 2,
            output: 1,
            d_pkts: 10,
            d_octets: 1000,
            first: 100,
            last: 200,
            srcport: 1025,
            dstport: 80,
            pad1: 0,
            tcp_flags: 0,
            prot: 6,
            tos: 0,
            src_as: 64512,
            dst_as: 65000,
            src_mask: 24,
            dst_mask: 16,
            pad2: 0,
        }
    }

    #[test]
    fn header_layout_is_big_endian() {
        let bytes = encode(&sample_header(0), &[]).expect("empty batch encodes");
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..2], &[0, 5]);
        assert_eq!(&bytes[2..4], &[0, 0]);
        assert_eq!(&bytes[4..8], &[1, 2, 3, 4]);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 7]);
        assert_eq!(bytes[20], 1);
        assert_eq!(bytes[21], 0);
    }

    #[test]
    fn record_layout_offsets() {
        let bytes = encode(&sample_header(1), &[sample_record()]).expect("encodes");
        let rec = &bytes[HEADER_LEN..];
        assert_eq!(rec.len(), RECORD_LEN);
        assert_eq!(&rec[0..4], &[10, 0, 0, 5]);
        assert_eq!(&rec[4..8], &[10, 0, 0, 9]);
        assert_eq!(&rec[8..12], &[172, 199, 15, 1]);
        assert_eq!(&rec[12..14], &[0, 2]);
        assert_eq!(&rec[14..16], &[0, 1]);
        assert_eq!(&rec[32..34], &1025u16.to_be_bytes());
        assert_eq!(&rec[34..36], &80u16.to_be_bytes());
        assert_eq!(rec[38], 6);
        assert_eq!(rec[44], 24);
        assert_eq!(rec[45], 16);
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let err = encode(&sample_header(2), &[sample_record()]).expect_err("count is wrong");
        assert_eq!(
            err,
            Error::CountMismatch {
                declared: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn decode_rejects_malformed_buffers() {
        assert!(matches!(decode(&[0; 10]), Err(Error::Decode(_))));

        let mut wrong_version = encode(&sample_header(0), &[]).expect("encodes").to_vec();
        wrong_version[1] = 9;
        assert!(matches!(decode(&wrong_version), Err(Error::Decode(_))));

        let truncated = encode(&sample_header(1), &[sample_record()]).expect("encodes");
        assert!(matches!(
            decode(&truncated[..truncated.len() - 1]),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn max_records_fit_in_a_datagram() {
        assert!(encoded_len(MAX_RECORDS) <= MAX_DATAGRAM_LEN);
        assert!(encoded_len(MAX_RECORDS + 1) > MAX_DATAGRAM_LEN);
    }

    prop_compose! {
        fn arb_record()(
            addrs in any::<(u32, u32, u32)>(),
            ifaces in any::<(u16, u16)>(),
            counts in any::<(u32, u32, u32, u32)>(),
            ports in any::<(u16, u16)>(),
            bytes in any::<(u8, u8, u8, u8)>(),
            asns in any::<(u16, u16)>(),
            masks in any::<(u8, u8)>(),
            pad2: u16,
        ) -> Record {
            Record {
                srcaddr: addrs.0,
                dstaddr: addrs.1,
                nexthop: addrs.2,
                input: ifaces.0,
                output: ifaces.1,
                d_pkts: counts.0,
                d_octets: counts.1,
                first: counts.2,
                last: counts.3,
                srcport: ports.0,
                dstport: ports.1,
                pad1: bytes.0,
                tcp_flags: bytes.1,
                prot: bytes.2,
                tos: bytes.3,
                src_as: asns.0,
                dst_as: asns.1,
                src_mask: masks.0,
                dst_mask: masks.1,
                pad2,
            }
        }
    }

    proptest! {
        #[test]
        fn decode_reproduces_every_field(
            records in prop::collection::vec(arb_record(), 0..64),
            uptime: u32,
            secs: u32,
            nsecs: u32,
            sequence: u32,
        ) {
            let header = Header {
                version: VERSION,
                count: u16::try_from(records.len()).expect("fewer than 64 records"),
                sys_uptime: uptime,
                unix_secs: secs,
                unix_nsecs: nsecs,
                flow_sequence: sequence,
                engine_type: 1,
                engine_id: 0,
                sampling_interval: 0,
            };
            let bytes = encode(&header, &records).expect("consistent batch encodes");
            prop_assert_eq!(bytes.len(), encoded_len(records.len()));

            let (decoded_header, decoded_records) = decode(&bytes).expect("own output decodes");
            prop_assert_eq!(decoded_header, header);
            prop_assert_eq!(decoded_records, records);
        }
    }
}
