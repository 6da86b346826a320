//! Endpoint-pair parsing.
//!
//! Flows are described on the command line as a comma separated list of
//! `srcIP:srcPort-dstIP:dstPort` entries, for instance
//! `172.21.1.1:8023-192.3.4.3:80,10.1.2.3:34565-4.3.2.5:443`. Each entry
//! becomes one flow record and the list order is the record order in the
//! exported datagram.

use std::{fmt, net::Ipv4Addr, str::FromStr};

use crate::Error;

/// One side of a flow: an IPv4 address and a transport port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// The IPv4 address
    pub addr: Ipv4Addr,
    /// The TCP or UDP port
    pub port: u16,
}

/// A source and destination endpoint describing one synthetic flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    /// Flow origin
    pub src: Endpoint,
    /// Flow destination
    pub dst: Endpoint,
}

impl EndpointPair {
    /// Return a copy of this pair with the destination port replaced.
    #[must_use]
    pub fn with_dst_port(mut self, port: u16) -> Self {
        self.dst.port = port;
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl fmt::Display for EndpointPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.src, self.dst)
    }
}

fn parse_half(entry: &str, half: &str) -> Result<Endpoint, Error> {
    let Some((addr, port)) = half.split_once(':') else {
        return Err(Error::Format {
            entry: entry.to_string(),
            reason: "missing ':' between address and port",
        });
    };
    if addr.is_empty() {
        return Err(Error::Format {
            entry: entry.to_string(),
            reason: "empty address",
        });
    }
    let port = port.parse::<u16>().map_err(|_| Error::Format {
        entry: entry.to_string(),
        reason: "port is not a decimal integer in 0..=65535",
    })?;
    let addr = addr.parse::<Ipv4Addr>().map_err(|_| Error::Address {
        addr: addr.to_string(),
    })?;

    Ok(Endpoint { addr, port })
}

impl FromStr for EndpointPair {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let entry = input.trim();
        if entry.is_empty() {
            return Err(Error::Format {
                entry: input.to_string(),
                reason: "empty entry",
            });
        }
        let Some((src, dst)) = entry.split_once('-') else {
            return Err(Error::Format {
                entry: entry.to_string(),
                reason: "missing '-' between source and destination",
            });
        };
        if dst.contains('-') {
            return Err(Error::Format {
                entry: entry.to_string(),
                reason: "more than one '-' separator",
            });
        }

        Ok(Self {
            src: parse_half(entry, src)?,
            dst: parse_half(entry, dst)?,
        })
    }
}

/// Parse a comma separated endpoint list, preserving entry order.
///
/// # Errors
///
/// Function will return [`Error::Format`] for an empty or malformed entry and
/// [`Error::Address`] when an address is not a dotted quad. The first bad
/// entry aborts the whole list.
pub fn parse_list(input: &str) -> Result<Vec<EndpointPair>, Error> {
    input.split(',').map(EndpointPair::from_str).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_documented_example() {
        let pairs = parse_list("172.21.1.1:8023-192.3.4.3:80,10.1.2.3:34565-4.3.2.5:443")
            .expect("valid list");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].src.addr, Ipv4Addr::new(172, 21, 1, 1));
        assert_eq!(pairs[0].src.port, 8023);
        assert_eq!(pairs[0].dst.addr, Ipv4Addr::new(192, 3, 4, 3));
        assert_eq!(pairs[0].dst.port, 80);
        assert_eq!(pairs[1].src.port, 34565);
        assert_eq!(pairs[1].dst.port, 443);
    }

    #[test]
    fn missing_source_port_is_format_error() {
        let err = parse_list("10.0.0.5-10.0.0.9:80").expect_err("source port missing");
        assert!(matches!(err, Error::Format { .. }), "{err:?}");
    }

    #[test]
    fn missing_dash_is_format_error() {
        let err = parse_list("10.0.0.5:1025").expect_err("no destination");
        assert!(matches!(err, Error::Format { .. }), "{err:?}");
    }

    #[test]
    fn non_numeric_port_is_format_error() {
        let err = parse_list("10.0.0.5:http-10.0.0.9:80").expect_err("named port");
        assert!(matches!(err, Error::Format { .. }), "{err:?}");
        let err = parse_list("10.0.0.5:70000-10.0.0.9:80").expect_err("port too wide");
        assert!(matches!(err, Error::Format { .. }), "{err:?}");
    }

    #[test]
    fn empty_entries_are_rejected() {
        assert!(matches!(parse_list(""), Err(Error::Format { .. })));
        assert!(matches!(
            parse_list("10.0.0.5:1-10.0.0.9:2,"),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn bad_destination_address_is_address_error() {
        let err = parse_list("10.0.0.5:1025-10.0.9:80").expect_err("three octets");
        assert_eq!(
            err,
            Error::Address {
                addr: "10.0.9".to_string()
            }
        );
    }

    #[test]
    fn whitespace_around_entries_is_ignored() {
        let pairs =
            parse_list("10.0.0.1:1-10.0.0.2:2, 10.0.0.3:3-10.0.0.4:4").expect("valid list");
        assert_eq!(pairs[1].src.addr, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn display_matches_input_syntax() {
        let pair: EndpointPair = "10.0.0.5:1025-10.0.0.9:80".parse().expect("valid entry");
        assert_eq!(pair.to_string(), "10.0.0.5:1025-10.0.0.9:80");
    }

    fn arb_pair() -> impl Strategy<Value = EndpointPair> {
        (any::<u32>(), any::<u16>(), any::<u32>(), any::<u16>()).prop_map(
            |(src, sport, dst, dport)| EndpointPair {
                src: Endpoint {
                    addr: Ipv4Addr::from(src),
                    port: sport,
                },
                dst: Endpoint {
                    addr: Ipv4Addr::from(dst),
                    port: dport,
                },
            },
        )
    }

    proptest! {
        #[test]
        fn list_length_and_order_preserved(pairs in prop::collection::vec(arb_pair(), 1..64)) {
            let input = pairs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let parsed = parse_list(&input).expect("rendered list must parse");
            prop_assert_eq!(parsed, pairs);
        }
    }
}
