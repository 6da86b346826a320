//! The UDP `NetFlow` generator.
//!
//! ## Metrics
//!
//! `bytes_written`: Bytes written successfully
//! `packets_sent`: Datagrams written successfully
//! `records_sent`: Flow records carried by successful datagrams
//! `request_failure`: Number of failed writes; each occurrence drops the batch
//!

use std::{io, net::SocketAddr, time::Duration};

use metrics::counter;
use nflow_payload::{EndpointPair, FlowParams, NetFlowV5};
use rand::rngs::SmallRng;
use tokio::{
    net::{UdpSocket, lookup_host},
    sync::broadcast,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::General;
use crate::config::Collector;

/// Errors produced by [`Udp`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Building the batch failed
    #[error("Failed to build NetFlow batch: {0}")]
    Payload(#[from] nflow_payload::Error),
    /// The collector could not be resolved
    #[error("Failed to resolve collector {target}: {source}")]
    Resolution {
        /// Collector as configured
        target: String,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The collector resolved to no addresses
    #[error("Collector {target} resolved to no addresses")]
    NoAddress {
        /// Collector as configured
        target: String,
    },
    /// Error binding or connecting the UDP socket
    #[error("Failed to open UDP socket to {peer}: {source}")]
    Bind {
        /// Collector address
        peer: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The datagram could not be written
    #[error("Failed to send datagram to {peer}: {source}")]
    Transmission {
        /// Collector address
        peer: SocketAddr,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The datagram was only partially written
    #[error("Short write to {peer}: {written} of {expected} bytes")]
    ShortWrite {
        /// Collector address
        peer: SocketAddr,
        /// Bytes written
        written: usize,
        /// Bytes in the datagram
        expected: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
/// Configuration of one [`Udp`] generator.
pub struct Config {
    /// The collector to send to
    pub collector: Collector,
    /// One record per pair, in order, in every batch
    pub pairs: Vec<EndpointPair>,
    /// Parameters shared by every record
    pub params: FlowParams,
    /// Period between batches, `None` to send a single batch
    pub interval: Option<Duration>,
}

/// A UDP socket connected to the collector.
#[derive(Debug)]
pub struct Connection {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl Connection {
    /// Resolve `host:port` and connect a UDP socket to the first address.
    ///
    /// # Errors
    ///
    /// Function will return [`Error::Resolution`] or [`Error::NoAddress`] if
    /// the collector cannot be resolved and [`Error::Bind`] if no socket can
    /// be opened towards it.
    pub async fn open(host: &str, port: u16) -> Result<Self, Error> {
        let target = format!("{host}:{port}");
        let peer = lookup_host((host, port))
            .await
            .map_err(|source| Error::Resolution {
                target: target.clone(),
                source: Box::new(source),
            })?
            .next()
            .ok_or(Error::NoAddress { target })?;

        let local: SocketAddr = if peer.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| Error::Bind {
                peer,
                source: Box::new(source),
            })?;
        socket.connect(peer).await.map_err(|source| Error::Bind {
            peer,
            source: Box::new(source),
        })?;
        debug!("UDP socket {local} connected to {peer}");

        Ok(Self { socket, peer })
    }

    /// The resolved collector address
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write `buf` as a single datagram.
    ///
    /// # Errors
    ///
    /// Function will return [`Error::Transmission`] if the write fails and
    /// [`Error::ShortWrite`] if only part of `buf` was sent.
    pub async fn send(&self, buf: &[u8]) -> Result<usize, Error> {
        let written = self
            .socket
            .send(buf)
            .await
            .map_err(|source| Error::Transmission {
                peer: self.peer,
                source: Box::new(source),
            })?;
        if written != buf.len() {
            return Err(Error::ShortWrite {
                peer: self.peer,
                written,
                expected: buf.len(),
            });
        }
        Ok(written)
    }
}

#[derive(Debug)]
/// The UDP generator.
///
/// This generator builds `NetFlow` v5 batches from a fixed endpoint list and
/// sends them to the collector, once or on a fixed period.
pub struct Udp {
    id: Option<String>,
    collector: Collector,
    pairs: Vec<EndpointPair>,
    params: FlowParams,
    interval: Option<Duration>,
    netflow: NetFlowV5,
    rng: SmallRng,
    metric_labels: Vec<(String, String)>,
}

impl Udp {
    /// Create a new [`Udp`] instance. The exporter uptime is measured from
    /// this call.
    #[must_use]
    pub fn new(general: General, config: Config, rng: SmallRng) -> Self {
        let mut metric_labels = vec![
            ("component".to_string(), "generator".to_string()),
            ("component_name".to_string(), "udp".to_string()),
        ];
        if let Some(id) = &general.id {
            metric_labels.push(("id".to_string(), id.clone()));
        }

        Self {
            id: general.id,
            collector: config.collector,
            pairs: config.pairs,
            params: config.params,
            interval: config.interval,
            netflow: NetFlowV5::new(),
            rng,
            metric_labels,
        }
    }

    /// The ID of this generator
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Endpoint pairs sent in every batch
    #[must_use]
    pub fn pairs(&self) -> &[EndpointPair] {
        &self.pairs
    }

    /// Record parameters used for every batch
    #[must_use]
    pub fn params(&self) -> &FlowParams {
        &self.params
    }

    async fn send_batch(&mut self, connection: &Connection) -> Result<(), Error> {
        let batch = self
            .netflow
            .build_batch(&self.pairs, &self.params, &mut self.rng)?;
        let bytes = connection.send(&batch).await?;

        counter!("bytes_written", &self.metric_labels).increment(bytes as u64);
        counter!("packets_sent", &self.metric_labels).increment(1);
        counter!("records_sent", &self.metric_labels).increment(self.pairs.len() as u64);
        debug!(
            "sent sequence {} ({bytes} bytes) to {}",
            self.netflow.flow_sequence(),
            connection.peer()
        );
        Ok(())
    }

    /// Run [`Udp`] to completion or until a shutdown signal is received.
    ///
    /// Without an interval a single batch is sent and its failure is
    /// returned. With an interval a failed write drops that batch, is
    /// counted in `request_failure` and the next batch goes out on schedule.
    ///
    /// # Errors
    ///
    /// Function will return an error if the collector cannot be resolved or
    /// connected, if a batch cannot be built, or if the single batch of a
    /// one-shot run cannot be written.
    pub async fn spin(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), Error> {
        let connection = Connection::open(&self.collector.host, self.collector.port).await?;
        info!(
            "sending netflow data to collector {}:{} ({})",
            self.collector.host,
            self.collector.port,
            connection.peer()
        );

        let Some(period) = self.interval else {
            return self.send_batch(&connection).await;
        };

        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.send_batch(&connection).await {
                        Ok(()) => {}
                        Err(err @ Error::Payload(_)) => return Err(err),
                        Err(err) => {
                            warn!("write failed: {err}");
                            let mut error_labels = self.metric_labels.clone();
                            error_labels.push(("error".to_string(), err.to_string()));
                            counter!("request_failure", &error_labels).increment(1);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nflow_payload::{SnmpIndex, netflow::wire};
    use rand::SeedableRng;

    async fn collector() -> (UdpSocket, Collector) {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("bind test collector");
        let port = socket.local_addr().expect("local addr").port();
        (
            socket,
            Collector {
                host: "127.0.0.1".to_string(),
                port,
            },
        )
    }

    fn generator(collector: Collector, interval: Option<Duration>) -> Udp {
        Udp::new(
            General {
                id: Some("test".to_string()),
            },
            Config {
                collector,
                pairs: nflow_payload::endpoint::parse_list(
                    "10.0.0.5:1025-10.0.0.9:80,10.0.0.9:80-10.0.0.5:1025",
                )
                .expect("valid endpoints"),
                params: FlowParams {
                    snmp_index: SnmpIndex::False,
                    ..FlowParams::default()
                },
                interval,
            },
            SmallRng::seed_from_u64(5),
        )
    }

    #[tokio::test]
    async fn one_shot_sends_a_single_datagram() {
        let (socket, collector) = collector().await;
        let (_shutdown_snd, shutdown_rcv) = broadcast::channel(1);

        generator(collector, None)
            .spin(shutdown_rcv)
            .await
            .expect("one-shot run succeeds");

        let mut buf = vec![0; 65_536];
        let len = socket.recv(&mut buf).await.expect("datagram received");
        assert_eq!(len, wire::encoded_len(2));

        let (header, records) = wire::decode(&buf[..len]).expect("valid datagram");
        assert_eq!(header.count, 2);
        assert_eq!(header.flow_sequence, 1);
        assert_eq!((records[0].input, records[0].output), (2, 1));
        assert_eq!((records[1].input, records[1].output), (1, 2));
        assert_eq!(records[0].dstport, 80);
        assert_eq!(records[1].dstport, 1025);
    }

    #[tokio::test]
    async fn periodic_sends_increasing_sequence_until_shutdown() {
        let (socket, collector) = collector().await;
        let (shutdown_snd, shutdown_rcv) = broadcast::channel(1);

        let handle = tokio::spawn(
            generator(collector, Some(Duration::from_millis(10))).spin(shutdown_rcv),
        );

        let mut buf = vec![0; 65_536];
        for expected in 1..=3 {
            let len = socket.recv(&mut buf).await.expect("datagram received");
            let (header, _) = wire::decode(&buf[..len]).expect("valid datagram");
            assert_eq!(header.flow_sequence, expected);
        }

        shutdown_snd.send(()).expect("generator is listening");
        handle
            .await
            .expect("task joins")
            .expect("periodic run shuts down cleanly");
    }

    #[tokio::test]
    async fn periodic_keeps_running_when_writes_are_refused() {
        // Nothing listens on the freed port, loopback sends start failing
        // with ECONNREFUSED after the first ICMP unreachable.
        let collector = {
            let (socket, collector) = collector().await;
            drop(socket);
            collector
        };
        let (shutdown_snd, shutdown_rcv) = broadcast::channel(1);

        let handle = tokio::spawn(
            generator(collector, Some(Duration::from_millis(5))).spin(shutdown_rcv),
        );

        time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished(), "generator stopped on a failed write");

        shutdown_snd.send(()).expect("generator is listening");
        handle
            .await
            .expect("task joins")
            .expect("periodic run shuts down cleanly");
    }

    #[tokio::test]
    async fn unresolvable_collector_is_resolution_error() {
        let err = Connection::open("", 9995)
            .await
            .expect_err("empty host cannot resolve");
        assert!(
            matches!(err, Error::Resolution { .. } | Error::NoAddress { .. }),
            "{err:?}"
        );
    }
}
