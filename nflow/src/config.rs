//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Configuration arrives
//! either as YAML or assembled from command line flags by the binary; both
//! paths end in [`Config::validate`].
use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use nflow_payload::{
    EndpointPair, FlowParams, SnmpIndex, endpoint,
    netflow::DEFAULT_TRAFFIC_MAGNITUDE,
};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::generator::service::Service;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The flows or their parameters are invalid
    #[error("Invalid flow configuration: {0}")]
    Flow(#[from] nflow_payload::Error),
    /// The spike would not stand out from steady traffic
    #[error("spike traffic_magnitude {spike} must exceed the steady traffic_magnitude {steady}")]
    SpikeMagnitude {
        /// Configured spike magnitude
        spike: u32,
        /// Configured steady magnitude
        steady: u32,
    },
    /// An interval of zero milliseconds was configured
    #[error("interval_milliseconds must be greater than zero")]
    ZeroInterval,
    /// The collector port is zero
    #[error("collector port must be non-zero")]
    ZeroPort,
}

fn default_endpoints() -> String {
    "172.21.1.1:8023-192.3.4.3:80,10.1.2.3:34565-4.3.2.5:443".to_string()
}

fn default_protocol() -> u8 {
    6
}

fn default_src_mask() -> u8 {
    24
}

fn default_traffic_magnitude() -> u32 {
    DEFAULT_TRAFFIC_MAGNITUDE
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where datagrams are sent
    pub collector: Collector,
    /// Flow endpoints, `srcIP:srcPort-dstIP:dstPort[,...]`
    #[serde(default = "default_endpoints")]
    pub endpoints: String,
    /// IP protocol number written into steady records
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    /// Source prefix mask length written into every record
    #[serde(default = "default_src_mask")]
    pub src_mask: u8,
    /// Assign fictitious SNMP interface indices instead of zero
    #[serde(default)]
    pub false_index: bool,
    /// Exclusive upper bound of steady packet and octet counts
    #[serde(default = "default_traffic_magnitude")]
    pub traffic_magnitude: u32,
    /// Period between batches. When absent a single batch is sent.
    #[serde(default)]
    pub interval_milliseconds: Option<u64>,
    /// Seed for random field values. Drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// A second generator producing a spike of one service's traffic
    #[serde(default)]
    pub spike: Option<Spike>,
    /// Prometheus exposition of internal counters
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
}

/// The collector datagrams are addressed to
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Collector {
    /// Host name or IP address
    pub host: String,
    /// UDP port
    pub port: u16,
}

/// Configuration of the spike generator
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Spike {
    /// The service whose protocol and destination port spike records carry
    pub service: Service,
    /// Exclusive upper bound of spike packet and octet counts, must exceed
    /// the steady magnitude
    pub traffic_magnitude: u32,
    /// Period between spike batches, defaults to the steady period
    #[serde(default)]
    pub interval_milliseconds: Option<u64>,
}

/// Prometheus exporter settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Telemetry {
    /// Address for the HTTP listener
    pub prometheus_addr: SocketAddr,
    /// Labels applied to every exported metric
    #[serde(default)]
    pub global_labels: FxHashMap<String, String>,
}

impl Config {
    /// A configuration with defaults for everything but the collector.
    #[must_use]
    pub fn new(collector: Collector) -> Self {
        Self {
            collector,
            endpoints: default_endpoints(),
            protocol: default_protocol(),
            src_mask: default_src_mask(),
            false_index: false,
            traffic_magnitude: default_traffic_magnitude(),
            interval_milliseconds: None,
            seed: None,
            spike: None,
            telemetry: None,
        }
    }

    /// Parse configuration from YAML contents.
    ///
    /// # Errors
    ///
    /// Function will return an error if the YAML is malformed or does not
    /// describe a [`Config`].
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Read and parse a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Function will return an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::from_yaml(&contents)
    }

    /// Check the configuration for errors a run would otherwise hit later.
    ///
    /// # Errors
    ///
    /// Function will return an error if the endpoint list does not parse,
    /// flow parameters are out of range, an interval is zero or the spike
    /// magnitude does not exceed the steady magnitude.
    pub fn validate(&self) -> Result<(), Error> {
        if self.collector.port == 0 {
            return Err(Error::ZeroPort);
        }
        self.endpoint_pairs()?;
        self.flow_params().valid()?;
        if self.interval_milliseconds == Some(0) {
            return Err(Error::ZeroInterval);
        }
        if let Some(spike) = &self.spike {
            if spike.traffic_magnitude <= self.traffic_magnitude {
                return Err(Error::SpikeMagnitude {
                    spike: spike.traffic_magnitude,
                    steady: self.traffic_magnitude,
                });
            }
            if spike.interval_milliseconds == Some(0) {
                return Err(Error::ZeroInterval);
            }
        }
        Ok(())
    }

    /// The parsed endpoint list.
    ///
    /// # Errors
    ///
    /// See [`endpoint::parse_list`].
    pub fn endpoint_pairs(&self) -> Result<Vec<EndpointPair>, Error> {
        Ok(endpoint::parse_list(&self.endpoints)?)
    }

    /// Parameters for steady records.
    #[must_use]
    pub fn flow_params(&self) -> FlowParams {
        FlowParams {
            traffic_magnitude: self.traffic_magnitude,
            protocol: self.protocol,
            src_mask: self.src_mask,
            snmp_index: SnmpIndex::from(self.false_index),
        }
    }

    /// Period between steady batches, `None` for a single batch.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.interval_milliseconds.map(Duration::from_millis)
    }
}

impl Spike {
    /// Parameters for spike records, derived from the steady parameters.
    #[must_use]
    pub fn flow_params(&self, steady: &FlowParams) -> FlowParams {
        FlowParams {
            traffic_magnitude: self.traffic_magnitude,
            protocol: self.service.protocol(),
            ..*steady
        }
    }

    /// Period between spike batches, falling back to `steady`.
    #[must_use]
    pub fn interval(&self, steady: Option<Duration>) -> Option<Duration> {
        self.interval_milliseconds
            .map(Duration::from_millis)
            .or(steady)
    }
}
