//! nflow generators
//!
//! A run has one steady generator and, optionally, a spike generator. Both
//! are [`udp::Udp`] instances with their own `NetFlow` exporter state, random
//! source and socket; they share nothing but the collector address. The
//! spike reuses the steady endpoint list with the destination port and IP
//! protocol of a well-known [`service::Service`] and a larger traffic
//! magnitude.

use rand::{SeedableRng, rngs::SmallRng};
use tracing::info;

use crate::config::Config;

pub mod service;
pub mod udp;

#[derive(thiserror::Error, Debug)]
/// Errors produced by the generators
pub enum Error {
    /// See [`crate::generator::udp::Error`] for details.
    #[error(transparent)]
    Udp(#[from] udp::Error),
    /// See [`nflow_payload::Error`] for details.
    #[error(transparent)]
    Payload(#[from] nflow_payload::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Configurations common to all generators
pub struct General {
    /// The ID assigned to this generator, used as a metric label
    pub id: Option<String>,
}

/// Build the generators described by `config`, steady first.
///
/// # Errors
///
/// Function will return an error if the endpoint list does not parse.
pub fn from_config(config: &Config) -> Result<Vec<udp::Udp>, Error> {
    let mut rng = match config.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };

    let pairs = nflow_payload::endpoint::parse_list(&config.endpoints)?;
    let params = config.flow_params();
    let interval = config.interval();

    let spike_rng = SmallRng::from_rng(&mut rng);
    let spike = config.spike.map(|spike| {
        info!(
            "spike generator enabled for {}, traffic magnitude {}",
            spike.service, spike.traffic_magnitude
        );
        udp::Config {
            collector: config.collector.clone(),
            pairs: pairs
                .iter()
                .map(|pair| pair.with_dst_port(spike.service.port()))
                .collect(),
            params: spike.flow_params(&params),
            interval: spike.interval(interval),
        }
    });

    let mut generators = vec![udp::Udp::new(
        General {
            id: Some("steady".to_string()),
        },
        udp::Config {
            collector: config.collector.clone(),
            pairs,
            params,
            interval,
        },
        rng,
    )];
    if let Some(spike) = spike {
        generators.push(udp::Udp::new(
            General {
                id: Some("spike".to_string()),
            },
            spike,
            spike_rng,
        ));
    }

    Ok(generators)
}
