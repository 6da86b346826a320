use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use nflow::{
    config::{self, Collector, Config, Spike, Telemetry},
    generator::{self, service::Service},
};
use nflow_payload::netflow::DEFAULT_TRAFFIC_MAGNITUDE;
use tokio::{runtime::Builder, signal, sync::broadcast};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Generator returned an error: {0}")]
    Generator(#[from] generator::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("--target and --port are required without a configuration file")]
    MissingCollector,
}

// Parser for subcommand structure
#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct CliWithSubcommands {
    #[command(subcommand)]
    command: Commands,
}

// Parser for the flat, subcommand-less flag structure
#[derive(Parser)]
#[clap(
    version,
    about = "Send mock NetFlow version 5 data to a designated collector IP & port. Time stamps in all datagrams are UTC.",
    long_about = None
)]
struct CliFlat {
    #[command(flatten)]
    args: NflowArgs,
}

#[derive(Args)]
struct NflowArgs {
    /// path on disk to a YAML configuration file, replaces the flow flags
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// target ip address of the netflow collector
    #[clap(short = 't', long)]
    target: Option<String>,
    /// port number of the target netflow collector
    #[clap(short = 'p', long)]
    port: Option<u16>,
    /// run a second generator producing a spike for the named service: ftp,
    /// ssh, dns, http, https, ntp, snmp, imaps, mysql, https_alt, p2p or
    /// bittorrent
    #[clap(short = 's', long, requires = "spike_magnitude")]
    spike: Option<Service>,
    /// upper bound of spike packet and octet counts, must exceed
    /// --traffic-magnitude
    #[clap(long, requires = "spike")]
    spike_magnitude: Option<u32>,
    /// generate false SNMP interface indexes: 1 in / 2 out if the source
    /// address > destination address, 2 in / 1 out otherwise. Default
    /// indexes are 0
    #[clap(short = 'f', long)]
    false_index: bool,
    /// IP protocol number of the generated flows
    #[clap(short = 'l', long, default_value_t = 6)]
    protocol: u8,
    /// list of flows, eg: 172.21.1.1:8023-192.3.4.3:80,10.1.2.3:34565-4.3.2.5:443
    #[clap(short = 'i', long)]
    iprange: Option<String>,
    /// source prefix mask length of the generated flows
    #[clap(long, default_value_t = 24)]
    src_mask: u8,
    /// upper bound of steady packet and octet counts
    #[clap(long, default_value_t = DEFAULT_TRAFFIC_MAGNITUDE)]
    traffic_magnitude: u32,
    /// milliseconds between batches; a single batch is sent when absent
    #[clap(long)]
    interval_ms: Option<u64>,
    /// seed for random field values
    #[clap(long)]
    seed: Option<u64>,
    /// address to bind a prometheus exporter to
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send flows with the specified configuration
    Run(Box<RunCommand>),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct RunCommand {
    #[command(flatten)]
    args: NflowArgs,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: PathBuf,
}

fn get_config(args: &NflowArgs, contents: Option<String>) -> Result<Config, Error> {
    let mut config = if let Some(contents) = contents {
        Config::from_yaml(&contents)?
    } else if let Some(path) = &args.config_path {
        debug!("Attempting to open configuration file at: {}", path.display());
        Config::load(path)?
    } else {
        let (Some(host), Some(port)) = (&args.target, args.port) else {
            return Err(Error::MissingCollector);
        };
        let mut config = Config::new(Collector {
            host: host.clone(),
            port,
        });
        if let Some(iprange) = &args.iprange {
            config.endpoints.clone_from(iprange);
        }
        config.protocol = args.protocol;
        config.src_mask = args.src_mask;
        config.false_index = args.false_index;
        config.traffic_magnitude = args.traffic_magnitude;
        config.interval_milliseconds = args.interval_ms;
        config.seed = args.seed;
        if let (Some(service), Some(traffic_magnitude)) = (args.spike, args.spike_magnitude) {
            config.spike = Some(Spike {
                service,
                traffic_magnitude,
                interval_milliseconds: None,
            });
        }
        config
    };

    if let Some(prometheus_addr) = args.prometheus_addr {
        config.telemetry = Some(Telemetry {
            prometheus_addr,
            global_labels: Default::default(),
        });
    }

    config.validate().map_err(|err| {
        error!("Configuration validation failed: {err}");
        err
    })?;
    Ok(config)
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(telemetry) = &config.telemetry {
        let mut builder = PrometheusBuilder::new().with_http_listener(telemetry.prometheus_addr);
        for (k, v) in &telemetry.global_labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
        info!("prometheus exporter listening on {}", telemetry.prometheus_addr);
    }

    let (shutdown_snd, _) = broadcast::channel(1);
    let mut gsrv_joinset = tokio::task::JoinSet::new();
    for generator_server in generator::from_config(&config)? {
        let shutdown = shutdown_snd.subscribe();
        gsrv_joinset.spawn(async move {
            generator_server
                .spin(shutdown)
                .await
                .map_err(generator::Error::from)
        });
    }

    let res = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received ctrl-c");
                break Ok(());
            },
            res = gsrv_joinset.join_next() => {
                match res {
                    None => {
                        info!("all generators finished");
                        break Ok(());
                    }
                    Some(Ok(Ok(()))) => debug!("generator shut down successfully"),
                    Some(Ok(Err(err))) => {
                        error!("Generator shut down unexpectedly: {err}");
                        break Err(Error::Generator(err));
                    }
                    Some(Err(err)) => error!("Could not join the spawned generator task: {err}"),
                }
            },
        }
    };

    // Receivers are gone once every generator has returned.
    if shutdown_snd.send(()).is_err() {
        debug!("no generators left to signal");
    }
    while let Some(joined) = gsrv_joinset.join_next().await {
        if let Ok(Err(err)) = joined {
            error!("Generator failed during shutdown: {err}");
        }
    }
    res
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting nflow {version} run.");

    // Subcommands first, falling back to the flat flags
    let args = match CliWithSubcommands::try_parse() {
        Ok(cli) => match cli.command {
            Commands::Run(run_cmd) => run_cmd.args,
            Commands::ConfigCheck(config_check_cmd) => {
                match Config::load(&config_check_cmd.config_path)
                    .and_then(|config| config.validate().map(|()| config))
                {
                    Ok(_) => {
                        info!("Configuration file is valid");
                        std::process::exit(0)
                    }
                    Err(err) => {
                        error!("Configuration validation failed: {err}");
                        std::process::exit(1)
                    }
                }
            }
        },
        Err(_) => match CliFlat::try_parse() {
            Ok(flat) => flat.args,
            Err(err) => err.exit(),
        },
    };

    let contents = env::var("NFLOW_CONFIG").ok();
    if contents.is_some() {
        debug!("Using config from env var 'NFLOW_CONFIG'");
    }
    let config = get_config(&args, contents)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Bye. :)");
    res
}
