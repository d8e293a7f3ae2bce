//! Radio link bridge binary
//!
//! Wires the UDP radio backend and the TCP block channel emulation to the
//! bridge loop, with configuration, logging and signal handling.

use clap::{Arg, Command};
use radiolink_bridge::{
    bridge::{BridgeLoop, BridgeMonitor, BridgeStats},
    classifier::{Classifier, ClassifierStats},
    config::BridgeConfig,
    queue::{QueuePair, QueueStats},
    radio::{OwnAddress, RadioInterface, UdpRadio},
    transport::TcpTransport,
    BridgeError, Result,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "radiolink-bridge.toml";

/// Combined statistics report
#[derive(Debug, Serialize)]
struct StatsReport {
    bridge: BridgeStats,
    classifier: ClassifierStats,
    outbound: QueueStats,
    inbound: QueueStats,
    captured: u64,
    injected: u64,
}

/// Everything the stats reporter needs to read
#[derive(Clone)]
struct StatsSources {
    monitor: BridgeMonitor,
    classifier: Arc<Classifier>,
    queues: Arc<QueuePair>,
    radio: Arc<UdpRadio>,
}

impl StatsSources {
    fn report(&self) -> StatsReport {
        StatsReport {
            bridge: self.monitor.stats(),
            classifier: self.classifier.stats(),
            outbound: self.queues.outbound.stats(),
            inbound: self.queues.inbound.stats(),
            captured: self.radio.captured(),
            injected: self.radio.injected(),
        }
    }

    fn log(&self, label: &str) {
        match serde_json::to_string(&self.report()) {
            Ok(json) => info!("{}: {}", label, json),
            Err(e) => warn!("Failed to serialize statistics: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("radiolink-bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relays captured 802.11 frames over a polled block channel")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (.toml or .json)")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error); overrides the config file"),
        )
        .arg(
            Arg::new("transport-addr")
                .short('t')
                .long("transport-addr")
                .value_name("ADDR")
                .help("Address the block channel listens on"),
        )
        .arg(
            Arg::new("radio-bind")
                .short('r')
                .long("radio-bind")
                .value_name("ADDR")
                .help("Address receiving captured frames"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a default configuration file and exit"),
        )
        .get_matches();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        BridgeConfig::default().to_file(path)?;
        println!("Default configuration written to {}", path);
        return Ok(());
    }

    let config_path = PathBuf::from(
        matches
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONFIG_PATH),
    );
    let config_found = config_path.exists();
    let mut config = if config_found {
        BridgeConfig::from_file(&config_path)?
    } else {
        BridgeConfig::default()
    };

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(addr) = matches.get_one::<String>("transport-addr") {
        config.transport.listen = addr.clone();
    }
    if let Some(addr) = matches.get_one::<String>("radio-bind") {
        config.radio.bind = addr.clone();
    }

    init_logging(&config.logging.level)?;

    info!("Starting {} v{}", config.general.name, radiolink_bridge::VERSION);
    if config_found {
        info!("Loaded configuration from {}", config_path.display());
    } else {
        warn!("Configuration file not found: {}, using defaults", config_path.display());
    }

    let validation = config.validate();
    for warning in &validation.warnings {
        warn!("Config: {}", warning);
    }
    if !validation.valid {
        for err in &validation.errors {
            error!("Config: {}", err);
        }
        return Err(BridgeError::Config(format!(
            "{} configuration error(s)",
            validation.errors.len()
        )));
    }

    match run_bridge(config).await {
        Ok(()) => {
            info!("Bridge shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Bridge error: {}", e);
            Err(e)
        }
    }
}

/// Initialize logging system
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| BridgeError::Config(format!("Invalid log level '{}': {}", level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Resolve on SIGTERM or Ctrl+C
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, initiating graceful shutdown"),
                }
                return;
            }
            Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

/// Periodically log statistics until shutdown
async fn report_stats(sources: StatsSources, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => sources.log("Statistics"),
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    info!("Initializing bridge components...");

    let queues = Arc::new(QueuePair::new(config.queue.capacity));

    let radio = Arc::new(
        UdpRadio::bind(
            config.radio_bind_addr()?,
            config.inject_peer_addr()?,
            config.mac_address()?,
        )
        .await?,
    );
    let own_address = Arc::new(OwnAddress::new(radio.clone()));
    let classifier = Arc::new(Classifier::new(own_address, Arc::clone(&queues)));

    let transport = TcpTransport::listen(config.transport_addr()?).await?;
    let mut bridge = BridgeLoop::new(
        transport,
        radio.clone(),
        Arc::clone(&queues),
        config.bridge_settings(),
    );

    let sources = StatsSources {
        monitor: bridge.monitor(),
        classifier: Arc::clone(&classifier),
        queues: Arc::clone(&queues),
        radio: Arc::clone(&radio),
    };

    radio.start_capture(classifier, config.radio.filter).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bridge_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { bridge.run(shutdown).await })
    };

    let stats_task = (config.general.stats_interval_secs > 0).then(|| {
        let period = Duration::from_secs(config.general.stats_interval_secs);
        tokio::spawn(report_stats(sources.clone(), period, shutdown_rx.clone()))
    });

    info!("Bridge running");
    wait_for_shutdown().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = bridge_task.await {
        error!("Bridge task failed: {}", e);
    }
    if let Some(task) = stats_task {
        let _ = task.await;
    }

    if let Err(e) = radio.stop_capture().await {
        warn!("Failed to stop capture: {}", e);
    }
    queues.clear();

    sources.log("Final statistics");
    Ok(())
}
