//! CAN MQTT Bridge CLI Application
//!
//! This is the command-line front end of the CAN ↔ MQTT bridge.
//! It uses the can-mqtt-bridge library and adds:
//! - TOML configuration loading
//! - SocketCAN bus access (Linux)
//! - MQTT broker connection
//! - Ctrl-C handling

use anyhow::{Context, Result};
use can_mqtt_bridge::signals::dbc;
use can_mqtt_bridge::{BridgeRouter, RouterSummary, SignalCatalog};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

mod can;
mod config;
mod mqtt;

/// Capacity of each channel between the transports and the router
const CHANNEL_CAPACITY: usize = 256;

/// CAN MQTT Bridge - Translate CAN frames to MQTT messages and back
#[derive(Parser, Debug)]
#[command(name = "can-mqtt-cli")]
#[command(about = "Bidirectional CAN <-> MQTT bridge driven by a DBC file", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// DBC file to use instead of the one named in the config
    #[arg(long, value_name = "FILE")]
    dbc: Option<PathBuf>,

    /// CAN interface to use instead of the one named in the config
    #[arg(short, long, value_name = "IFACE")]
    interface: Option<String>,

    /// Load the configuration and DBC file, print a summary and exit
    #[arg(long)]
    check: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN MQTT Bridge CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using bridge library v{}", can_mqtt_bridge::VERSION);

    log::info!("Loading configuration from: {:?}", args.config);
    let mut config = config::load_config(&args.config)?;
    if let Some(dbc_file) = args.dbc {
        config.dbc_file = dbc_file;
    }
    if let Some(interface) = args.interface {
        config.can.interface = interface;
    }

    let catalog = dbc::load_catalog(&config.dbc_file)
        .with_context(|| format!("Failed to load DBC file: {:?}", config.dbc_file))?;

    let stats = catalog.stats();
    log::info!(
        "Signal catalog: {} messages, {} signals, {} multiplexed",
        stats.num_messages,
        stats.num_signals,
        stats.num_multiplexed
    );

    if args.check {
        print_check(&config, &catalog);
        return Ok(());
    }

    let summary = run_bridge(config, Arc::new(catalog)).await?;

    log::info!(
        "CAN -> MQTT: {} received, {} published, {} dropped, {} unchanged",
        summary.can_to_mqtt.received,
        summary.can_to_mqtt.forwarded,
        summary.can_to_mqtt.dropped,
        summary.can_to_mqtt.unchanged
    );
    log::info!(
        "MQTT -> CAN: {} received, {} transmitted, {} dropped",
        summary.mqtt_to_can.received,
        summary.mqtt_to_can.forwarded,
        summary.mqtt_to_can.dropped
    );

    Ok(())
}

/// Open both transports, run the router until it stops, then close them
async fn run_bridge(config: config::AppConfig, catalog: Arc<SignalCatalog>) -> Result<RouterSummary> {
    let (frames_tx, frames_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (transmit_tx, transmit_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (publish_tx, publish_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let router = BridgeRouter::new(catalog, config.bridge.clone());

    let bus = can::open(&config.can.interface, frames_tx, transmit_rx)?;
    let link = mqtt::connect(
        &config.mqtt,
        router.translator().subscriptions(),
        config.bridge.qos,
        commands_tx,
        publish_rx,
    );

    let handle = router.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Ctrl-C received, shutting down");
                handle.shutdown();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let result = router
        .run(frames_rx, transmit_tx, commands_rx, publish_tx)
        .await;

    link.finish().await;
    bus.finish().await;

    result.context("Bridge stopped")
}

/// Print what the bridge would run with
fn print_check(config: &config::AppConfig, catalog: &SignalCatalog) {
    let stats = catalog.stats();

    println!("═══════════════════════════════════════════════");
    println!("  CAN MQTT Bridge - Configuration Check");
    println!("═══════════════════════════════════════════════\n");

    println!("📊 Signal Catalog: {:?}", config.dbc_file);
    println!("  Messages:    {}", stats.num_messages);
    println!("  Signals:     {}", stats.num_signals);
    println!("  Multiplexed: {}", stats.num_multiplexed);

    println!("\n🔌 Transports:");
    println!("  CAN:  {}", config.can.interface);
    println!("  MQTT: {}:{} ({})", config.mqtt.host, config.mqtt.port, config.mqtt.client_id);

    println!("\n🔀 Topics:");
    println!("  Publish:   {}/<message>", config.bridge.topic_prefix);
    println!("  Subscribe: {}/<message>", config.bridge.command_prefix);
    if let Some(ref raw_topic) = config.bridge.raw_command_topic {
        println!("  Raw:       {}", raw_topic);
    }

    println!("\n✓ Configuration is valid");
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
