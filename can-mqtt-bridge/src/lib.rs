//! CAN ↔ MQTT Bridge Library
//!
//! The translation core of a bidirectional bridge between a CAN bus and an MQTT
//! broker, driven by signal definitions loaded from a DBC file.
//!
//! # Architecture
//!
//! The library is built around a read-only [`SignalCatalog`] and two stateless
//! pipelines run by the [`BridgeRouter`]:
//! - CAN → MQTT: decode frames into physical signal values and publish them
//! - MQTT → CAN: parse commands into signal values and encode them into frames
//!
//! The library does NOT:
//! - Open CAN sockets or connect to brokers
//! - Read configuration files
//! - Buffer or retry failed messages
//!
//! Transports plug in through the traits in [`transport`]; the application layer
//! (can-mqtt-cli) provides the SocketCAN and MQTT clients.
//!
//! # Example Usage
//!
//! ```no_run
//! use can_mqtt_bridge::{signals::dbc, BridgeConfig, BridgeRouter, MqttEnvelope, RawFrame};
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> can_mqtt_bridge::Result<()> {
//! let catalog = Arc::new(dbc::load_catalog(Path::new("vehicle.dbc"))?);
//! let config = BridgeConfig::new().with_topic_prefix("vehicle/rx");
//!
//! let (bus_tx, bus_rx) = mpsc::channel::<RawFrame>(64);
//! let (out_tx, out_rx) = mpsc::channel::<RawFrame>(64);
//! let (cmd_tx, cmd_rx) = mpsc::channel::<MqttEnvelope>(64);
//! let (pub_tx, pub_rx) = mpsc::channel::<MqttEnvelope>(64);
//!
//! let router = BridgeRouter::new(catalog, config);
//! let handle = router.handle();
//! let summary = router.run(bus_rx, out_tx, cmd_rx, pub_tx).await?;
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod config;
pub mod message_decoder;
pub mod message_encoder;
pub mod payload;
pub mod router;
pub mod signals;
pub mod topic;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::{BridgeConfig, NamingConvention, PayloadFormat, UnknownFramePolicy};
pub use message_decoder::FrameDecoder;
pub use message_encoder::MessageEncoder;
pub use router::{BridgeRouter, PipelineStats, RouterHandle, RouterState, RouterSummary, Translator};
pub use signals::{CatalogStats, MessageDefinition, SignalCatalog, SignalDefinition};
pub use topic::TopicMapper;
pub use types::{
    BridgeError, DecodeOutcome, DecodedSignal, DecodedSignals, MessageRef, MqttEnvelope,
    RawFrame, Result, SignalValue, SignalValues, UnknownFrameRecord,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
