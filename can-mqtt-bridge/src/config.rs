//! Bridge configuration types
//!
//! This module defines the option set the translation core recognizes. Loading
//! these options from a file is the application's job; the library only
//! consumes the deserialized values.

use crate::types::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// How cataloged messages are named in MQTT topics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingConvention {
    /// `<prefix>/<MessageName>`
    #[default]
    ByName,
    /// `<prefix>/0x<ID>`
    ById,
}

/// Representation of signal values in MQTT payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadFormat {
    /// JSON object of signal name to value
    #[default]
    JsonObject,
    /// The frame payload bytes, untouched
    RawBytes,
}

/// What happens to frames with no catalog entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownFramePolicy {
    /// Drop silently
    Drop,
    /// Publish id + payload on the catch-all topic
    #[default]
    Forward,
}

/// Configuration for the bridge core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BridgeConfig {
    /// Prefix of topics published for received CAN frames
    pub topic_prefix: String,

    /// Prefix of topics whose messages are transmitted on the bus
    pub command_prefix: String,

    /// Topic naming convention (shared by both directions)
    pub naming_convention: NamingConvention,

    /// Payload representation (shared by both directions)
    pub payload_format: PayloadFormat,

    /// Disposal of frames with unknown identifiers
    pub unknown_frame_policy: UnknownFramePolicy,

    /// Topic receiving unknown frames when the policy is `forward`
    pub catchall_topic: String,

    /// Append `/0x<ID>` to the catch-all topic for each unknown identifier
    pub catchall_per_id: bool,

    /// Inbound topic accepting raw `{"message_id", "data"}` records
    pub raw_command_topic: Option<String>,

    /// QoS applied to published messages
    pub qos: u8,

    /// Retain flag applied to published messages
    pub retain: bool,

    /// Skip publishing when a topic's payload is unchanged
    pub publish_on_change: bool,

    /// Clear retained messages on every published topic at shutdown
    pub clear_retained_on_shutdown: bool,

    /// Publish value-table labels instead of numbers where available
    pub value_labels: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "can/received".to_string(),
            command_prefix: "can/send".to_string(),
            naming_convention: NamingConvention::ByName,
            payload_format: PayloadFormat::JsonObject,
            unknown_frame_policy: UnknownFramePolicy::Forward,
            catchall_topic: "can/received/unknown".to_string(),
            catchall_per_id: false,
            raw_command_topic: None,
            qos: 0,
            retain: true,
            publish_on_change: false,
            clear_retained_on_shutdown: false,
            value_labels: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new bridge configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the outbound topic prefix
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Builder method: set the inbound topic prefix
    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Builder method: set the naming convention
    pub fn with_naming(mut self, naming: NamingConvention) -> Self {
        self.naming_convention = naming;
        self
    }

    /// Builder method: set the payload format
    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = format;
        self
    }

    /// Builder method: set the unknown frame policy
    pub fn with_unknown_frame_policy(mut self, policy: UnknownFramePolicy) -> Self {
        self.unknown_frame_policy = policy;
        self
    }

    /// Builder method: set the catch-all topic
    pub fn with_catchall_topic(mut self, topic: impl Into<String>) -> Self {
        self.catchall_topic = topic.into();
        self
    }

    /// Builder method: give each unknown identifier its own catch-all topic
    pub fn with_catchall_per_id(mut self, enabled: bool) -> Self {
        self.catchall_per_id = enabled;
        self
    }

    /// Builder method: accept raw records on the given inbound topic
    pub fn with_raw_command_topic(mut self, topic: impl Into<String>) -> Self {
        self.raw_command_topic = Some(topic.into());
        self
    }

    /// Builder method: set QoS and retain for published messages
    pub fn with_delivery(mut self, qos: u8, retain: bool) -> Self {
        self.qos = qos;
        self.retain = retain;
        self
    }

    /// Builder method: only publish changed payloads
    pub fn with_publish_on_change(mut self, enabled: bool) -> Self {
        self.publish_on_change = enabled;
        self
    }

    /// Builder method: clear retained topics at shutdown
    pub fn with_clear_retained_on_shutdown(mut self, enabled: bool) -> Self {
        self.clear_retained_on_shutdown = enabled;
        self
    }

    /// Builder method: publish value-table labels
    pub fn with_value_labels(mut self, enabled: bool) -> Self {
        self.value_labels = enabled;
        self
    }

    /// Reject option combinations the router cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.qos > 2 {
            return Err(BridgeError::InvalidConfig(format!(
                "qos must be 0, 1 or 2 (got {})",
                self.qos
            )));
        }

        if self.unknown_frame_policy == UnknownFramePolicy::Forward
            && self.catchall_topic.trim().is_empty()
        {
            return Err(BridgeError::InvalidConfig(
                "unknown-frame-policy is 'forward' but catchall-topic is empty".to_string(),
            ));
        }

        Ok(())
    }
}
