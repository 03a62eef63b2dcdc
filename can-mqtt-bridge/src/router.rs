//! Bridge router
//!
//! The router owns the two unidirectional pipelines of the bridge:
//!
//! - **CAN → MQTT**: frame → decoder → topic mapper → payload → publish
//! - **MQTT → CAN**: message → topic mapper → payload → encoder → transmit
//!
//! Each pipeline runs in its own tokio task, so a stalled bus does not hold up
//! publishing and a stalled broker does not hold up transmission. The only state
//! shared between them is the read-only catalog. Per-message failures are logged
//! and the message dropped; only transport failures stop the router.

use crate::config::{BridgeConfig, PayloadFormat, UnknownFramePolicy};
use crate::message_decoder::FrameDecoder;
use crate::message_encoder::MessageEncoder;
use crate::payload;
use crate::signals::SignalCatalog;
use crate::topic::TopicMapper;
use crate::transport::{EnvelopeSink, EnvelopeSource, FrameSink, FrameSource};
use crate::types::{BridgeError, DecodeOutcome, MessageRef, MqttEnvelope, RawFrame, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Operating state of the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Running,
    Stopped,
}

/// Stateless per-message translation in both directions
pub struct Translator {
    catalog: Arc<SignalCatalog>,
    config: BridgeConfig,
    outbound: TopicMapper,
    inbound: TopicMapper,
}

impl Translator {
    pub fn new(catalog: Arc<SignalCatalog>, config: BridgeConfig) -> Self {
        let outbound = TopicMapper::new(config.topic_prefix.clone(), config.naming_convention);
        let inbound = TopicMapper::new(config.command_prefix.clone(), config.naming_convention);
        Self {
            catalog,
            config,
            outbound,
            inbound,
        }
    }

    pub fn catalog(&self) -> &SignalCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Topic filters the MQTT transport must subscribe to
    ///
    /// A raw command topic already matched by the inbound filter gets no
    /// filter of its own, so the broker delivers each command once.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut filters = vec![self.inbound.subscription_filter()];
        if let Some(ref raw_topic) = self.config.raw_command_topic {
            if self.inbound.filter_matches(raw_topic) {
                log::debug!("Raw command topic {} covered by {}", raw_topic, filters[0]);
            } else {
                filters.push(raw_topic.clone());
            }
        }
        filters
    }

    /// Topic for a frame with no catalog entry
    fn catchall_topic(&self, can_id: u32) -> String {
        if self.config.catchall_per_id {
            format!("{}/0x{:X}", self.config.catchall_topic.trim_end_matches('/'), can_id)
        } else {
            self.config.catchall_topic.clone()
        }
    }

    /// Translate a received frame into the message to publish
    ///
    /// Returns `Ok(None)` when an unknown frame is dropped by policy, and
    /// `Err(BridgeError::DecodeError)` when the payload cannot be decoded.
    pub fn frame_to_envelope(&self, frame: &RawFrame) -> Result<Option<MqttEnvelope>> {
        let (topic, payload) = match FrameDecoder::decode(&self.catalog, frame) {
            DecodeOutcome::Decoded(decoded) => {
                let message = self
                    .catalog
                    .lookup_by_id(decoded.can_id)
                    .ok_or(BridgeError::UnknownMessage(MessageRef::Id(decoded.can_id)))?;

                let payload = payload::encode_signals(
                    &decoded,
                    &frame.data,
                    self.config.payload_format,
                    self.config.value_labels,
                )?;

                (self.outbound.to_topic(message), payload)
            }
            DecodeOutcome::Unknown(record) => match self.config.unknown_frame_policy {
                UnknownFramePolicy::Drop => {
                    log::trace!("Dropping unknown CAN ID 0x{:X}", record.can_id);
                    return Ok(None);
                }
                UnknownFramePolicy::Forward => (
                    self.catchall_topic(record.can_id),
                    payload::encode_unknown(&record)?,
                ),
            },
            DecodeOutcome::DecodeError { can_id, reason } => {
                return Err(BridgeError::DecodeError { can_id, reason });
            }
        };

        Ok(Some(
            MqttEnvelope::new(topic, payload).with_delivery(self.config.qos, self.config.retain),
        ))
    }

    /// Translate a received MQTT message into the frame to transmit
    pub fn envelope_to_frame(&self, envelope: &MqttEnvelope) -> Result<RawFrame> {
        if self.config.raw_command_topic.as_deref() == Some(envelope.topic.as_str()) {
            return payload::decode_raw_record(&envelope.payload);
        }

        let message = self.inbound.resolve(&envelope.topic, &self.catalog)?;

        match self.config.payload_format {
            PayloadFormat::RawBytes => payload::frame_from_bytes(&envelope.payload, message),
            PayloadFormat::JsonObject => {
                let values = payload::decode_signal_values(&envelope.payload, message)?;
                MessageEncoder::encode_message(message, &values)
            }
        }
    }
}

/// Counters for one pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Messages taken from the source
    pub received: u64,
    /// Messages handed to the sink
    pub forwarded: u64,
    /// Messages dropped by policy or error
    pub dropped: u64,
    /// Messages skipped because their payload was unchanged
    pub unchanged: u64,
}

/// Counters for both pipelines after the router stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterSummary {
    pub can_to_mqtt: PipelineStats,
    pub mqtt_to_can: PipelineStats,
}

/// Control handle for a router that has been moved into `run`
#[derive(Debug, Clone)]
pub struct RouterHandle {
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<RouterState>,
}

impl RouterHandle {
    /// Ask both pipelines to stop accepting input
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Current operating state
    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }
}

/// The bridge router
pub struct BridgeRouter {
    translator: Arc<Translator>,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Sender<RouterState>,
    state_rx: watch::Receiver<RouterState>,
}

impl BridgeRouter {
    pub fn new(catalog: Arc<SignalCatalog>, config: BridgeConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (state, state_rx) = watch::channel(RouterState::Stopped);
        Self {
            translator: Arc::new(Translator::new(catalog, config)),
            shutdown: Arc::new(shutdown),
            state,
            state_rx,
        }
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            shutdown: self.shutdown.clone(),
            state: self.state_rx.clone(),
        }
    }

    /// Run both pipelines until shutdown is requested, a source closes, or a
    /// transport fails. Returns the first transport error, if any.
    pub async fn run<CS, CT, MS, MT>(
        self,
        can_rx: CS,
        can_tx: CT,
        mqtt_rx: MS,
        mqtt_tx: MT,
    ) -> Result<RouterSummary>
    where
        CS: FrameSource + 'static,
        CT: FrameSink + 'static,
        MS: EnvelopeSource + 'static,
        MT: EnvelopeSink + 'static,
    {
        self.state.send_replace(RouterState::Running);
        log::info!("Bridge router running");

        let outbound = tokio::spawn(can_to_mqtt(
            self.translator.clone(),
            can_rx,
            mqtt_tx,
            self.shutdown.clone(),
        ));
        let inbound = tokio::spawn(mqtt_to_can(
            self.translator.clone(),
            mqtt_rx,
            can_tx,
            self.shutdown.clone(),
        ));

        let (outbound, inbound) = tokio::join!(outbound, inbound);

        let result = match (outbound, inbound) {
            (Ok(mut outbound), Ok(inbound)) => {
                if self.translator.config().clear_retained_on_shutdown {
                    clear_retained(
                        &mut outbound.sink,
                        &outbound.published,
                        self.translator.config().qos,
                    )
                    .await;
                }

                let summary = RouterSummary {
                    can_to_mqtt: outbound.stats,
                    mqtt_to_can: inbound.stats,
                };
                outbound.result.and(inbound.result).map(|_| summary)
            }
            (Err(e), _) | (_, Err(e)) => Err(BridgeError::Transport(format!(
                "pipeline task failed: {}",
                e
            ))),
        };

        self.state.send_replace(RouterState::Stopped);

        match &result {
            Ok(summary) => log::info!("Bridge router stopped: {:?}", summary),
            Err(e) => log::error!("Bridge router stopped: {}", e),
        }

        result
    }
}

/// What the CAN → MQTT pipeline hands back when it ends
struct OutboundExit<K> {
    result: Result<()>,
    stats: PipelineStats,
    sink: K,
    published: PublishedTopics,
}

/// What the MQTT → CAN pipeline hands back when it ends
struct InboundExit {
    result: Result<()>,
    stats: PipelineStats,
}

/// Last payload published per topic
#[derive(Debug, Default)]
struct PublishedTopics {
    last_payloads: HashMap<String, Vec<u8>>,
}

impl PublishedTopics {
    /// Record the envelope; false if it repeats the last payload and only
    /// changes should be published
    fn record(&mut self, envelope: &MqttEnvelope, only_changes: bool) -> bool {
        match self.last_payloads.get(&envelope.topic) {
            Some(previous) if only_changes && *previous == envelope.payload => false,
            _ => {
                self.last_payloads
                    .insert(envelope.topic.clone(), envelope.payload.clone());
                true
            }
        }
    }

    fn topics(&self) -> impl Iterator<Item = &String> {
        self.last_payloads.keys()
    }
}

async fn can_to_mqtt<S, K>(
    translator: Arc<Translator>,
    mut source: S,
    mut sink: K,
    shutdown: Arc<watch::Sender<bool>>,
) -> OutboundExit<K>
where
    S: FrameSource,
    K: EnvelopeSink,
{
    let mut stop = shutdown.subscribe();
    let mut stats = PipelineStats::default();
    let mut published = PublishedTopics::default();
    let only_changes = translator.config().publish_on_change;

    let result = loop {
        if *stop.borrow() {
            break Ok(());
        }

        let received = tokio::select! {
            biased;
            _ = stop.changed() => continue,
            received = source.recv() => received,
        };

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("CAN source closed");
                break Ok(());
            }
            Err(e) => {
                log::error!("CAN receive failed: {}", e);
                break Err(e);
            }
        };
        stats.received += 1;

        let envelope = match translator.frame_to_envelope(&frame) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                stats.dropped += 1;
                continue;
            }
            Err(e) => {
                log::warn!("Dropping CAN frame 0x{:X}: {}", frame.can_id, e);
                stats.dropped += 1;
                continue;
            }
        };

        if !published.record(&envelope, only_changes) {
            log::trace!("Payload unchanged on {}", envelope.topic);
            stats.unchanged += 1;
            continue;
        }

        log::debug!("CAN 0x{:X} -> {}", frame.can_id, envelope.topic);

        let sent = tokio::select! {
            biased;
            _ = stop.changed() => continue,
            sent = sink.publish(envelope) => sent,
        };

        if let Err(e) = sent {
            log::error!("MQTT publish failed: {}", e);
            break Err(e);
        }
        stats.forwarded += 1;
    };

    shutdown.send_replace(true);

    OutboundExit {
        result,
        stats,
        sink,
        published,
    }
}

async fn mqtt_to_can<S, K>(
    translator: Arc<Translator>,
    mut source: S,
    mut sink: K,
    shutdown: Arc<watch::Sender<bool>>,
) -> InboundExit
where
    S: EnvelopeSource,
    K: FrameSink,
{
    let mut stop = shutdown.subscribe();
    let mut stats = PipelineStats::default();

    let result = loop {
        if *stop.borrow() {
            break Ok(());
        }

        let received = tokio::select! {
            biased;
            _ = stop.changed() => continue,
            received = source.recv() => received,
        };

        let envelope = match received {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                log::info!("MQTT source closed");
                break Ok(());
            }
            Err(e) => {
                log::error!("MQTT receive failed: {}", e);
                break Err(e);
            }
        };
        stats.received += 1;

        let frame = match translator.envelope_to_frame(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Dropping MQTT message on {}: {}", envelope.topic, e);
                stats.dropped += 1;
                continue;
            }
        };

        log::debug!("{} -> CAN 0x{:X}", envelope.topic, frame.can_id);

        let sent = tokio::select! {
            biased;
            _ = stop.changed() => continue,
            sent = sink.transmit(frame) => sent,
        };

        if let Err(e) = sent {
            log::error!("CAN transmit failed: {}", e);
            break Err(e);
        }
        stats.forwarded += 1;
    };

    shutdown.send_replace(true);

    InboundExit { result, stats }
}

/// Publish an empty retained payload on every topic published during the run
async fn clear_retained<K: EnvelopeSink>(sink: &mut K, published: &PublishedTopics, qos: u8) {
    log::info!("Clearing retained messages...");
    for topic in published.topics() {
        let envelope = MqttEnvelope::new(topic.clone(), Vec::new()).with_delivery(qos, true);
        if let Err(e) = sink.publish(envelope).await {
            log::warn!("Could not clear retained message on {}: {}", topic, e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamingConvention;
    use crate::signals::{MessageDefinition, SignalDefinition};

    fn catalog() -> Arc<SignalCatalog> {
        Arc::new(
            SignalCatalog::new(vec![
                MessageDefinition::new(0x100, "EngineStatus", 8)
                    .with_signal(SignalDefinition::new("RPM", 0, 16).with_scaling(0.25, 0.0)),
                MessageDefinition::new(0x101, "Doors", 1)
                    .with_signal(SignalDefinition::new("Open", 0, 4).with_value_label(0, "Closed")),
            ])
            .unwrap(),
        )
    }

    fn engine_frame() -> RawFrame {
        RawFrame::new(0x100, vec![0x10, 0x27, 0, 0, 0, 0, 0, 0])
    }

    #[test]
    fn test_frame_to_envelope_json() {
        let translator = Translator::new(catalog(), BridgeConfig::new());
        let envelope = translator.frame_to_envelope(&engine_frame()).unwrap().unwrap();

        assert_eq!(envelope.topic, "can/received/EngineStatus");
        assert_eq!(envelope.payload, br#"{"RPM":2500.0}"#.to_vec());
        assert!(envelope.retain);
        assert_eq!(envelope.qos, 0);
    }

    #[test]
    fn test_frame_to_envelope_by_id_raw_bytes() {
        let config = BridgeConfig::new()
            .with_naming(NamingConvention::ById)
            .with_payload_format(PayloadFormat::RawBytes)
            .with_delivery(1, false);
        let translator = Translator::new(catalog(), config);
        let envelope = translator.frame_to_envelope(&engine_frame()).unwrap().unwrap();

        assert_eq!(envelope.topic, "can/received/0x100");
        assert_eq!(envelope.payload, engine_frame().data);
        assert_eq!(envelope.qos, 1);
        assert!(!envelope.retain);
    }

    #[test]
    fn test_unknown_frame_policies() {
        let frame = RawFrame::new(0x999, vec![0xDE, 0xAD]);

        let drop = Translator::new(
            catalog(),
            BridgeConfig::new().with_unknown_frame_policy(UnknownFramePolicy::Drop),
        );
        assert_eq!(drop.frame_to_envelope(&frame).unwrap(), None);

        let forward = Translator::new(catalog(), BridgeConfig::new());
        let envelope = forward.frame_to_envelope(&frame).unwrap().unwrap();
        assert_eq!(envelope.topic, "can/received/unknown");
        assert_eq!(
            envelope.payload,
            br#"{"message_id":2457,"data":"dead"}"#.to_vec()
        );
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let translator = Translator::new(catalog(), BridgeConfig::new());
        let err = translator
            .frame_to_envelope(&RawFrame::new(0x100, vec![0x10]))
            .unwrap_err();
        assert!(matches!(err, BridgeError::DecodeError { can_id: 0x100, .. }));
    }

    #[test]
    fn test_envelope_to_frame_json() {
        let translator = Translator::new(catalog(), BridgeConfig::new());
        let frame = translator
            .envelope_to_frame(&MqttEnvelope::new(
                "can/send/EngineStatus",
                br#"{"RPM": 2500.0}"#.to_vec(),
            ))
            .unwrap();
        assert_eq!(frame, engine_frame());

        let frame = translator
            .envelope_to_frame(&MqttEnvelope::new("can/send/Doors", br#"{"Open": "Closed"}"#.to_vec()))
            .unwrap();
        assert_eq!(frame.data, vec![0]);
    }

    #[test]
    fn test_envelope_to_frame_errors() {
        let translator = Translator::new(catalog(), BridgeConfig::new());

        let err = translator
            .envelope_to_frame(&MqttEnvelope::new("can/send/Nope", b"{}".to_vec()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnrecognizedTopic(_)));

        let err = translator
            .envelope_to_frame(&MqttEnvelope::new("can/send/EngineStatus", b"{}".to_vec()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::MissingSignal { .. }));

        let err = translator
            .envelope_to_frame(&MqttEnvelope::new("can/send/EngineStatus", b"{".to_vec()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPayload(_)));
    }

    #[test]
    fn test_raw_command_topic() {
        let translator = Translator::new(
            catalog(),
            BridgeConfig::new().with_raw_command_topic("can/send/raw"),
        );
        assert_eq!(translator.subscriptions(), vec!["can/send/+"]);

        let frame = translator
            .envelope_to_frame(&MqttEnvelope::new(
                "can/send/raw",
                br#"{"message_id": 1234, "data": "0102"}"#.to_vec(),
            ))
            .unwrap();
        assert_eq!(frame.can_id, 1234);
        assert_eq!(frame.data, vec![1, 2]);
    }

    #[test]
    fn test_raw_command_topic_outside_prefix() {
        let translator = Translator::new(
            catalog(),
            BridgeConfig::new().with_raw_command_topic("can/raw"),
        );
        assert_eq!(translator.subscriptions(), vec!["can/send/+", "can/raw"]);

        let nested = Translator::new(
            catalog(),
            BridgeConfig::new().with_raw_command_topic("can/send/raw/frames"),
        );
        assert_eq!(
            nested.subscriptions(),
            vec!["can/send/+", "can/send/raw/frames"]
        );
    }

    #[test]
    fn test_catchall_per_id() {
        let translator = Translator::new(catalog(), BridgeConfig::new().with_catchall_per_id(true));
        let first = RawFrame::new(0x999, vec![0xDE, 0xAD]);
        let second = RawFrame::new(0x1ABCDEF, vec![0x01]);

        let envelope = translator.frame_to_envelope(&first).unwrap().unwrap();
        assert_eq!(envelope.topic, "can/received/unknown/0x999");
        let other = translator.frame_to_envelope(&second).unwrap().unwrap();
        assert_eq!(other.topic, "can/received/unknown/0x1ABCDEF");

        // Alternating identifiers no longer overwrite each other's last payload
        let mut published = PublishedTopics::default();
        assert!(published.record(&envelope, true));
        assert!(published.record(&other, true));
        assert!(!published.record(&envelope, true));
        assert!(!published.record(&other, true));
        assert_eq!(published.topics().count(), 2);
    }

    #[test]
    fn test_published_topics_only_changes() {
        let mut published = PublishedTopics::default();
        let first = MqttEnvelope::new("t/a", vec![1]);
        let second = MqttEnvelope::new("t/a", vec![2]);

        assert!(published.record(&first, true));
        assert!(!published.record(&first, true));
        assert!(published.record(&second, true));
        assert!(published.record(&second, false));
        assert_eq!(published.topics().count(), 1);
    }
}
