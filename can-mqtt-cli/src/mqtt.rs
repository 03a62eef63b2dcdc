//! MQTT transport
//!
//! Connects to the broker with rumqttc and bridges it to the router's envelope
//! channels: one task drives the connection and feeds subscribed messages in,
//! another drains the router's outgoing messages into the client.

use crate::config::MqttConfig;
use can_mqtt_bridge::MqttEnvelope;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Capacity of the client request queue
const REQUEST_CAPACITY: usize = 64;

/// Pause before the event loop retries a failed connection
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// How long to wait for the disconnect to reach the broker
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Running connection and publisher tasks
pub struct MqttLink {
    publisher: JoinHandle<()>,
    event_loop: JoinHandle<()>,
}

impl MqttLink {
    /// Wait for pending publishes to be handed over, then disconnect
    pub async fn finish(mut self) {
        if let Err(e) = self.publisher.await {
            log::error!("MQTT publisher failed: {}", e);
        }

        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.event_loop)
            .await
            .is_err()
        {
            log::warn!("MQTT disconnect timed out");
            self.event_loop.abort();
        }
    }
}

/// Map a numeric QoS level onto the client's enum
pub fn to_qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Connect to the broker described by `config`
///
/// `subscriptions` are (re)subscribed after every connection acknowledgement;
/// messages arriving on them are sent to `received`. Envelopes taken from
/// `to_publish` are published until that channel closes.
pub fn connect(
    config: &MqttConfig,
    subscriptions: Vec<String>,
    qos: u8,
    received: mpsc::Sender<MqttEnvelope>,
    to_publish: mpsc::Receiver<MqttEnvelope>,
) -> MqttLink {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if let Some(ref username) = config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    log::info!("Connecting to MQTT broker {}:{}", config.host, config.port);

    let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

    let event_loop = tokio::spawn(drive(
        event_loop,
        client.clone(),
        subscriptions,
        to_qos(qos),
        received,
    ));
    let publisher = tokio::spawn(publish_all(client, to_publish));

    MqttLink {
        publisher,
        event_loop,
    }
}

async fn drive(
    mut event_loop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    qos: QoS,
    received: mpsc::Sender<MqttEnvelope>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                log::info!("Connected to MQTT broker");
                for filter in &subscriptions {
                    match client.try_subscribe(filter.as_str(), qos) {
                        Ok(()) => log::info!("Subscribed to {}", filter),
                        Err(e) => log::error!("Failed to subscribe to {}: {}", filter, e),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let envelope = MqttEnvelope::new(publish.topic, publish.payload.to_vec())
                    .with_delivery(publish.qos as u8, publish.retain);
                forward(&received, envelope);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::info!("Disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("MQTT connection error: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Hand an inbound message to the router without blocking the event loop;
/// a full command queue drops the message
fn forward(received: &mpsc::Sender<MqttEnvelope>, envelope: MqttEnvelope) {
    match received.try_send(envelope) {
        Ok(()) => {}
        Err(TrySendError::Full(envelope)) => {
            log::warn!("Command queue full, dropping message on {}", envelope.topic);
        }
        Err(TrySendError::Closed(_)) => log::debug!("Router stopped, ignoring message"),
    }
}

async fn publish_all(client: AsyncClient, mut to_publish: mpsc::Receiver<MqttEnvelope>) {
    while let Some(envelope) = to_publish.recv().await {
        let MqttEnvelope {
            topic,
            payload,
            qos,
            retain,
        } = envelope;

        if let Err(e) = client.publish(topic.as_str(), to_qos(qos), retain, payload).await {
            log::error!("Failed to publish to {}: {}", topic, e);
            break;
        }
    }

    if let Err(e) = client.disconnect().await {
        log::debug!("MQTT disconnect request failed: {}", e);
    }
}
