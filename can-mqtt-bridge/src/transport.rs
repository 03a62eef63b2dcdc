//! Transport boundaries
//!
//! The router only sees four halves: a stream of received frames, a frame
//! transmitter, a stream of received MQTT messages and an MQTT publisher. Bus and
//! broker clients implement these; tokio mpsc endpoints implement them too, so
//! any client that can feed or drain a channel can be wired to the router.

use crate::types::{BridgeError, MqttEnvelope, RawFrame, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Source of frames received from the CAN bus
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame; `Ok(None)` means the bus side has closed
    async fn recv(&mut self) -> Result<Option<RawFrame>>;
}

/// Transmitter for frames going to the CAN bus
#[async_trait]
pub trait FrameSink: Send {
    /// Queue a frame for transmission
    async fn transmit(&mut self, frame: RawFrame) -> Result<()>;
}

/// Source of messages delivered by the MQTT subscription
#[async_trait]
pub trait EnvelopeSource: Send {
    /// Wait for the next message; `Ok(None)` means the broker side has closed
    async fn recv(&mut self) -> Result<Option<MqttEnvelope>>;
}

/// Publisher for messages going to the MQTT broker
#[async_trait]
pub trait EnvelopeSink: Send {
    /// Queue a message for publishing
    async fn publish(&mut self, envelope: MqttEnvelope) -> Result<()>;
}

#[async_trait]
impl FrameSource for mpsc::Receiver<RawFrame> {
    async fn recv(&mut self) -> Result<Option<RawFrame>> {
        Ok(mpsc::Receiver::recv(self).await)
    }
}

#[async_trait]
impl FrameSink for mpsc::Sender<RawFrame> {
    async fn transmit(&mut self, frame: RawFrame) -> Result<()> {
        self.send(frame)
            .await
            .map_err(|_| BridgeError::Transport("CAN transmit queue closed".to_string()))
    }
}

#[async_trait]
impl EnvelopeSource for mpsc::Receiver<MqttEnvelope> {
    async fn recv(&mut self) -> Result<Option<MqttEnvelope>> {
        Ok(mpsc::Receiver::recv(self).await)
    }
}

#[async_trait]
impl EnvelopeSink for mpsc::Sender<MqttEnvelope> {
    async fn publish(&mut self, envelope: MqttEnvelope) -> Result<()> {
        self.send(envelope)
            .await
            .map_err(|_| BridgeError::Transport("MQTT publish queue closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_frames() {
        let (mut tx, mut rx) = mpsc::channel::<RawFrame>(4);
        tx.transmit(RawFrame::new(0x100, vec![1])).await.unwrap();
        drop(tx);

        let frame = FrameSource::recv(&mut rx).await.unwrap();
        assert_eq!(frame, Some(RawFrame::new(0x100, vec![1])));
        assert_eq!(FrameSource::recv(&mut rx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_publish_queue_is_transport_error() {
        let (mut tx, rx) = mpsc::channel::<MqttEnvelope>(1);
        drop(rx);

        let err = tx.publish(MqttEnvelope::new("a/b", b"{}".to_vec())).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(err.is_fatal());
    }
}
