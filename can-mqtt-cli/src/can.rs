//! SocketCAN transport
//!
//! Bridges a SocketCAN interface to the router's frame channels. Reading and
//! writing run on blocking threads; each side ends when its channel closes.

use anyhow::Result;
use can_mqtt_bridge::RawFrame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(target_os = "linux")]
use anyhow::{anyhow, Context};
#[cfg(target_os = "linux")]
use socketcan::{
    CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, SocketOptions, StandardId,
};
#[cfg(target_os = "linux")]
use std::io;
#[cfg(target_os = "linux")]
use std::time::Duration;

/// How often the reader wakes up to notice a closed channel
#[cfg(target_os = "linux")]
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause before retrying a frame the interface had no room for
#[cfg(target_os = "linux")]
const BUSY_BACKOFF: Duration = Duration::from_millis(5);

/// Write attempts per frame while the transmit queue stays full
#[cfg(target_os = "linux")]
const BUSY_ATTEMPTS: u32 = 3;

/// Linux errno for a full interface transmit queue
#[cfg(target_os = "linux")]
const ENOBUFS: i32 = 105;

/// Running reader and writer threads of an open interface
pub struct CanBus {
    interface: String,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CanBus {
    /// Wait for both threads to end
    pub async fn finish(self) {
        if let Err(e) = self.reader.await {
            log::error!("CAN reader for {} failed: {}", self.interface, e);
        }
        if let Err(e) = self.writer.await {
            log::error!("CAN writer for {} failed: {}", self.interface, e);
        }
        log::info!("CAN interface {} closed", self.interface);
    }
}

/// Open `interface`, forwarding received frames to `received` and transmitting
/// frames taken from `to_transmit`
#[cfg(target_os = "linux")]
pub fn open(
    interface: &str,
    received: mpsc::Sender<RawFrame>,
    to_transmit: mpsc::Receiver<RawFrame>,
) -> Result<CanBus> {
    let rx_socket = CanSocket::open(interface)
        .with_context(|| format!("Failed to open CAN interface {}", interface))?;
    rx_socket
        .set_read_timeout(READ_TIMEOUT)
        .context("Failed to set CAN read timeout")?;

    let tx_socket = CanSocket::open(interface)
        .with_context(|| format!("Failed to open CAN interface {}", interface))?;

    log::info!("CAN interface {} opened", interface);

    let reader = {
        let interface = interface.to_string();
        tokio::task::spawn_blocking(move || read_loop(rx_socket, received, &interface))
    };
    let writer = {
        let interface = interface.to_string();
        tokio::task::spawn_blocking(move || write_loop(tx_socket, to_transmit, &interface))
    };

    Ok(CanBus {
        interface: interface.to_string(),
        reader,
        writer,
    })
}

#[cfg(not(target_os = "linux"))]
pub fn open(
    interface: &str,
    _received: mpsc::Sender<RawFrame>,
    _to_transmit: mpsc::Receiver<RawFrame>,
) -> Result<CanBus> {
    anyhow::bail!(
        "Cannot open CAN interface {}: SocketCAN is only available on Linux",
        interface
    )
}

#[cfg(target_os = "linux")]
fn read_loop(socket: CanSocket, received: mpsc::Sender<RawFrame>, interface: &str) {
    log::debug!("CAN read loop started on {}", interface);

    while !received.is_closed() {
        match socket.read_frame() {
            Ok(frame) => {
                let Some(frame) = from_socket_frame(&frame) else {
                    log::trace!("Ignoring non-data frame on {}", interface);
                    continue;
                };
                log::trace!("{} RX: ID=0x{:X} Data={:02X?}", interface, frame.can_id, frame.data);
                if received.blocking_send(frame).is_err() {
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                log::error!("Error reading from {}: {}", interface, e);
                break;
            }
        }
    }

    log::debug!("CAN read loop on {} terminated", interface);
}

#[cfg(target_os = "linux")]
fn write_loop(socket: CanSocket, mut to_transmit: mpsc::Receiver<RawFrame>, interface: &str) {
    while let Some(frame) = to_transmit.blocking_recv() {
        let socket_frame = match to_socket_frame(&frame) {
            Ok(socket_frame) => socket_frame,
            Err(e) => {
                log::warn!("Not transmitting 0x{:X} on {}: {}", frame.can_id, interface, e);
                continue;
            }
        };

        match transmit(&socket, &socket_frame) {
            Ok(()) => {
                log::trace!("{} TX: ID=0x{:X} Data={:02X?}", interface, frame.can_id, frame.data);
            }
            Err(e) if is_bus_busy(&e) => {
                log::warn!("Dropping 0x{:X}, {} is busy: {}", frame.can_id, interface, e);
            }
            Err(e) => {
                log::error!("Error writing to {}: {}", interface, e);
                break;
            }
        }
    }

    log::debug!("CAN write loop on {} terminated", interface);
}

/// Write one frame, backing off while the transmit queue is full
#[cfg(target_os = "linux")]
fn transmit(socket: &CanSocket, frame: &CanFrame) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        match socket.write_frame(frame) {
            Err(e) if is_bus_busy(&e) && attempt < BUSY_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(BUSY_BACKOFF);
            }
            result => return result,
        }
    }
}

/// Write errors that only cost the current frame
#[cfg(target_os = "linux")]
fn is_bus_busy(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    ) || e.raw_os_error() == Some(ENOBUFS)
}

/// Data frames only; remote and error frames carry no signals
#[cfg(target_os = "linux")]
fn from_socket_frame(frame: &CanFrame) -> Option<RawFrame> {
    match frame {
        CanFrame::Data(_) => Some(
            RawFrame::new(frame.raw_id(), frame.data().to_vec()).with_extended(frame.is_extended()),
        ),
        CanFrame::Remote(_) | CanFrame::Error(_) => None,
    }
}

#[cfg(target_os = "linux")]
fn to_socket_frame(frame: &RawFrame) -> Result<CanFrame> {
    if frame.is_fd || frame.data.len() > 8 {
        return Err(anyhow!(
            "{} byte payload needs CAN FD, interface is classic CAN",
            frame.dlc()
        ));
    }

    let id = if frame.is_extended {
        ExtendedId::new(frame.can_id).map(Id::Extended)
    } else {
        u16::try_from(frame.can_id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    }
    .ok_or_else(|| anyhow!("invalid CAN ID 0x{:X}", frame.can_id))?;

    CanFrame::new(id, &frame.data).ok_or_else(|| anyhow!("failed to build CAN frame"))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_frame_conversion() {
        let frame = RawFrame::new(0x123, vec![1, 2, 3]);
        let socket_frame = to_socket_frame(&frame).unwrap();
        assert_eq!(socket_frame.raw_id(), 0x123);
        assert!(!socket_frame.is_extended());
        assert_eq!(from_socket_frame(&socket_frame), Some(frame));

        let extended = RawFrame::new(0x1ABCDEF, vec![0xFF]);
        let socket_frame = to_socket_frame(&extended).unwrap();
        assert!(socket_frame.is_extended());
        assert_eq!(from_socket_frame(&socket_frame), Some(extended));
    }

    #[test]
    fn test_busy_bus_errors_are_transient() {
        assert!(is_bus_busy(&io::Error::from_raw_os_error(ENOBUFS)));
        assert!(is_bus_busy(&io::Error::from(io::ErrorKind::WouldBlock)));

        // ENETDOWN and ENODEV: the interface is gone
        assert!(!is_bus_busy(&io::Error::from_raw_os_error(100)));
        assert!(!is_bus_busy(&io::Error::from_raw_os_error(19)));
    }

    #[test]
    fn test_fd_payload_rejected() {
        let frame = RawFrame::new(0x123, vec![0; 12]);
        assert!(to_socket_frame(&frame).is_err());
    }
}
