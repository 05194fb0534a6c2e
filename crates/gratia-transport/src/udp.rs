//! UDP datagram plumbing

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gratia_core::{GratiaError, GratiaResult};

/// Largest datagram accepted or produced by the UDP carriers
pub const MAX_DATAGRAM_SIZE: usize = 16 * 1024;

/// Bound UDP socket
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> GratiaResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| GratiaError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| GratiaError::TransportError(e.to_string()))?;

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send raw bytes to a destination
    pub async fn send_bytes_to(&self, bytes: &[u8], dest: SocketAddr) -> GratiaResult<()> {
        check_size(bytes)?;
        self.socket
            .send_to(bytes, dest)
            .await
            .map_err(|e| GratiaError::TransportError(e.to_string()))?;
        Ok(())
    }

    /// Send without waiting; fails if the socket is not ready
    pub fn try_send_bytes_to(&self, bytes: &[u8], dest: SocketAddr) -> GratiaResult<()> {
        check_size(bytes)?;
        self.socket
            .try_send_to(bytes, dest)
            .map_err(|e| GratiaError::TransportError(e.to_string()))?;
        Ok(())
    }

    /// Receive raw bytes
    pub async fn recv_bytes_from(&self) -> GratiaResult<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| GratiaError::TransportError(e.to_string()))?;

        Ok((buf[..len].to_vec(), addr))
    }

    /// Get a clone of the socket for concurrent operations
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

fn check_size(bytes: &[u8]) -> GratiaResult<()> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(GratiaError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(())
}

/// Packet receiver channel
pub type PacketReceiver = mpsc::Receiver<(Vec<u8>, SocketAddr)>;

/// Start a background receive loop
///
/// The loop ends once the receiver is dropped or the returned task is aborted.
pub fn start_receive_loop(
    socket: Arc<UdpSocket>,
    buffer_size: usize,
) -> (PacketReceiver, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer_size);

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let packet = buf[..len].to_vec();
                    if tx.send((packet, addr)).await.is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                }
            }
        }
    });

    (rx, task)
}
