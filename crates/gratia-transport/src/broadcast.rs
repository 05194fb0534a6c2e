//! Local multi-process broadcast carrier
//!
//! Every participant binds the first free port of a small loopback port
//! range and sends each frame to all other ports of the range. Packets that
//! are not `{kind: "signal"}` frames are ignored.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use gratia_core::{GratiaError, GratiaResult, GratiaSignal, ListenerSet, SignalFrame, Subscription};
use gratia_signal::{SignalChannel, SignalHandler};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{start_receive_loop, UdpTransport};

/// Broadcast carrier configuration
#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    pub host: IpAddr,
    /// First port of the shared range
    pub base_port: u16,
    /// Number of ports in the shared range, i.e. the participant limit
    pub port_span: u16,
    /// Receive queue depth
    pub buffer_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 47_800,
            port_span: 16,
            buffer_size: 256,
        }
    }
}

impl BroadcastConfig {
    pub fn with_ports(mut self, base_port: u16, port_span: u16) -> Self {
        self.base_port = base_port;
        self.port_span = port_span;
        self
    }

    fn ports(&self) -> impl Iterator<Item = u16> {
        let end = self.base_port.saturating_add(self.port_span);
        self.base_port..end
    }
}

/// UDP carrier reaching every process on the same port range
pub struct UdpBroadcastChannel {
    transport: UdpTransport,
    targets: Vec<SocketAddr>,
    listeners: ListenerSet<GratiaSignal>,
    /// Receive loop and dispatcher
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpBroadcastChannel {
    /// Bind the first free port of the range and start receiving
    pub async fn bind(config: BroadcastConfig) -> GratiaResult<Arc<Self>> {
        if config.port_span == 0 {
            return Err(GratiaError::InvalidConfig("broadcast port span is zero".into()));
        }

        let mut bound = None;
        for port in config.ports() {
            match UdpTransport::bind(SocketAddr::new(config.host, port)).await {
                Ok(transport) => {
                    bound = Some(transport);
                    break;
                }
                Err(e) => tracing::trace!(port, error = %e, "broadcast port taken"),
            }
        }
        let transport = bound.ok_or_else(|| {
            GratiaError::TransportError(format!(
                "no free port in {}..{}",
                config.base_port,
                config.base_port.saturating_add(config.port_span)
            ))
        })?;

        let own = transport.local_addr();
        let targets = config
            .ports()
            .map(|port| SocketAddr::new(config.host, port))
            .filter(|addr| *addr != own)
            .collect();

        let listeners = ListenerSet::new();
        let (mut packets, loop_task) = start_receive_loop(transport.socket(), config.buffer_size);
        let sink = listeners.clone();
        let receive_loop = loop_task.abort_handle();
        let dispatch = tokio::spawn(async move {
            while let Some((bytes, from)) = packets.recv().await {
                match SignalFrame::decode(&bytes) {
                    Ok(signal) => sink.notify(&signal),
                    Err(e) => tracing::trace!(%from, error = %e, "dropping packet"),
                }
            }
            receive_loop.abort();
        });

        tracing::info!(addr = %own, peers = config.port_span - 1, "broadcast carrier bound");
        Ok(Arc::new(UdpBroadcastChannel {
            transport,
            targets,
            listeners,
            tasks: Mutex::new(vec![loop_task, dispatch]),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Whether the receive side is still running
    pub fn is_receiving(&self) -> bool {
        self.tasks.lock().iter().any(|task| !task.is_finished())
    }

    /// Stop receiving and detach every subscriber
    pub fn close(&self) {
        for task in self.tasks.lock().iter() {
            task.abort();
        }
        self.listeners.clear();
    }
}

impl SignalChannel for UdpBroadcastChannel {
    fn send(&self, signal: &GratiaSignal) -> GratiaResult<()> {
        let frame = SignalFrame::encode(signal)?;
        for target in &self.targets {
            // Nobody listening on most of the range; that is expected
            if let Err(e) = self.transport.try_send_bytes_to(frame.as_bytes(), *target) {
                tracing::trace!(%target, error = %e, "broadcast send skipped");
            }
        }
        Ok(())
    }

    fn subscribe(&self, handler: SignalHandler) -> Subscription {
        self.listeners.subscribe(move |signal| handler(signal))
    }
}

impl Drop for UdpBroadcastChannel {
    fn drop(&mut self) {
        self.close();
    }
}
