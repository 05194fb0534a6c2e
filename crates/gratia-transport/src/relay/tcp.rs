//! Relay over TCP, one JSON message per line

use std::net::SocketAddr;
use std::sync::Arc;

use gratia_core::{GratiaError, GratiaResult};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{LinkId, RelayInbound, RelayLink, RelayMessage, RelaySwitch};

/// Longest line accepted from either side
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Client link to a TCP relay
pub struct TcpRelayLink {
    outbound: mpsc::UnboundedSender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    peer_addr: SocketAddr,
}

impl TcpRelayLink {
    /// Connect to a relay server
    pub async fn connect(addr: SocketAddr) -> GratiaResult<(Arc<Self>, RelayInbound)> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| GratiaError::TransportError(e.to_string()))?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    tracing::debug!(error = %e, "relay write failed");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.len() > MAX_LINE_SIZE {
                            tracing::debug!(len = line.len(), "relay line too long");
                            continue;
                        }
                        match RelayMessage::decode(&line) {
                            Ok(msg) => {
                                if in_tx.send(msg).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::trace!(error = %e, "dropping relay line"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "relay read failed");
                        break;
                    }
                }
            }
        });

        tracing::info!(relay = %peer_addr, "connected to relay");
        let link = TcpRelayLink {
            outbound: out_tx,
            tasks: Mutex::new(vec![writer, reader]),
            peer_addr,
        };
        Ok((Arc::new(link), in_rx))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl RelayLink for TcpRelayLink {
    fn send(&self, msg: RelayMessage) -> GratiaResult<()> {
        let mut line = msg.encode()?;
        line.push('\n');
        self.outbound
            .send(line)
            .map_err(|_| GratiaError::RelayUnavailable)
    }

    fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for TcpRelayLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Relay server speaking newline-delimited JSON
pub struct RelayServer {
    listener: TcpListener,
    switch: Arc<Mutex<RelaySwitch>>,
}

impl RelayServer {
    pub async fn bind(addr: SocketAddr) -> GratiaResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GratiaError::TransportError(e.to_string()))?;
        Ok(RelayServer {
            listener,
            switch: Arc::new(Mutex::new(RelaySwitch::new())),
        })
    }

    pub fn local_addr(&self) -> GratiaResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the task is dropped
    pub async fn run(self) -> GratiaResult<()> {
        tracing::info!(addr = %self.local_addr()?, "relay listening");
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("relay accept error: {}", e);
                    continue;
                }
            };
            let (link, outbox) = self.switch.lock().attach();
            tracing::debug!(%addr, link, "relay client connected");
            tokio::spawn(serve_client(Arc::clone(&self.switch), link, outbox, stream));
        }
    }

    /// Spawn `run` on the current runtime
    pub fn spawn(self) -> JoinHandle<GratiaResult<()>> {
        tokio::spawn(self.run())
    }
}

async fn serve_client(
    switch: Arc<Mutex<RelaySwitch>>,
    link: LinkId,
    mut outbox: mpsc::UnboundedReceiver<RelayMessage>,
    stream: TcpStream,
) {
    let (read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let mut line = match msg.encode() {
                Ok(line) => line,
                Err(e) => {
                    tracing::debug!(error = %e, "relay encode failed");
                    continue;
                }
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.len() > MAX_LINE_SIZE {
            continue;
        }
        match RelayMessage::decode(&line) {
            Ok(msg) => switch.lock().handle(link, msg),
            Err(e) => tracing::trace!(link, error = %e, "dropping client line"),
        }
    }

    switch.lock().detach(link);
    writer.abort();
    tracing::debug!(link, "relay client left");
}
