//! Gratia Relay - Rendezvous server for the peer mesh
//!
//! Peers join a room with `hello`, learn the room's membership from `peers`
//! broadcasts, and exchange offers, answers and candidates addressed by id.
//! The relay never sees presence signals themselves.

use std::future::Future;
use std::net::SocketAddr;

use clap::Parser;
use gratia_core::GratiaResult;
use gratia_transport::RelayServer;

pub const DEFAULT_BIND: &str = "127.0.0.1:47900";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Gratia mesh relay")]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(long, env = "GRATIA_RELAY_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "GRATIA_LOG", default_value = "info")]
    pub log: String,

    #[arg(long, env = "GRATIA_LOG_JSON")]
    pub json_logs: bool,
}

/// Serve until `shutdown` resolves
///
/// `on_bound` receives the bound address, which differs from `bind` when
/// port 0 was requested.
pub async fn serve<S>(
    bind: SocketAddr,
    shutdown: S,
    on_bound: impl FnOnce(SocketAddr),
) -> GratiaResult<()>
where
    S: Future<Output = ()>,
{
    let server = RelayServer::bind(bind).await?;
    on_bound(server.local_addr()?);

    tokio::select! {
        result = server.run() => result,
        _ = shutdown => {
            tracing::info!("relay shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gratia_core::PeerId;
    use gratia_transport::{RelayLink, RelayMessage, TcpRelayLink};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    #[test]
    fn test_args_defaults() {
        let args = RelayArgs::parse_from(["gratia-relay"]);
        assert_eq!(args.bind, DEFAULT_BIND.parse::<SocketAddr>().unwrap());
        assert_eq!(args.log, "info");
        assert!(!args.json_logs);

        let args = RelayArgs::parse_from(["gratia-relay", "--bind", "0.0.0.0:5000"]);
        assert_eq!(args.bind.port(), 5000);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let (addr_tx, addr_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            "127.0.0.1:0".parse().unwrap(),
            async move {
                let _ = stop_rx.await;
            },
            move |addr| {
                let _ = addr_tx.send(addr);
            },
        ));
        let addr = addr_rx.await.unwrap();

        let (link, mut inbound) = TcpRelayLink::connect(addr).await.unwrap();
        link.send(RelayMessage::Hello {
            room: "lobby".into(),
            peer_id: PeerId::from("alice"),
        })
        .unwrap();
        let reply = timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply,
            RelayMessage::Peers {
                list: vec![PeerId::from("alice")]
            }
        );

        stop_tx.send(()).unwrap();
        let result = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
