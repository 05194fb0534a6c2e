//! Interactive Gratia node
//!
//! Boots a hub and signal adapter on the configured carrier, then reads
//! console commands from stdin until `quit`, EOF or Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use gratia_core::{Mood, PeerId, Phase};
use gratia_runtime::{
    boot, execute, init_tracing, parse_command, parse_duration, GratiaConfig, TransportKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Gratia presence node")]
struct Args {
    /// JSON configuration file; flags override it
    #[arg(long, env = "GRATIA_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "GRATIA_PEER_ID")]
    peer_id: Option<String>,

    /// Correlation token copied into every signal
    #[arg(long, env = "GRATIA_SEED")]
    seed: Option<String>,

    #[arg(long, env = "GRATIA_PHASE")]
    phase: Option<Phase>,

    #[arg(long, env = "GRATIA_MOOD")]
    mood: Option<Mood>,

    /// local, broadcast or mesh
    #[arg(long, env = "GRATIA_TRANSPORT")]
    transport: Option<TransportKind>,

    /// Mesh room
    #[arg(long, env = "GRATIA_ROOM")]
    room: Option<String>,

    /// Mesh relay address
    #[arg(long, env = "GRATIA_RELAY")]
    relay: Option<SocketAddr>,

    /// First port of the local broadcast range
    #[arg(long, env = "GRATIA_BASE_PORT")]
    base_port: Option<u16>,

    #[arg(long, env = "GRATIA_PORT_SPAN")]
    port_span: Option<u16>,

    #[arg(long, env = "GRATIA_TICK_INTERVAL", value_parser = parse_duration)]
    tick_interval: Option<Duration>,

    #[arg(long, env = "GRATIA_BROADCAST_INTERVAL", value_parser = parse_duration)]
    broadcast_interval: Option<Duration>,

    #[arg(long, env = "GRATIA_DEBOUNCE", value_parser = parse_duration)]
    debounce: Option<Duration>,

    /// Keep the whisper out of outbound signals
    #[arg(long, env = "GRATIA_NO_WHISPER")]
    no_whisper: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "GRATIA_LOG")]
    log: Option<String>,

    #[arg(long, env = "GRATIA_LOG_JSON")]
    json_logs: bool,
}

impl Args {
    fn into_config(self) -> Result<GratiaConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => GratiaConfig::load(path)?,
            None => GratiaConfig::default(),
        };
        if let Some(id) = self.peer_id {
            config.peer_id = Some(PeerId::from(id));
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(phase) = self.phase {
            config.phase = phase;
        }
        if let Some(mood) = self.mood {
            config.mood = mood;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(room) = self.room {
            config.room = room;
        }
        if self.relay.is_some() {
            config.relay = self.relay;
        }
        if let Some(port) = self.base_port {
            config.broadcast_base_port = port;
        }
        if let Some(span) = self.port_span {
            config.broadcast_port_span = span;
        }
        if let Some(interval) = self.tick_interval {
            config.tick_interval = interval;
        }
        if let Some(interval) = self.broadcast_interval {
            config.broadcast_interval = interval;
        }
        if let Some(debounce) = self.debounce {
            config.debounce = debounce;
        }
        if self.no_whisper {
            config.include_whisper = false;
        }
        if let Some(filter) = self.log {
            config.log_filter = filter;
        }
        if self.json_logs {
            config.log_json = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;
    init_tracing(&config.log_filter, config.log_json)?;

    // This binary has no peer connectivity layer of its own
    let gratia = boot(config, None).await?;
    println!(
        "gratia node {} on {} (type `help`)",
        gratia.peer_id(),
        gratia.transport().kind()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(command)) => match execute(&gratia, command) {
                        Some(reply) => println!("{reply}"),
                        None => break,
                    },
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received Ctrl+C, shutting down");
                break;
            }
        }
    }

    gratia.shutdown();
    Ok(())
}
