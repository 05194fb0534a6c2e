//! `gratia-relay`: serve the mesh rendezvous protocol over TCP

use clap::Parser;
use gratia_relay::{serve, RelayArgs};
use gratia_runtime::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = RelayArgs::parse();
    init_tracing(&args.log, args.json_logs)?;

    serve(
        args.bind,
        async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("received Ctrl+C");
            }
        },
        |addr| println!("gratia relay listening on {addr}"),
    )
    .await?;
    Ok(())
}
