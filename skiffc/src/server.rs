use clap::Args;
use skiff::{Connection, OpCode};
use tokio::net::TcpStream;

/// Command to run a WebSocket echo server.
///
/// Accepts upgrades at the configured path, logs every received message,
/// and echoes text messages back to the sender.
#[derive(Args)]
#[command(alias = "s")]
pub struct Cmd {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Request path that accepts websocket upgrades.
    #[arg(short, long, default_value = "/chat")]
    path: String,
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        println!("> Listening on ws://{}{}", cmd.addr, cmd.path);
        tokio::select! {
            result = skiff::listen(&cmd.addr, &cmd.path, handle_connection) => result?,
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, shutting down");
            }
        }
        anyhow::Ok(())
    })?;

    Ok(())
}

async fn handle_connection(mut conn: Connection<TcpStream>) {
    loop {
        match conn.receive().await {
            Ok((OpCode::Text, payload)) => {
                log::info!(
                    "received text message: {}",
                    String::from_utf8_lossy(&payload)
                );
                if let Err(err) = conn.send(OpCode::Text, &payload).await {
                    log::warn!("failed to echo message: {err}");
                    return;
                }
            }
            Ok((opcode, payload)) => {
                log::info!("received {:?} message: {} bytes", opcode, payload.len());
            }
            Err(err) => {
                log::info!("connection finished: {err}");
                return;
            }
        }
    }
}
