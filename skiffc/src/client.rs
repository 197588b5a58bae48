use std::time::Duration;

use clap::Args;
use skiff::OpCode;

/// Command to connect to a WebSocket server and exchange demo traffic.
///
/// Sends a text message and a ping per round, prints the echoed replies,
/// then runs the close handshake.
#[derive(Args)]
#[command(alias = "c")]
pub struct Cmd {
    /// Number of message rounds to send before closing.
    #[arg(short, long, default_value_t = 2)]
    count: u32,

    /// Delay between rounds, in milliseconds.
    #[arg(short, long, default_value_t = 1000)]
    delay_ms: u64,

    /// The WebSocket URL to connect to (ws://).
    #[arg(default_value = "ws://127.0.0.1:8080/chat")]
    url: String,
}

pub fn run(cmd: Cmd) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut conn = skiff::dial(&cmd.url).await?;
        println!("> Connected to {}", cmd.url);

        for round in 0..cmd.count {
            let msg = format!("Hello Websocket World! #{round}");
            conn.send(OpCode::Text, msg.as_bytes()).await?;
            conn.send(OpCode::Ping, b"ping ping ping!").await?;

            let (opcode, payload) = conn.receive().await?;
            println!("< {:?}: {}", opcode, String::from_utf8_lossy(&payload));

            tokio::time::sleep(Duration::from_millis(cmd.delay_ms)).await;
        }

        conn.close().await?;
        log::info!("connection closed");
        anyhow::Ok(())
    })?;

    Ok(())
}
