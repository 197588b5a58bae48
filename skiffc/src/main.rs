use clap::{Parser, Subcommand};

mod client;
mod server;

/// WebSocket client/server CLI built on skiff.
///
/// `skiffc server` runs an echo server; `skiffc client` connects to one,
/// sends a few demo messages, and closes cleanly. Set RUST_LOG=debug to
/// watch the frame traffic.
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Server(server::Cmd),
    Client(client::Cmd),
}

fn main() {
    env_logger::init();

    let args = Cli::parse();
    let res = match args.command {
        Commands::Server(cmd) => server::run(cmd),
        Commands::Client(cmd) => client::run(cmd),
    };
    if let Err(err) = res {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
