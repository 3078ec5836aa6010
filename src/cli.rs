use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast hub, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a hub and participate in the chat.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the hub should bind to. Use port 0 for an ephemeral
    /// port.
    #[arg(long, default_value = "127.0.0.1:9999")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name prefixed to every message this client sends.
    #[arg(long)]
    pub name: String,

    /// Address of the hub to connect to.
    #[arg(long, default_value = "127.0.0.1:9999")]
    pub server: SocketAddr,
}
