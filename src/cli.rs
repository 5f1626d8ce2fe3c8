//! Command-line surface for both binaries.

use std::net::Ipv4Addr;

use clap::{Parser, Subcommand, ValueEnum};

/// Concurrency strategy for the server: a dedicated transmitter task per
/// registry, or a single reactor task multiplexing every socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Threaded,
    Reactor,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Threaded
    }
}

#[derive(Debug, Parser)]
#[command(name = "server", about = "LAN group-chat relay server")]
pub struct ServerArgs {
    /// TCP port to listen on.
    pub tcp_port: u16,

    /// Room name advertised over UDP discovery.
    #[arg(default_value = "chat")]
    pub room_name: String,

    /// Concurrency strategy.
    #[arg(long, value_enum, default_value_t = Mode::Threaded)]
    pub mode: Mode,

    /// Maximum simultaneously registered clients.
    #[arg(long, default_value_t = 32)]
    pub max_clients: usize,

    /// Listen backlog for the TCP socket.
    #[arg(long, default_value_t = 16)]
    pub backlog: u32,

    /// UDP port the discovery responder listens on (defaults to `tcp_port`).
    #[arg(long)]
    pub discovery_port: Option<u16>,

    /// Largest accepted frame, in bytes.
    #[arg(long, default_value_t = crate::frame::DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: u32,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Parser)]
#[command(name = "client", about = "LAN group-chat client")]
pub struct ClientArgs {
    #[command(subcommand)]
    pub command: ClientCommand,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// Connect directly to a known server.
    Connect {
        /// Server hostname or IP address.
        host: String,
        /// Server TCP port.
        tcp_port: u16,
    },
    /// Probe the LAN for servers via UDP broadcast.
    #[command(name = "discover")]
    Discover {
        /// Broadcast address to probe (e.g. 255.255.255.255).
        #[arg(short = 'b', long, default_value = "255.255.255.255")]
        broadcast_address: Ipv4Addr,
        /// UDP discovery port.
        udp_port: u16,
    },
}
