use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use ptmp_chat::cli::{ClientArgs, ClientCommand};
use ptmp_chat::display::{prompt_line, StdioDisplay};
use ptmp_chat::{client, discovery, frame, log_setup};
use tokio::net::lookup_host;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    log_setup::init(args.verbose)?;

    match args.command {
        ClientCommand::Connect { host, tcp_port } => {
            let addr: SocketAddr = lookup_host((host.as_str(), tcp_port))
                .await?
                .next()
                .ok_or_else(|| anyhow::anyhow!("could not resolve {host}"))?;

            let username = prompt_line("Enter your username: ", 32)?;
            let display = Arc::new(StdioDisplay::new());
            let cancel = CancellationToken::new();

            let run_cancel = cancel.clone();
            let run_handle = tokio::spawn(client::run(
                addr,
                username,
                frame::DEFAULT_MAX_FRAME_LEN,
                display,
                run_cancel,
            ));

            tokio::select! {
                _ = tokio::signal::ctrl_c() => cancel.cancel(),
                result = run_handle => { result??; }
            }
            Ok(())
        }
        ClientCommand::Discover {
            broadcast_address,
            udp_port,
        } => {
            println!("Probing for servers on {broadcast_address}:{udp_port}...");
            let found = discovery::probe(broadcast_address, udp_port).await?;
            if found.is_empty() {
                println!("Timed out - no servers found.");
            } else {
                for server in found {
                    println!("Received reply from {}: {}", server.addr.ip(), server.room_name);
                }
            }
            Ok(())
        }
    }
}
