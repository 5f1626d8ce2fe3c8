use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use ptmp_chat::cli::{Mode, ServerArgs};
use ptmp_chat::display::StdioDisplay;
use ptmp_chat::{discovery, log_setup, server};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    log_setup::init(args.verbose)?;

    let bind_addr: SocketAddr = ([0, 0, 0, 0], args.tcp_port).into();
    let discovery_port = args.discovery_port.unwrap_or(args.tcp_port);

    let display = Arc::new(StdioDisplay::new());
    let cancel = CancellationToken::new();

    let config = server::ServerConfig {
        bind_addr,
        max_clients: args.max_clients,
        max_frame_len: args.max_frame_len,
        backlog: args.backlog,
    };

    let discovery_cancel = cancel.child_token();
    let discovery_handle = tokio::spawn(discovery::run_responder(
        discovery_port,
        args.room_name.clone(),
        discovery_cancel,
    ));

    let server_cancel = cancel.child_token();
    let server_handle = tokio::spawn(async move {
        match args.mode {
            Mode::Threaded => server::run_threaded(config, display, server_cancel).await,
            Mode::Reactor => server::run_reactor(config, display, server_cancel).await,
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutting down");
            cancel.cancel();
        }
        result = server_handle => {
            result??;
        }
    }

    cancel.cancel();
    let _ = discovery_handle.await;
    Ok(())
}
