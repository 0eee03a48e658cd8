//! chainfeed CLI — follow a chain's head into a cursor store.
//!
//! Usage:
//! ```bash
//! CHAIN_RPC_URL=https://rpc.example CHAIN_WSS_URL=wss://ws.example \
//!   STORE_URL=sqlite:chainfeed.db CHAIN_ID=1 chainfeed run
//! chainfeed status --store-url sqlite:chainfeed.db --chain-id 1
//! chainfeed tail   --store-url sqlite:chainfeed.db --chain-id 1 --after 0 --limit 20
//! ```

mod store;

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use chainfeed_core::store::CursorStore;
use chainfeed_core::types::ChainId;
use chainfeed_evm::{Connector, ConnectorConfig, EvmBlockSource, HeadChannel};
use chainfeed_rpc::{HttpClientConfig, HttpRpcClient, WsPushTransport};

use crate::store::AnyStore;

#[derive(Parser, Debug)]
#[command(name = "chainfeed", version, about = "Chain head ingestion connector")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to new heads and persist every block until interrupted.
    Run(RunArgs),
    /// Print the stored cursor and log length.
    Status(StoreArgs),
    /// Print log entries after a position.
    Tail(TailArgs),
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Cursor store URL (`memory:`, `sqlite:<path>`, `postgres://…`).
    #[arg(long, env = "STORE_URL", default_value = "sqlite:chainfeed.db")]
    store_url: Url,
    /// Chain identity; namespaces the cursor and log keys.
    #[arg(long, env = "CHAIN_ID")]
    chain_id: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// HTTP JSON-RPC endpoint used for block fetches.
    #[arg(long, env = "CHAIN_RPC_URL")]
    rpc_url: Url,
    /// WebSocket endpoint used for the head subscription.
    #[arg(long, env = "CHAIN_WSS_URL")]
    ws_url: Url,
    #[command(flatten)]
    store: StoreArgs,
    /// How long shutdown waits for the unsubscribe acknowledgment.
    #[arg(long, default_value = "5000")]
    unsubscribe_grace_ms: u64,
    /// Per-request timeout for the HTTP endpoint.
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,
}

#[derive(Args, Debug)]
struct TailArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Only entries with a position greater than this.
    #[arg(long, default_value = "0")]
    after: u64,
    #[arg(long, default_value = "10")]
    limit: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Status(args) => cmd_status(args).await,
        Command::Tail(args) => cmd_tail(args).await,
    }
}

fn check_scheme(url: &Url, allowed: &[&str], what: &str) -> anyhow::Result<()> {
    if !allowed.contains(&url.scheme()) {
        bail!("{what} must use one of {allowed:?}, got {url}");
    }
    Ok(())
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    check_scheme(&args.rpc_url, &["http", "https"], "CHAIN_RPC_URL")?;
    check_scheme(&args.ws_url, &["ws", "wss"], "CHAIN_WSS_URL")?;

    let chain_id = ChainId::from(args.store.chain_id.clone());
    tracing::info!(pid = std::process::id(), chain = %chain_id, "Starting chainfeed");

    let rpc = HttpRpcClient::new(
        args.rpc_url.as_str(),
        HttpClientConfig {
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        },
    )?;
    let store = AnyStore::open(&args.store.store_url, &chain_id).await?;
    let (sink, inbound) = match WsPushTransport::connect(args.ws_url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            store.close().await;
            return Err(e).context("connect push transport");
        }
    };

    let config = ConnectorConfig::builder()
        .chain_id(chain_id)
        .unsubscribe_grace(Duration::from_millis(args.unsubscribe_grace_ms))
        .build();
    let mut connector = Connector::new(
        config,
        EvmBlockSource::new(rpc),
        store,
        HeadChannel::new(sink, inbound),
    );

    let cancel = CancellationToken::new();
    let signals = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let outcome = connector.run(cancel).await;
    signals.abort();

    let (_, store, head) = connector.into_parts();
    head.sink().close();
    store.close().await;

    outcome.context("connector stopped")
}

async fn cmd_status(args: StoreArgs) -> anyhow::Result<()> {
    let chain_id = ChainId::from(args.chain_id);
    let store = AnyStore::open(&args.store_url, &chain_id).await?;
    let result = async {
        let cursor = store.cursor().await?;
        let len = store.log_len().await?;
        Ok::<_, anyhow::Error>((cursor, len))
    }
    .await;
    store.close().await;

    let (cursor, len) = result?;
    println!("chain:   {chain_id}");
    println!("backend: {}", store.backend());
    match cursor {
        Some(c) => println!("cursor:  {c}"),
        None => println!("cursor:  (none)"),
    }
    println!("entries: {len}");
    Ok(())
}

async fn cmd_tail(args: TailArgs) -> anyhow::Result<()> {
    let chain_id = ChainId::from(args.store.chain_id);
    let store = AnyStore::open(&args.store.store_url, &chain_id).await?;
    let entries = store.entries_after(args.after, args.limit).await;
    store.close().await;

    for entry in entries? {
        println!("{}\t{}", entry.position, entry.data);
    }
    Ok(())
}

/// Resolves on SIGINT, SIGTERM, or SIGHUP.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(tokio::signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let hangup = unix_signal(tokio::signal::unix::SignalKind::hangup(), "SIGHUP");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = hangup => tracing::info!("Received SIGHUP"),
    }
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &'static str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, signal = name, "failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}
