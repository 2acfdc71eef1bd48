use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dropper_core::archive::prepare_source;
use dropper_core::pairing::resolve_peer;
use dropper_core::transfer::{
    ChunkedTransferReceiver, ChunkedTransferSender, fetch_file, make_client_endpoint,
    make_server_endpoint, run_server,
};
use dropper_core::{DropConfig, EncryptionKey, StreamCipherCodec, TransferError, TransferSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dropper")]
#[command(about = "Drop a file to another host on the same LAN", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Offer a file or folder and wait until it is fetched
    Drop {
        path: PathBuf,

        #[arg(long)]
        port: Option<u16>,

        /// Shared AES key (16, 24 or 32 characters)
        #[arg(long)]
        key: Option<String>,
    },
    /// Fetch a dropped file by its code
    Get {
        code: String,

        /// Directory to save into
        #[arg(short = 'p', long = "path")]
        dir: Option<PathBuf>,

        /// First three octets of the LAN, e.g. 192.168.1
        #[arg(long)]
        subnet: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = DropConfig::load();

    match cli.command {
        Command::Drop { path, port, key } => {
            if let Some(port) = port {
                config.port = port;
            }
            if key.is_some() {
                config.encryption_key = key;
            }
            drop_file(path, config).await
        }
        Command::Get {
            code,
            dir,
            subnet,
            port,
            key,
        } => {
            if let Some(dir) = dir {
                config.download_dir = dir;
            }
            if let Some(subnet) = subnet {
                config.subnet_prefix = subnet;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if key.is_some() {
                config.encryption_key = key;
            }
            get_file(&code, config).await
        }
    }
}

async fn drop_file(path: PathBuf, config: DropConfig) -> Result<()> {
    let key = encryption_key(&config)?;
    let source = prepare_source(&path).await?;

    let cipher = key
        .as_ref()
        .map(StreamCipherCodec::with_random_iv)
        .transpose()?;
    let sender = ChunkedTransferSender::new(config.chunk_size(), cipher);
    let session = Arc::new(TransferSession::new(source.path(), sender));

    let code = session.issue_code().context("can't generate drop code")?;
    let endpoint = make_server_endpoint(config.bind_addr())?;

    info!("your drop code: {}", code);

    tokio::select! {
        result = run_server(endpoint, session) => result.context("can't serve")?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, drop cancelled"),
    }

    // Folder archives live until here
    drop(source);
    Ok(())
}

async fn get_file(code: &str, config: DropConfig) -> Result<()> {
    let key = encryption_key(&config)?;
    let addr = resolve_peer(code, &config.subnet_prefix, config.port)?;
    let endpoint = make_client_endpoint()?;
    let receiver = ChunkedTransferReceiver::new(key);

    info!("looking for drop at {}", addr);
    let result = fetch_file(
        &endpoint,
        addr,
        code,
        &receiver,
        &config.download_dir,
        config.ping_timeout(),
    )
    .await;
    endpoint.wait_idle().await;

    match result {
        Ok(saved) => {
            info!("file saved to {}", saved.display());
            Ok(())
        }
        Err(TransferError::InvalidPairingCode) => bail!("drop code is incorrect"),
        Err(TransferError::PeerUnreachable { addr }) => {
            bail!("no drop answering at {}, check the code and that you share a network", addr)
        }
        Err(e) => Err(e).context("can't get file"),
    }
}

fn encryption_key(config: &DropConfig) -> Result<Option<EncryptionKey>> {
    config.encryption_key().context("invalid encryption key")
}
