mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::CONTENT_TYPE;
use rsa::RsaPublicKey;
use strata_core::primitives::transaction::Transaction;
use strata_core::protocol::communication;
use strata_crypto::keys;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry,
};

#[derive(Parser, Debug)]
#[command(version, about = "strata: a pedagogical peer-to-peer proof-of-work ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a ledger node
    Node {
        /// Network address other peers can use to reach this node
        #[arg(long)]
        address: String,
        /// Comma-separated list of peer addresses to connect to on startup
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        peers: Vec<String>,
    },
    /// Sign a transaction and submit it to a node
    Submit {
        /// Network address of the node to submit to
        #[arg(long)]
        address: String,
        /// Path to an RSA private key in PKCS#1 PEM form
        #[arg(long)]
        key: PathBuf,
        /// Data to include in the transaction
        #[arg(long)]
        data: String,
    },
    /// Generate an RSA-2048 private key
    Generate {
        /// File to write the PEM-encoded key into
        #[arg(long)]
        filename: PathBuf,
    },
}

fn setup_tracing() {
    let console_layer = fmt::layer()
        .with_ansi(true)
        .with_level(true)
        .with_filter(LevelFilter::INFO);

    Registry::default()
        .with(console_layer)
        .try_init()
        .expect("Failed to initialize tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<(), ()> {
    setup_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Node { address, peers } => run::run_node(address, peers).await,
        Command::Submit { address, key, data } => submit(address, key, data).await,
        Command::Generate { filename } => generate(filename),
    }
}

/// Loads the key, builds and signs a transaction around `data`, and posts
/// its canonical bytes to the node.
async fn submit(address: String, key_path: PathBuf, data: String) -> Result<(), ()> {
    let private_key = keys::load_pem(&key_path).map_err(|error| {
        tracing::error!(%error, path = %key_path.display(), "failed to load key");
    })?;

    let mut transaction =
        Transaction::new(RsaPublicKey::from(&private_key), 0, data.into_bytes());
    transaction
        .sign(&private_key)
        .map_err(|error| tracing::error!(%error, "failed to sign transaction"))?;
    let bytes = transaction
        .encode()
        .map_err(|error| tracing::error!(%error, "failed to serialize transaction"))?;

    let client = communication::http_client()
        .map_err(|error| tracing::error!(%error, "failed to build http client"))?;
    let response = client
        .post(format!("{address}/v1/transactions"))
        .header(CONTENT_TYPE, "text/plain")
        .body(bytes)
        .send()
        .await
        .map_err(|error| tracing::error!(%error, "failed to reach the node"))?;
    if !response.status().is_success() {
        tracing::error!(status = %response.status(), "node refused the transaction");
        return Err(());
    }
    tracing::info!(id = %transaction.id, "transaction submitted");
    Ok(())
}

/// Writes a fresh RSA-2048 key as `RSA PRIVATE KEY` PEM, mode 0600.
fn generate(filename: PathBuf) -> Result<(), ()> {
    let key = keys::generate().map_err(|error| {
        tracing::error!(%error, "failed to generate key");
    })?;
    keys::save_pem(&key, &filename).map_err(|error| {
        tracing::error!(%error, path = %filename.display(), "failed to write key");
    })?;
    tracing::info!(path = %filename.display(), "key written");
    Ok(())
}
