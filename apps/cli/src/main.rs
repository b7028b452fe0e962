//! ZenTalk command-line entry point: run a relay node, create an identity,
//! or query the DHT.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use zentalk_core::{NodeId, ZentalkError};
use zentalk_crypto::{IdentityKeyPair, RsaKeypair, SigningKeypair};
use zentalk_dht::DhtNode;
use zentalk_keystore::Keystore;
use zentalk_relay::{RelayConfig, RelayNode};
use zentalk_settings::{default_data_dir, Settings};

#[derive(Parser)]
#[command(name = "zentalk", version, about = "ZenTalk node utilities")]
struct Cli {
    /// Settings file (defaults to ~/.zentalk/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a long-term identity and store it in the keystore
    Keygen {
        /// Keystore directory (defaults to ~/.zentalk/keys)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Passphrase protecting the keystore
        #[arg(long, env = "ZENTALK_PASSPHRASE")]
        passphrase: String,
    },
    /// Run a relay node
    Relay {
        /// Keystore directory holding the relay identity
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Passphrase protecting the keystore
        #[arg(long, env = "ZENTALK_PASSPHRASE")]
        passphrase: String,
    },
    /// Look up a DHT key and print its value
    Lookup {
        /// 40-hex-char DHT key
        key: String,
        /// Bootstrap node "host:port"
        #[arg(long)]
        bootstrap: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    zentalk_logging::init_default();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load_or_default()?,
    };

    match cli.command {
        Command::Keygen {
            data_dir,
            passphrase,
        } => keygen(data_dir, &passphrase),
        Command::Relay {
            data_dir,
            passphrase,
        } => relay(settings, data_dir, &passphrase).await,
        Command::Lookup { key, bootstrap } => lookup(settings, &key, &bootstrap).await,
    }
}

fn keystore_at(data_dir: Option<PathBuf>, passphrase: &str) -> Result<Keystore> {
    let dir = data_dir.unwrap_or_else(|| default_data_dir().join("keys"));
    Keystore::open(&dir, passphrase).with_context(|| format!("opening keystore at {dir:?}"))
}

fn keygen(data_dir: Option<PathBuf>, passphrase: &str) -> Result<()> {
    let keystore = keystore_at(data_dir, passphrase)?;
    if keystore.load_identity()?.is_some() {
        bail!("keystore already holds an identity");
    }

    let identity = IdentityKeyPair::generate();
    let rsa = RsaKeypair::generate().context("RSA key generation")?;

    keystore.save_identity(&identity.to_data())?;
    keystore.save_rsa_pem(&rsa.private_key_pem().context("RSA PEM encoding")?)?;

    println!("address: {}", identity.address());
    Ok(())
}

fn load_identity(keystore: &Keystore) -> Result<(IdentityKeyPair, RsaKeypair)> {
    let identity = keystore
        .load_identity()?
        .map(|data| IdentityKeyPair::from_data(&data))
        .context("no identity in keystore; run `zentalk keygen` first")?;
    let rsa = keystore
        .load_rsa_pem()?
        .context("no RSA key in keystore; run `zentalk keygen` first")
        .and_then(|pem| RsaKeypair::from_private_pem(&pem).context("RSA key decode"))?;
    Ok((identity, rsa))
}

async fn relay(settings: Settings, data_dir: Option<PathBuf>, passphrase: &str) -> Result<()> {
    let keystore = keystore_at(data_dir, passphrase)?;
    let (identity, rsa) = load_identity(&keystore)?;

    // DHT node for descriptor publication and discovery
    let dht_addr: SocketAddr = settings
        .network
        .dht_listen
        .parse()
        .context("network.dht_listen")?;
    let dht = DhtNode::bind(dht_addr, identity.signing.clone())
        .await
        .map_err(ZentalkError::from)?;
    dht.start();
    for bootstrap in &settings.network.bootstrap_nodes {
        let endpoint: SocketAddr = bootstrap.parse().with_context(|| bootstrap.clone())?;
        if let Err(e) = dht.bootstrap(endpoint).await {
            tracing::warn!(%endpoint, error = %e, "bootstrap failed");
        }
    }

    let config = RelayConfig {
        listen_addr: settings.relay.listen_addr.parse().context("relay.listen_addr")?,
        region: settings.relay.region.clone(),
        operator: settings.relay.operator.clone(),
        max_connections: settings.relay.max_connections,
        queue_capacity: settings.relay.queue_capacity,
    };

    let node = RelayNode::new(config, identity.signing.clone(), rsa, Some(dht));
    let bound = node.serve().await.map_err(ZentalkError::from)?;
    node.publish_descriptor().await.map_err(ZentalkError::from)?;
    node.start_mesh(vec![]);

    info!(%bound, address = %node.address(), "relay running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

async fn lookup(settings: Settings, key_hex: &str, bootstrap: &str) -> Result<()> {
    let key = NodeId::from_hex(key_hex).context("key must be 40 hex chars")?;

    let dht_addr: SocketAddr = settings
        .network
        .dht_listen
        .parse()
        .context("network.dht_listen")?;
    let dht = DhtNode::bind(dht_addr, SigningKeypair::generate())
        .await
        .map_err(ZentalkError::from)?;
    dht.start();

    let endpoint: SocketAddr = bootstrap.parse().context("bootstrap endpoint")?;
    dht.bootstrap(endpoint).await.map_err(ZentalkError::from)?;

    let value = dht
        .lookup(key)
        .await
        .map_err(ZentalkError::from)
        .context("value not found")?;
    match std::str::from_utf8(&value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{}", hex::encode(&value)),
    }
    Ok(())
}
