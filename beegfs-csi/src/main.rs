//! BeeGFS CSI controller plugin.
//!
//! Loads the plugin configuration, builds the BeeGFS backend and serves the
//! CSI identity and controller services over QUIC.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcsi::backend::beegfs::{self, BeegfsBackend};
use libcsi::transport::CsiServer;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "beegfs-csi", version, about = "BeeGFS CSI controller plugin")]
struct Args {
    /// Identifier of the node this controller runs on.
    #[arg(long)]
    node_id: String,

    /// Address the QUIC endpoint listens on.
    #[arg(long, default_value = "0.0.0.0:9820")]
    endpoint: SocketAddr,

    /// Plugin configuration file (YAML).
    #[arg(long)]
    config_path: Option<PathBuf>,

    /// Connection authentication file (YAML).
    #[arg(long)]
    connauth_path: Option<PathBuf>,

    /// Template `beegfs-client.conf` shipped with the BeeGFS client.
    #[arg(long, default_value = beegfs::DEFAULT_CLIENT_CONF_TEMPLATE_PATH)]
    client_conf_template_path: PathBuf,

    /// Directory holding per-volume working state.
    #[arg(long, default_value = "/var/lib/beegfs-csi")]
    cs_data_dir: PathBuf,

    /// PEM certificate chain presented to clients.
    #[arg(long)]
    tls_cert: PathBuf,

    /// PEM private key matching `--tls-cert`.
    #[arg(long)]
    tls_key: PathBuf,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let plugin_config = beegfs::config::load(
        args.config_path.as_deref(),
        args.connauth_path.as_deref(),
        &args.node_id,
    )
    .await
    .context("failed to load plugin configuration")?;

    tokio::fs::create_dir_all(&args.cs_data_dir)
        .await
        .with_context(|| format!("failed to create {}", args.cs_data_dir.display()))?;

    let backend = BeegfsBackend::new(
        args.node_id.clone(),
        plugin_config,
        args.client_conf_template_path.clone(),
        args.cs_data_dir.clone(),
    );

    let tls = server_tls_config(&args.tls_cert, &args.tls_key)?;
    let server = CsiServer::new(args.endpoint, tls, Arc::new(backend))?;
    info!(
        node_id = %args.node_id,
        endpoint = %args.endpoint,
        cs_data_dir = %args.cs_data_dir.display(),
        "beegfs-csi controller started"
    );

    tokio::select! {
        res = server.serve() => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            server.shutdown();
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn server_tls_config(cert_path: &Path, key_path: &Path) -> Result<rustls::ServerConfig> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .with_context(|| format!("failed to open {}", cert_path.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {}", cert_path.display()))?;
    let key = PrivateKeyDer::from_pem_file(key_path)
        .with_context(|| format!("failed to read {}", key_path.display()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}
