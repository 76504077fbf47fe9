use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use proxy_core::ObserverFactory;
use proxy_engine::PairConfig;
use proxy_warc::WarcObserverFactory;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Intercepting HTTP/1.1 forward proxy with MITM TLS interception and
/// optional WARC journaling of observed exchanges.
#[derive(Parser)]
#[command(name = "warcproxy", about = "Intercepting HTTP/1.1 proxy with WARC journaling", version)]
struct Cli {
    /// Port for the listening endpoint.
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// WARC output file (gzip-framed iff the name ends in `.gz`).
    #[arg(short, long, default_value = "out.warc.gz")]
    file: PathBuf,

    /// CA certificate used to mint per-host leaf certificates for TLS
    /// interception. Generated and persisted here if it does not exist.
    #[arg(long, default_value = "ca.crt")]
    ca_cert: PathBuf,

    /// Private key matching `--ca-cert`.
    #[arg(long, default_value = "ca.key")]
    ca_key: PathBuf,

    /// Idle timeout in seconds before a pair's sockets are closed.
    #[arg(long, default_value = "60")]
    idle_timeout_secs: u64,

    /// Upstream connect timeout in seconds.
    #[arg(long, default_value = "30")]
    connect_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warcproxy=info")))
        .init();

    let cli = Cli::parse();

    let tls_identity: Arc<dyn proxy_core::TlsIdentity> = Arc::new(
        proxy_tls::CertAuthority::load_or_generate(&cli.ca_cert, &cli.ca_key)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    );
    let client_tls_config = proxy_tls::client_config();

    let sink = proxy_warc::WarcSink::create(&cli.file).map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(file = %cli.file.display(), "journaling observed exchanges to WARC");
    let observer_factory: Arc<dyn ObserverFactory> = Arc::new(WarcObserverFactory::new(Arc::new(sink)));

    let config = PairConfig {
        idle_timeout: std::time::Duration::from_secs(cli.idle_timeout_secs),
        connect_timeout: std::time::Duration::from_secs(cli.connect_timeout_secs),
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind listening socket");
            return Err(anyhow::anyhow!("listen failed: {e}"));
        }
    };
    info!(%addr, "warcproxy listening");

    loop {
        let (socket, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let tls_identity = tls_identity.clone();
        let client_tls_config = client_tls_config.clone();
        let observer_factory = observer_factory.clone();
        tokio::spawn(async move {
            proxy_engine::run_pair(socket, peer_addr, tls_identity, client_tls_config, observer_factory, config)
                .await;
        });
    }
}
