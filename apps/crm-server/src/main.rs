mod backend;
mod compensation;
mod config;
mod deadline;
mod enroller;
mod error;
mod fingerprint;
mod handlers;
mod login;
mod metrics;
mod provisioner;
mod server;
mod validation;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing_subscriber::EnvFilter;

use backend::StoreBackend;
use config::{CacheConfig, ServerConfig, SigningKeyConfig};
use crm_cache::Cache;
use crm_cache_memory::MemoryCache;
use crm_mesh::{CredentialMint, GrpcCache, MeshDialer, MeshTls, RequireBearer, TokenVerifier};
use crm_proto::cache_service_server::CacheServiceServer;
use crm_proto::enrollment_service_server::EnrollmentServiceServer;
use crm_proto::login_service_server::LoginServiceServer;
use crm_proto::provisioning_service_server::ProvisioningServiceServer;
use crm_storage::{DatabaseName, MigrationOutcome, Store};
use fingerprint::{Fingerprints, LOGIN_PROOF_CONTEXT};
use handlers::cache::CacheHost;
use server::CrmServer;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "crm-server")]
#[command(about = "Tenant provisioning, enrollment and login services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve provisioning, enrollment and login
    Serve {
        #[command(flatten)]
        listen: ListenArgs,
    },
    /// Serve the in-memory cache service
    ServeCache {
        #[command(flatten)]
        listen: ListenArgs,
    },
    /// Bring one tenant database to the latest schema
    Migrate {
        #[arg(long)]
        database: String,
    },
    /// Print a mesh token signed with MESH_SIGNING_KEY
    MintToken,
}

#[derive(clap::Args)]
struct ListenArgs {
    /// gRPC listen address
    #[arg(long, env = "CRM_ADDR", default_value = "0.0.0.0:50051")]
    addr: String,
    /// HTTP health and metrics listen address
    #[arg(long, env = "CRM_HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    health_addr: String,
    /// Server certificate (PEM)
    #[arg(long, env = "CRM_TLS_CERT")]
    tls_cert: PathBuf,
    /// Server private key (PEM)
    #[arg(long, env = "CRM_TLS_KEY")]
    tls_key: PathBuf,
    /// CA that mesh client certificates must chain to (PEM)
    #[arg(long, env = "CRM_TLS_CLIENT_CA")]
    tls_client_ca: PathBuf,
}

impl ListenArgs {
    /// Mutual TLS is the only mode; clients without a certificate from the CA are refused.
    fn server_builder(&self) -> Result<Server, Box<dyn std::error::Error>> {
        let identity = Identity::from_pem(
            std::fs::read_to_string(&self.tls_cert)?,
            std::fs::read_to_string(&self.tls_key)?,
        );
        let ca = Certificate::from_pem(std::fs::read_to_string(&self.tls_client_ca)?);
        let tls = ServerTlsConfig::new().identity(identity).client_ca_root(ca);
        Ok(Server::builder().tls_config(tls)?)
    }
}

fn load_mint(config: &SigningKeyConfig) -> Result<CredentialMint, Box<dyn std::error::Error>> {
    let pem = zeroize::Zeroizing::new(std::fs::read_to_string(&config.path)?);
    let mint = match &config.passphrase {
        Some(passphrase) => CredentialMint::from_encrypted_pem(&pem, passphrase.as_bytes())?,
        None => CredentialMint::from_pem(&pem)?,
    };
    Ok(mint)
}

fn spawn_purge(cache: Arc<MemoryCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "expired cache entries removed");
            }
        }
    });
}

async fn cmd_serve(listen: ListenArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    let mut grpc = listen.server_builder()?;
    let metrics = metrics::init_metrics()?;

    let mint = Arc::new(load_mint(&config.signing_key)?);
    let verifier = TokenVerifier::from_verifying_key(&mint.verifying_key())?;
    let proof_key = mint.derive_secret(LOGIN_PROOF_CONTEXT)?;

    let cache: Arc<dyn Cache> = match &config.cache {
        CacheConfig::Mesh { endpoint, tls } => {
            let tls = MeshTls::from_files(&tls.ca_cert, &tls.client_cert, &tls.client_key)?;
            let dialer = MeshDialer::new(endpoint.clone(), &tls, mint.clone())
                .with_timeout(config.call_timeout);
            tracing::info!(endpoint = %endpoint, "fingerprints kept in the cache service");
            Arc::new(GrpcCache::new(Arc::new(dialer)))
        }
        CacheConfig::Memory => {
            tracing::info!("fingerprints kept in process memory");
            let cache = Arc::new(MemoryCache::new());
            spawn_purge(cache.clone());
            cache
        }
    };

    let backend = StoreBackend::open(&config).await?;
    let store: Arc<dyn Store> = Arc::new(backend);
    let server = Arc::new(CrmServer {
        store: store.clone(),
        fingerprints: Fingerprints::new(cache, proof_key),
        first_role: config.first_role.clone(),
        call_timeout: config.call_timeout,
        verifier,
    });

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ProvisioningServiceServer<CrmServer>>()
        .await;
    health_reporter
        .set_serving::<EnrollmentServiceServer<CrmServer>>()
        .await;
    health_reporter
        .set_serving::<LoginServiceServer<CrmServer>>()
        .await;

    let router = grpc
        .add_service(health_service)
        .add_service(ProvisioningServiceServer::from_arc(server.clone()))
        .add_service(EnrollmentServiceServer::from_arc(server.clone()))
        .add_service(LoginServiceServer::from_arc(server));

    let result = run_listeners(&listen, router, metrics).await;

    if let Err(err) = store.close().await {
        tracing::error!(error = %err, "failed to close store");
    }
    result
}

async fn cmd_serve_cache(listen: ListenArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut grpc = listen.server_builder()?;
    let metrics = metrics::init_metrics()?;

    let mint = load_mint(&SigningKeyConfig::from_env()?)?;
    let check = RequireBearer::new(TokenVerifier::from_verifying_key(&mint.verifying_key())?);

    let cache = Arc::new(MemoryCache::new());
    spawn_purge(cache.clone());
    let service = CacheServiceServer::with_interceptor(CacheHost::new(cache), check);

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<CacheServiceServer<CacheHost>>()
        .await;

    let router = grpc.add_service(health_service).add_service(service);
    run_listeners(&listen, router, metrics).await
}

/// Serve gRPC and the HTTP health listener until SIGTERM/SIGINT.
async fn run_listeners(
    listen: &ListenArgs,
    router: tonic::transport::server::Router,
    metrics: PrometheusHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    use axum::{routing::get, Router};

    let addr: SocketAddr = listen.addr.parse()?;
    let health_addr: SocketAddr = listen.health_addr.parse()?;

    let (readiness_tx, readiness_rx) = tokio::sync::watch::channel(false);
    let health_router = Router::new()
        .route("/healthz", get(health_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(HealthState {
            ready: readiness_rx,
            metrics,
        });

    let grpc_listener = tokio::net::TcpListener::bind(addr).await?;
    let health_listener = tokio::net::TcpListener::bind(health_addr).await?;
    tracing::info!(addr = %grpc_listener.local_addr()?, "gRPC listening");
    tracing::info!(addr = %health_listener.local_addr()?, "health checks listening");

    let _ = readiness_tx.send(true);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal(readiness_tx).await;
        let _ = shutdown_tx_clone.send(());
    });

    let mut shutdown_rx1 = shutdown_tx.subscribe();
    let health_server =
        axum::serve(health_listener, health_router).with_graceful_shutdown(async move {
            let _ = shutdown_rx1.recv().await;
        });

    let mut shutdown_rx2 = shutdown_tx.subscribe();
    let grpc_server = router.serve_with_incoming_shutdown(
        tokio_stream::wrappers::TcpListenerStream::new(grpc_listener),
        async move {
            let _ = shutdown_rx2.recv().await;
        },
    );

    let (grpc_result, health_result) = tokio::join!(grpc_server, health_server);
    grpc_result?;
    health_result?;
    Ok(())
}

async fn cmd_migrate(database: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    let db_name = DatabaseName::parse(database)?;
    let store = StoreBackend::open(&config).await?;

    let outcome = store.migrate_tenant(&db_name).await;
    store.close().await?;
    match outcome? {
        MigrationOutcome::Applied(n) => println!("{db_name}: applied {n} migration(s)"),
        MigrationOutcome::UpToDate => println!("{db_name}: already up to date"),
    }
    Ok(())
}

fn cmd_mint_token() -> Result<(), Box<dyn std::error::Error>> {
    let key = SigningKeyConfig::from_env()?;
    println!("{}", load_mint(&key)?.mint()?);
    Ok(())
}

#[derive(Clone)]
struct HealthState {
    ready: tokio::sync::watch::Receiver<bool>,
    metrics: PrometheusHandle,
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn readiness_handler(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> Result<&'static str, axum::http::StatusCode> {
    if *state.ready.borrow() {
        Ok("ok")
    } else {
        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> String {
    state.metrics.render()
}

async fn shutdown_signal(readiness_tx: tokio::sync::watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }

    // Drain traffic before the listeners stop.
    let _ = readiness_tx.send(false);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { listen } => cmd_serve(listen).await,
        Command::ServeCache { listen } => cmd_serve_cache(listen).await,
        Command::Migrate { database } => cmd_migrate(&database).await,
        Command::MintToken => cmd_mint_token(),
    }
}
