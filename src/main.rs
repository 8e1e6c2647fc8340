use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use clap::Parser;
use gossip_membership::membership::audit::{AuditLog, FileAuditLog};
use gossip_membership::membership::config::{DEFAULT_PORT, MembershipConfig};
use gossip_membership::membership::handlers::*;
use gossip_membership::membership::seed::{JsonSeedFile, SeedStore, StaticSeeds};
use gossip_membership::membership::service::MembershipService;
use gossip_membership::membership::types::DetectionMode;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "membership-node")]
#[command(about = "Gossip membership node with probe-based failure detection")]
struct Cli {
    /// UDP address to receive protocol messages on
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    bind: SocketAddr,

    /// Address peers should use to reach this node (defaults to the bound address)
    #[arg(long)]
    advertise: Option<SocketAddr>,

    /// Seed peer address; repeat for several
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// JSON membership file to load the initial table from (overrides --seed)
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// Append-only log of membership transitions
    #[arg(long, default_value = "membership.log")]
    audit_log: PathBuf,

    /// Truncate the audit log before joining
    #[arg(long)]
    clear_audit_log: bool,

    /// HTTP control plane address (defaults to the UDP port + 1000)
    #[arg(long)]
    control: Option<SocketAddr>,

    /// Start with the suspicion sub-protocol enabled
    #[arg(long)]
    suspicion: bool,

    /// Seconds between probe rounds
    #[arg(long, default_value_t = 2)]
    probe_interval: u64,

    /// Seconds between gossip rounds
    #[arg(long, default_value_t = 3)]
    gossip_interval: u64,

    /// Detector ticks (seconds) before an unanswered probe times out
    #[arg(long, default_value_t = 5)]
    probe_timeout: u32,

    /// Detector ticks (seconds) a suspected peer has to refute
    #[arg(long, default_value_t = 10)]
    suspicion_timeout: u32,

    /// Peers contacted per gossip round
    #[arg(long, default_value_t = 3)]
    fanout: usize,

    #[arg(long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,
}

impl Cli {
    fn membership_config(&self) -> MembershipConfig {
        MembershipConfig {
            bind_addr: self.bind,
            advertise_addr: self.advertise,
            probe_interval: Duration::from_secs(self.probe_interval),
            probe_timeout_ticks: self.probe_timeout,
            suspicion_timeout_ticks: self.suspicion_timeout,
            gossip_interval: Duration::from_secs(self.gossip_interval),
            gossip_fanout: self.fanout,
            detection: DetectionMode::from_suspicion(self.suspicion),
            ..MembershipConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    let config = cli.membership_config();
    let seeds: Box<dyn SeedStore> = match &cli.seed_file {
        Some(path) => Box::new(JsonSeedFile::new(path)),
        None => {
            if cli.seeds.is_empty() {
                tracing::info!("Starting as seed node (founder)");
            } else {
                tracing::info!("Seed nodes: {:?}", cli.seeds);
            }
            Box::new(StaticSeeds::new(cli.seeds.clone()))
        }
    };

    let audit: Arc<dyn AuditLog> =
        Arc::new(FileAuditLog::open(&cli.audit_log, cli.clear_audit_log).await?);

    // 1. Membership (UDP gossip):
    let membership = MembershipService::join(config, seeds.as_ref(), audit).await?;
    tracing::info!("Node ID: {}", membership.local_id);

    // 2. HTTP control plane:
    let app = Router::new()
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(ENDPOINT_MEMBERS, get(handle_members))
        .route(
            ENDPOINT_SUSPICION,
            get(handle_get_suspicion).post(handle_set_suspicion),
        )
        .route(ENDPOINT_LEAVE, post(handle_leave))
        .layer(Extension(membership.clone()));

    let control_addr = cli
        .control
        .unwrap_or_else(|| SocketAddr::new(cli.bind.ip(), cli.bind.port().saturating_add(1000)));
    let listener = tokio::net::TcpListener::bind(control_addr).await?;
    tracing::info!("HTTP control plane listening on {}", control_addr);
    tracing::info!("Press Ctrl+C to leave the cluster");

    // 3. Run until the node leaves (HTTP) or Ctrl+C asks it to:
    tokio::select! {
        served = axum::serve(listener, app).into_future() => served?,
        _ = membership.wait_stopped() => {
            tracing::info!("Node stopped, exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, leaving cluster");
            if let Err(e) = membership.leave().await {
                tracing::error!("Graceful leave failed: {}", e);
                membership.shutdown().await;
            }
        }
    }

    Ok(())
}
