//! `dftp`: read-only distributed file system overlay daemon.
//!
//! Wires the library crates together per §6 ("CLI flags") and §7 ("Fatal
//! boot error ... terminates the process"): argument parsing and every
//! listener bind live here, in a thin binary crate, while all behavior
//! lives in the library crates it assembles.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fat::TreeNode;
use localfs::LocalFs;

/// Read-only distributed file system overlay: gossip-merged namespace,
/// transparent read proxy.
#[derive(Debug, Parser)]
#[command(name = "dftp", version, about)]
struct Cli {
    /// Local directory this node serves. Required: there is no useful
    /// default root to scan.
    #[arg(long)]
    dfsroot: std::path::PathBuf,

    /// Mount point this node's files are announced under in the merged
    /// namespace (default: the DFS root).
    #[arg(long, default_value = "")]
    dfsmount: String,

    /// This node's name in the cluster. Defaults to the OS hostname.
    #[arg(long)]
    node_name: Option<String>,

    /// Name of the cluster this node gossips within; peers in a different
    /// named cluster are ignored by multicast discovery.
    #[arg(long, default_value = "dftp")]
    cluster_name: String,

    /// Address the public read HTTP/FTP surfaces are reachable at by peers
    /// (advertised in greetings as this node's `public_addr`).
    #[arg(long, default_value = "127.0.0.1:7040")]
    http_listen: String,

    /// Address the management HTTP surface (gossip, join) listens on.
    #[arg(long, default_value = "127.0.0.1:7041")]
    http_mgmt_listen: String,

    /// Address the read-only FTP surface listens on.
    #[arg(long, default_value = "127.0.0.1:7021")]
    ftp_listen: String,

    /// IPv4 multicast group used for peer discovery pings.
    #[arg(long, default_value = "239.0.0.1:7042")]
    mcast_addr: String,

    /// Period between outbound multicast discovery pings, in seconds.
    #[arg(long, default_value_t = 55)]
    discovery_period_secs: u64,

    /// Period between local directory rescans, in seconds. Each rescan
    /// feeds the local FAT tree and re-pushes a full update to every known
    /// peer, so remote namespaces pick up local changes without a restart.
    #[arg(long, default_value_t = 30)]
    scan_interval_secs: u64,

    /// Peer(s) to greet at startup, as `host:port` management addresses.
    /// Equivalent to calling `POST /join/` against this node once it is up.
    #[arg(long = "join")]
    join_peers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let node_name = match cli.node_name {
        Some(name) => name,
        None => hostname::get()
            .map_err(|e| anyhow::anyhow!("failed to determine node name from hostname: {e}"))?
            .to_string_lossy()
            .into_owned(),
    };

    let fat_root = TreeNode::new_root();
    let localfs = Arc::new(LocalFs::new(cli.dfsroot.clone(), cli.dfsmount.clone(), node_name.clone()));
    let registry = cluster::Registry::new(
        cli.cluster_name,
        node_name,
        cli.http_listen.clone(),
        cli.http_mgmt_listen.clone(),
        Arc::clone(&fat_root),
        Arc::clone(&localfs),
    );
    let proxy = Arc::new(proxy::Proxy::new(Arc::clone(&registry), Arc::clone(&localfs)));

    spawn_scan_loop(Arc::clone(&fat_root), Arc::clone(&localfs), Arc::clone(&registry), cli.scan_interval_secs);

    let mcast_group: SocketAddrV4 = cli
        .mcast_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("bad --mcast-addr {:?}: {e}", cli.mcast_addr))?;
    let mut discovery_config = cluster::DiscoveryConfig::new(mcast_group);
    discovery_config.ping_period = Duration::from_secs(cli.discovery_period_secs);
    cluster::start_discovery(Arc::clone(&registry), discovery_config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to start multicast discovery on {mcast_group}: {e}"))?;

    for peer in cli.join_peers {
        let registry = Arc::clone(&registry);
        let peer_for_log = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.greet_node(&peer, true).await {
                tracing::warn!(peer = %peer_for_log, error = %e, "startup join failed");
            }
        });
    }

    let mgmt_addr: SocketAddr = cli
        .http_mgmt_listen
        .parse()
        .map_err(|e| anyhow::anyhow!("bad --http-mgmt-listen {:?}: {e}", cli.http_mgmt_listen))?;
    let http_addr: SocketAddr = cli
        .http_listen
        .parse()
        .map_err(|e| anyhow::anyhow!("bad --http-listen {:?}: {e}", cli.http_listen))?;
    let ftp_addr: SocketAddr = cli
        .ftp_listen
        .parse()
        .map_err(|e| anyhow::anyhow!("bad --ftp-listen {:?}: {e}", cli.ftp_listen))?;

    let mgmt_router = mgmt_http::router(Arc::clone(&registry));
    let public_router = public_http::router(Arc::clone(&fat_root), Arc::clone(&proxy));
    let ftp_server = ftp_face::FtpServer::new(Arc::clone(&fat_root), Arc::clone(&proxy));

    let mgmt_listener = tokio::net::TcpListener::bind(mgmt_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind management HTTP on {mgmt_addr}: {e}"))?;
    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind public HTTP on {http_addr}: {e}"))?;

    tracing::info!(%mgmt_addr, %http_addr, %ftp_addr, "dftp: listening");

    let mgmt_task = tokio::spawn(async move {
        axum::serve(mgmt_listener, mgmt_router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .expect("management HTTP server failed")
    });
    let http_task = tokio::spawn(async move {
        axum::serve(http_listener, public_router.into_make_service())
            .await
            .expect("public HTTP server failed")
    });
    let ftp_task = tokio::spawn(async move {
        if let Err(e) = ftp_server.serve(ftp_addr).await {
            tracing::error!(error = %e, "ftp-face: server failed");
        }
    });

    let _ = tokio::join!(mgmt_task, http_task, ftp_task);
    Ok(())
}

/// Periodically rescans the local root, folds the result into the local FAT
/// tree, and re-pushes a full update to every already-known peer so remote
/// namespaces converge without waiting for that peer to re-trigger
/// `schedule_push` on its own.
fn spawn_scan_loop(fat_root: Arc<TreeNode>, localfs: Arc<LocalFs>, registry: Arc<cluster::Registry>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            let localfs = Arc::clone(&localfs);
            let report = tokio::task::spawn_blocking(move || localfs.scan_once()).await;
            match report {
                Ok(Ok(report)) => {
                    fat_root.update(report.announcements);
                    for peer in registry.peers() {
                        registry.schedule_push(peer);
                    }
                }
                Ok(Err(e)) => tracing::error!(error = %e, "scan loop: local scan failed"),
                Err(e) => tracing::error!(error = %e, "scan loop: scan task panicked"),
            }
        }
    });
}
