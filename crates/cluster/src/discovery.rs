use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use crate::node::combine_host_and_port;
use crate::registry::Registry;

/// Default multicast discovery period, per §6.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(55);

/// UDP datagram buffer size, per §6 ("buffer 1024 B").
const DATAGRAM_BUFFER: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiscoveryPing {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "ClusterName")]
    cluster_name: String,
    #[serde(rename = "NodeName")]
    node_name: String,
    #[serde(rename = "MgmtAddr")]
    mgmt_addr: String,
}

pub struct DiscoveryConfig {
    pub group: SocketAddrV4,
    pub ping_period: Duration,
}

impl DiscoveryConfig {
    #[must_use]
    pub fn new(group: SocketAddrV4) -> Self {
        DiscoveryConfig {
            group,
            ping_period: DEFAULT_PING_PERIOD,
        }
    }
}

/// Binds the multicast socket, joins the group with the default interface,
/// and spawns the ping loop and the listener loop. Returns once both tasks
/// are spawned; a bind or join failure is a fatal boot error per §7.
pub async fn start(registry: Arc<Registry>, config: DiscoveryConfig) -> std::io::Result<()> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.group.port()))).await?;
    socket.join_multicast_v4(*config.group.ip(), Ipv4Addr::UNSPECIFIED)?;
    let socket = Arc::new(socket);

    tokio::spawn(ping_loop(Arc::clone(&registry), Arc::clone(&socket), config.group, config.ping_period));
    tokio::spawn(listen_loop(registry, socket));
    Ok(())
}

async fn ping_loop(registry: Arc<Registry>, socket: Arc<UdpSocket>, group: SocketAddrV4, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let ping = DiscoveryPing {
            kind: "ping".to_string(),
            cluster_name: registry.cluster_name().to_string(),
            node_name: registry.me().name.clone(),
            mgmt_addr: registry.me().mgmt_addr(),
        };
        match serde_json::to_vec(&ping) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, SocketAddr::V4(group)).await {
                    tracing::warn!(error = %e, "discovery: failed to send multicast ping");
                }
            }
            Err(e) => tracing::warn!(error = %e, "discovery: failed to encode ping"),
        }
    }
}

async fn listen_loop(registry: Arc<Registry>, socket: Arc<UdpSocket>) {
    let mut buf = [0u8; DATAGRAM_BUFFER];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "discovery: recv failed");
                continue;
            }
        };
        let ping: DiscoveryPing = match serde_json::from_slice(&buf[..len]) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if ping.kind != "ping" || ping.cluster_name != registry.cluster_name() {
            continue;
        }
        if ping.node_name == registry.me().name {
            continue;
        }
        let rewritten = combine_host_and_port(&source.to_string(), &ping.mgmt_addr);
        if registry.peer_by_mgmt_addr(&rewritten).is_some() {
            continue;
        }
        tracing::info!(peer = %ping.node_name, addr = %rewritten, "discovery: met node via multicast, greeting");
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = registry.greet_node(&rewritten, true).await {
                tracing::warn!(addr = %rewritten, error = %e, "discovery: greet failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serializes_with_wire_field_names() {
        let ping = DiscoveryPing {
            kind: "ping".to_string(),
            cluster_name: "c1".to_string(),
            node_name: "n1".to_string(),
            mgmt_addr: "10.0.0.1:7041".to_string(),
        };
        let json = serde_json::to_string(&ping).unwrap();
        assert!(json.contains("\"Type\":\"ping\""));
        assert!(json.contains("\"ClusterName\":\"c1\""));
        assert!(json.contains("\"MgmtAddr\":\"10.0.0.1:7041\""));
    }
}
