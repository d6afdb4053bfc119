use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Per-peer greeting state. Never transitions backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreetState {
    Never,
    Pending,
    Done,
}

/// Per-peer push state. Unlike `GreetState`, a failed push resets to `Never`
/// so the next trigger can retry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Never,
    Pending,
    Done,
}

/// The wire shape of one peer's record, matching §6's `NodeInfo` JSON
/// exactly. The state-machine fields never cross the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfoWire {
    pub name: String,
    pub public_addr: String,
    pub mgmt_addr: String,
    pub last_alive: i64,
    pub last_update_pushed: i64,
    pub last_update_received: i64,
    pub last_full_update_received: i64,
}

/// An internal (never-serialized) description of a peer, as passed to
/// [`crate::Registry::update_node`]. Unlike [`NodeInfoWire`] this carries a
/// `greet_state`, because the greeting path needs to stamp `Done` on the
/// peer it just successfully greeted before folding it into the registry —
/// something the wire format has no room to express.
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub name: String,
    pub public_addr: String,
    pub mgmt_addr: String,
    pub last_alive: i64,
    pub greet_state: GreetState,
}

impl From<NodeInfoWire> for NodeUpdate {
    fn from(w: NodeInfoWire) -> Self {
        NodeUpdate {
            name: w.name,
            public_addr: w.public_addr,
            mgmt_addr: w.mgmt_addr,
            last_alive: w.last_alive,
            greet_state: GreetState::Never,
        }
    }
}

pub(crate) struct NodeInner {
    pub(crate) public_addr: String,
    pub(crate) mgmt_addr: String,
    pub(crate) last_alive: i64,
    pub(crate) last_update_pushed: i64,
    pub(crate) last_update_received: i64,
    pub(crate) last_full_update_received: i64,
    pub(crate) greet_state: GreetState,
    pub(crate) push_state: PushState,
}

/// One peer's record in the cluster registry.
///
/// `name` is immutable for the node's lifetime and is never guarded by the
/// inner mutex; every other field is. This is the per-cell lock in the
/// two-layer locking discipline: the registry's outer `RwLock` guards the
/// map's shape, this `Mutex` guards one entry's mutable state.
pub struct NodeInfo {
    pub name: String,
    pub(crate) inner: Mutex<NodeInner>,
}

impl NodeInfo {
    pub(crate) fn new(name: String, public_addr: String, mgmt_addr: String, last_alive: i64) -> Self {
        NodeInfo {
            name,
            inner: Mutex::new(NodeInner {
                public_addr,
                mgmt_addr,
                last_alive,
                last_update_pushed: 0,
                last_update_received: 0,
                last_full_update_received: 0,
                greet_state: GreetState::Never,
                push_state: PushState::Never,
            }),
        }
    }

    #[must_use]
    pub fn mgmt_addr(&self) -> String {
        self.inner.lock().expect("node lock poisoned").mgmt_addr.clone()
    }

    #[must_use]
    pub fn public_addr(&self) -> String {
        self.inner.lock().expect("node lock poisoned").public_addr.clone()
    }

    #[must_use]
    pub fn greet_state(&self) -> GreetState {
        self.inner.lock().expect("node lock poisoned").greet_state
    }

    #[must_use]
    pub fn push_state(&self) -> PushState {
        self.inner.lock().expect("node lock poisoned").push_state
    }

    #[must_use]
    pub fn to_wire(&self) -> NodeInfoWire {
        let inner = self.inner.lock().expect("node lock poisoned");
        NodeInfoWire {
            name: self.name.clone(),
            public_addr: inner.public_addr.clone(),
            mgmt_addr: inner.mgmt_addr.clone(),
            last_alive: inner.last_alive,
            last_update_pushed: inner.last_update_pushed,
            last_update_received: inner.last_update_received,
            last_full_update_received: inner.last_full_update_received,
        }
    }
}

/// The JSON-serializable view exchanged over the management HTTP wire:
/// cluster name, this node's own record, and the full peer map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicClusterInfo {
    pub name: String,
    pub me: NodeInfoWire,
    pub peers: std::collections::HashMap<String, NodeInfoWire>,
}

/// Wire shape of a full- or partial-tree push, matching §6's `UpdateData`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateData {
    pub files: Vec<fat::FileAnnouncement>,
    pub update_time: i64,
    pub full: bool,
    pub sender_node_name: String,
}

/// Splits a `host:port` address into `(host, port)`. Ports that fail to
/// parse are passed through as-is so callers can still log the raw address.
#[must_use]
pub fn split_host_port(addr: &str) -> (String, String) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (addr.to_string(), String::new()),
    }
}

/// Combines the host of `addr_for_host` with the port of `addr_for_port`,
/// per §4.3's address-rewriting rule: "substituting the sender's observed IP
/// for the host component, keeping the advertised port".
#[must_use]
pub fn combine_host_and_port(addr_for_host: &str, addr_for_port: &str) -> String {
    let (host, _) = split_host_port(addr_for_host);
    let (_, port) = split_host_port(addr_for_port);
    if port.is_empty() {
        host
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_host_and_port_keeps_advertised_port() {
        assert_eq!(
            combine_host_and_port("10.0.0.3:47000", "0.0.0.0:7041"),
            "10.0.0.3:7041"
        );
    }

    #[test]
    fn split_host_port_handles_missing_colon() {
        assert_eq!(split_host_port("justahost"), ("justahost".to_string(), String::new()));
    }
}
