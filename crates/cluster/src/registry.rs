use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fat::TreeNode;
use localfs::LocalFs;

use crate::node::{
    combine_host_and_port, GreetState, NodeInfo, NodeUpdate, PublicClusterInfo, PushState, UpdateData,
};

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("transport error contacting {addr}: {source}")]
    Transport { addr: String, source: reqwest::Error },
    #[error("non-2xx status {status} from {addr}")]
    Status { addr: String, status: u16 },
    #[error("malformed response body from {addr}: {source}")]
    Decode { addr: String, source: reqwest::Error },
}

/// The cluster's peer table plus the gossip client bound to it.
///
/// `peers` is the outer lock from the two-layer discipline: it guards only
/// the map's shape (insert, lookup), never a peer's mutable fields. Per-peer
/// mutation goes through [`NodeInfo`]'s own mutex, acquired after releasing
/// this one, never both at once.
pub struct Registry {
    cluster_name: String,
    me: Arc<NodeInfo>,
    peers: RwLock<HashMap<String, Arc<NodeInfo>>>,
    fat_root: Arc<TreeNode>,
    localfs: Arc<LocalFs>,
    http: reqwest::Client,
}

impl Registry {
    #[must_use]
    pub fn new(
        cluster_name: impl Into<String>,
        node_name: impl Into<String>,
        public_addr: impl Into<String>,
        mgmt_addr: impl Into<String>,
        fat_root: Arc<TreeNode>,
        localfs: Arc<LocalFs>,
    ) -> Arc<Self> {
        let me = Arc::new(NodeInfo::new(
            node_name.into(),
            public_addr.into(),
            mgmt_addr.into(),
            now(),
        ));
        // The membership client uses a fixed dial and response-header
        // timeout per §5; there is no other cancellation for gossip calls.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client build");
        Arc::new(Registry {
            cluster_name: cluster_name.into(),
            me,
            peers: RwLock::new(HashMap::new()),
            fat_root,
            localfs,
            http,
        })
    }

    #[must_use]
    pub fn me(&self) -> &Arc<NodeInfo> {
        &self.me
    }

    #[must_use]
    pub fn peer(&self, name: &str) -> Option<Arc<NodeInfo>> {
        self.peers.read().expect("registry lock poisoned").get(name).cloned()
    }

    #[must_use]
    pub fn peer_by_mgmt_addr(&self, addr: &str) -> Option<Arc<NodeInfo>> {
        self.peers
            .read()
            .expect("registry lock poisoned")
            .values()
            .find(|p| p.mgmt_addr() == addr)
            .cloned()
    }

    /// All known peers. Used by the binary's rescan loop to re-push a fresh
    /// local scan to every peer already greeted, not just ones that happen
    /// to re-trigger `schedule_push` on their own.
    #[must_use]
    pub fn peers(&self) -> Vec<Arc<NodeInfo>> {
        self.peers.read().expect("registry lock poisoned").values().cloned().collect()
    }

    #[must_use]
    pub fn public_info(&self) -> PublicClusterInfo {
        let peers = self
            .peers
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(name, node)| (name.clone(), node.to_wire()))
            .collect();
        PublicClusterInfo {
            name: self.cluster_name.clone(),
            me: self.me.to_wire(),
            peers,
        }
    }

    /// Upserts a peer record and advances its greet/push state per §4.3.
    ///
    /// Symmetric with the greeting path (decision recorded in DESIGN.md for
    /// the §9 self-name-collision gap): a node never gossips about itself as
    /// a peer, so an update naming this node is dropped here exactly as it
    /// already is in `greet_node`'s peer loop.
    pub fn update_node(self: &Arc<Self>, newinfo: NodeUpdate) {
        if newinfo.name == self.me.name {
            return;
        }
        let node = {
            let mut peers = self.peers.write().expect("registry lock poisoned");
            if let Some(existing) = peers.get(&newinfo.name) {
                Arc::clone(existing)
            } else {
                tracing::info!(peer = %newinfo.name, "cluster: met new node");
                let fresh = Arc::new(NodeInfo::new(
                    newinfo.name.clone(),
                    newinfo.public_addr.clone(),
                    newinfo.mgmt_addr.clone(),
                    newinfo.last_alive,
                ));
                peers.insert(newinfo.name.clone(), Arc::clone(&fresh));
                fresh
            }
        };

        let (greet_state, push_state) = {
            let mut inner = node.inner.lock().expect("node lock poisoned");
            inner.public_addr = newinfo.public_addr;
            inner.mgmt_addr = newinfo.mgmt_addr;
            inner.last_alive = newinfo.last_alive;
            if newinfo.greet_state == GreetState::Done {
                inner.greet_state = GreetState::Done;
            }
            (inner.greet_state, inner.push_state)
        };

        if greet_state == GreetState::Never {
            self.schedule_greet(Arc::clone(&node));
        }
        if push_state == PushState::Never {
            self.schedule_push(Arc::clone(&node));
        }
    }

    /// Spawns at most one outbound greet per peer until it resolves:
    /// concurrent callers observing `Pending` do nothing (§8 "Greet
    /// idempotence").
    pub fn schedule_greet(self: &Arc<Self>, node: Arc<NodeInfo>) {
        let should_spawn = {
            let mut inner = node.inner.lock().expect("node lock poisoned");
            if inner.greet_state != GreetState::Never {
                false
            } else {
                inner.greet_state = GreetState::Pending;
                true
            }
        };
        if !should_spawn {
            return;
        }
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let addr = node.mgmt_addr();
            if let Err(e) = registry.greet_node(&addr, true).await {
                tracing::warn!(peer = %node.name, error = %e, "gossip: greet failed, remains pending");
            }
        });
    }

    /// Spawns a push unless one is already in flight.
    pub fn schedule_push(self: &Arc<Self>, node: Arc<NodeInfo>) {
        let should_spawn = {
            let mut inner = node.inner.lock().expect("node lock poisoned");
            if inner.push_state == PushState::Pending {
                false
            } else {
                inner.push_state = PushState::Pending;
                true
            }
        };
        if !should_spawn {
            return;
        }
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = registry.push_full_update(Arc::clone(&node)).await {
                tracing::warn!(peer = %node.name, error = %e, "gossip: push failed, retry-eligible");
            }
        });
    }

    /// Greets a peer at `addr`. `addr` need not already be a known peer —
    /// multicast discovery and the operator `/join/` endpoint both call this
    /// directly for addresses with no existing [`NodeInfo`].
    pub async fn greet_node(self: &Arc<Self>, addr: &str, request_full_update: bool) -> Result<(), GossipError> {
        let url = format!("http://{addr}/cluster/");
        let mut form = vec![
            ("name", self.me.name.clone()),
            ("public-addr", self.me.public_addr()),
            ("mgmt-addr", self.me.mgmt_addr()),
        ];
        if request_full_update {
            form.push(("request-full-update", "true".to_string()));
        }
        let resp = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|source| GossipError::Transport { addr: addr.to_string(), source })?;
        if !resp.status().is_success() {
            return Err(GossipError::Status {
                addr: addr.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let info: PublicClusterInfo = resp
            .json()
            .await
            .map_err(|source| GossipError::Decode { addr: addr.to_string(), source })?;

        let mut me_entry = info.me;
        me_entry.last_alive = now();
        me_entry.mgmt_addr = addr.to_string();
        me_entry.public_addr = combine_host_and_port(addr, &me_entry.public_addr);
        let greeted_name = me_entry.name.clone();

        let mut peers = info.peers;
        peers.insert(greeted_name, me_entry);

        for (name, wire) in peers {
            let greet_state = if name == self.me.name {
                GreetState::Never
            } else {
                // The entry describing the peer we just greeted is the only
                // one known to have completed the exchange; everything else
                // in its view of the cluster is hearsay.
                if wire.mgmt_addr == addr {
                    GreetState::Done
                } else {
                    GreetState::Never
                }
            };
            self.update_node(NodeUpdate {
                name: wire.name.clone(),
                public_addr: wire.public_addr.clone(),
                mgmt_addr: wire.mgmt_addr.clone(),
                last_alive: wire.last_alive,
                greet_state,
            });
        }
        Ok(())
    }

    /// Ships the local scanner's most recent full batch to `node`.
    pub async fn push_full_update(self: &Arc<Self>, node: Arc<NodeInfo>) -> Result<(), GossipError> {
        let addr = node.mgmt_addr();
        let (files, scan_time) = self.localfs.last_full_scan().unwrap_or_default();
        let url = format!("http://{addr}/update/");
        let body = UpdateData {
            files,
            update_time: scan_time,
            full: true,
            sender_node_name: self.me.name.clone(),
        };
        let result = self.http.post(&url).json(&body).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                let mut inner = node.inner.lock().expect("node lock poisoned");
                inner.push_state = PushState::Done;
                inner.last_update_pushed = now();
                Ok(())
            }
            Ok(resp) => {
                let mut inner = node.inner.lock().expect("node lock poisoned");
                inner.push_state = PushState::Never;
                Err(GossipError::Status { addr, status: resp.status().as_u16() })
            }
            Err(source) => {
                let mut inner = node.inner.lock().expect("node lock poisoned");
                inner.push_state = PushState::Never;
                Err(GossipError::Transport { addr, source })
            }
        }
    }

    /// Folds a received [`UpdateData`] into the local FAT tree.
    ///
    /// Known gap (§9, undecided in the distilled spec in favor of
    /// documenting rather than fixing): a *full* update from `sender` should,
    /// by name, tombstone files previously owned by `sender` that are absent
    /// from this snapshot. This implementation does not do so — it only
    /// applies what is present in `upd.files` — so a peer whose full push
    /// drops a file it deleted since its last push will keep that file
    /// visible here until some other announcement tombstones it directly.
    pub fn receive_update(self: &Arc<Self>, upd: UpdateData) {
        let Some(sender) = self.peer(&upd.sender_node_name) else {
            tracing::warn!(sender = %upd.sender_node_name, "gossip: update from unknown sender, dropping");
            return;
        };
        let full = upd.full;
        let update_time = upd.update_time;
        self.fat_root.update(upd.files);
        let mut inner = sender.inner.lock().expect("node lock poisoned");
        inner.last_update_received = update_time;
        if full {
            inner.last_full_update_received = update_time;
        }
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
