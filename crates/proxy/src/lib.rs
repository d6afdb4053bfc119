//! Transparent read proxy: serve local bytes locally, or forward a read to
//! the owning peer with a bounded redirect budget to break routing loops.

use std::sync::Arc;

use cluster::Registry;
use localfs::{LocalFs, LocalFsError};

/// Maximum number of proxy hops a single read may traverse (§4.4, §8
/// "Redirect bound").
pub const MAX_REDIRECT_DEPTH: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("redirect budget exhausted")]
    TooManyRedirects,
    #[error("unknown owning node: {0}")]
    UnknownNode(String),
    #[error("local read failed: {0}")]
    Local(#[from] LocalFsError),
    #[error("transport error forwarding to owner: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("owner responded with status {0}")]
    UpstreamStatus(u16),
}

/// A resolved read: either a local file handle or a streaming response from
/// the owning peer.
pub enum ReadBody {
    Local(std::fs::File),
    Remote(reqwest::Response),
}

/// The read-proxy service. Holds no per-peer cache: every forwarded read is
/// a one-shot GET, so there is nothing to guard with the "proxy map mutex"
/// the design notes mention as optional (§5) — there is no cache to guard.
pub struct Proxy {
    registry: Arc<Registry>,
    localfs: Arc<LocalFs>,
    http: reqwest::Client,
}

impl Proxy {
    #[must_use]
    pub fn new(registry: Arc<Registry>, localfs: Arc<LocalFs>) -> Self {
        Proxy {
            registry,
            localfs,
            http: reqwest::Client::new(),
        }
    }

    /// Resolves one read. `owner_node` is the path's current owner per the
    /// FAT tree; `redirect_count` is the hop counter carried explicitly
    /// end-to-end per §9's redirect-budget note, never inferred from HTTP
    /// headers.
    pub async fn fetch(
        &self,
        dfs_path: &str,
        owner_node: &str,
        redirect_count: u32,
    ) -> Result<ReadBody, ProxyError> {
        if owner_node == self.registry.me().name {
            return self
                .localfs
                .open_read(dfs_path)
                .map(ReadBody::Local)
                .map_err(ProxyError::from);
        }

        if redirect_count >= MAX_REDIRECT_DEPTH {
            return Err(ProxyError::TooManyRedirects);
        }

        let owner = self
            .registry
            .peer(owner_node)
            .ok_or_else(|| ProxyError::UnknownNode(owner_node.to_string()))?;

        let url = format!(
            "http://{}/fs/{}?redirN={}",
            owner.public_addr(),
            dfs_path.trim_start_matches('/'),
            redirect_count + 1
        );
        tracing::debug!(path = %dfs_path, owner = %owner_node, hop = redirect_count + 1, "proxy: forwarding read");
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ProxyError::UpstreamStatus(resp.status().as_u16()));
        }
        Ok(ReadBody::Remote(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fat::TreeNode;
    use std::sync::Arc;

    fn test_registry(name: &str) -> Arc<Registry> {
        Registry::new("c1", name, "127.0.0.1:7040", "127.0.0.1:7041", TreeNode::new_root(), Arc::new(LocalFs::new(".", "", name)))
    }

    #[tokio::test]
    async fn local_owner_opens_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let localfs = Arc::new(LocalFs::new(dir.path(), "", "me"));
        let registry = test_registry("me");
        let proxy = Proxy::new(registry, localfs);
        let result = proxy.fetch("a.txt", "me", 0).await;
        assert!(matches!(result, Ok(ReadBody::Local(_))));
    }

    #[tokio::test]
    async fn redirect_budget_exhausted_before_any_outbound_call() {
        let localfs = Arc::new(LocalFs::new(".", "", "me"));
        let registry = test_registry("me");
        let proxy = Proxy::new(registry, localfs);
        let result = proxy.fetch("file", "other", MAX_REDIRECT_DEPTH).await;
        assert!(matches!(result, Err(ProxyError::TooManyRedirects)));
    }

    #[tokio::test]
    async fn unknown_owner_is_rejected() {
        let localfs = Arc::new(LocalFs::new(".", "", "me"));
        let registry = test_registry("me");
        let proxy = Proxy::new(registry, localfs);
        let result = proxy.fetch("file", "ghost", 0).await;
        assert!(matches!(result, Err(ProxyError::UnknownNode(n)) if n == "ghost"));
    }
}
