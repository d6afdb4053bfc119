//! End-to-end exercises of the scenarios in the distilled spec's §8: two
//! real nodes, real sockets, a real gossip exchange and a real proxied read.

use std::sync::Arc;
use std::time::Duration;

use fat::TreeNode;
use localfs::LocalFs;

struct TestNode {
    registry: Arc<cluster::Registry>,
    fat_root: Arc<TreeNode>,
    mgmt_addr: std::net::SocketAddr,
    public_addr: std::net::SocketAddr,
    _root_dir: tempfile::TempDir,
}

async fn spawn_node(name: &str, files: &[(&str, &[u8])]) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    for (path, contents) in files {
        std::fs::write(dir.path().join(path), contents).unwrap();
    }

    let mgmt_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mgmt_addr = mgmt_listener.local_addr().unwrap();
    let public_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let public_addr = public_listener.local_addr().unwrap();

    let fat_root = TreeNode::new_root();
    let localfs = Arc::new(LocalFs::new(dir.path(), "", name));
    let registry = cluster::Registry::new(
        "test-cluster",
        name,
        public_addr.to_string(),
        mgmt_addr.to_string(),
        Arc::clone(&fat_root),
        Arc::clone(&localfs),
    );
    let proxy = Arc::new(proxy::Proxy::new(Arc::clone(&registry), Arc::clone(&localfs)));

    let mgmt_router = mgmt_http::router(Arc::clone(&registry));
    let public_router = public_http::router(Arc::clone(&fat_root), Arc::clone(&proxy));

    tokio::spawn(async move {
        axum::serve(mgmt_listener, mgmt_router.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await
            .unwrap();
    });
    tokio::spawn(async move {
        axum::serve(public_listener, public_router.into_make_service()).await.unwrap();
    });

    // Feed the scanner's output into the FAT tree once, as the scan loop
    // would on startup, so each node announces its own files before any
    // gossip happens.
    let report = localfs.scan_once().unwrap();
    fat_root.update(report.announcements);

    TestNode {
        registry,
        fat_root,
        mgmt_addr,
        public_addr,
        _root_dir: dir,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn greeting_triggers_full_push_and_remote_merge() {
    let a = spawn_node("node-a", &[("a.txt", b"from-a")]).await;
    let b = spawn_node("node-b", &[("b.txt", b"from-b")]).await;

    a.registry.greet_node(&b.mgmt_addr.to_string(), true).await.unwrap();

    // The greet response folds B's NodeInfo into A and (because
    // request_full_update was set) triggers B to push its full scan to A.
    wait_until(|| a.fat_root.seek("b.txt").is_some()).await;

    let leaf = a.fat_root.seek("b.txt").unwrap();
    let stat = leaf.stat();
    assert_eq!(stat.size_in_bytes, 6);
    assert_eq!(stat.owner.as_str(), "node-b");

    // Symmetric: B also learns of A's node record from the greeting
    // exchange, even before A's own scan has been pushed anywhere.
    assert!(b.registry.peer("node-a").is_some());
}

#[tokio::test]
async fn proxied_read_returns_remote_owners_bytes() {
    let a = spawn_node("node-a", &[("a.txt", b"hello-from-a")]).await;
    let b = spawn_node("node-b", &[("b.txt", b"hello-from-b")]).await;

    a.registry.greet_node(&b.mgmt_addr.to_string(), true).await.unwrap();
    wait_until(|| a.fat_root.seek("b.txt").is_some()).await;

    let url = format!("http://{}/fs/b.txt", a.public_addr);
    let resp = reqwest::get(url).await.unwrap();
    assert!(resp.status().is_success());
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], b"hello-from-b");
}

#[tokio::test]
async fn redirect_budget_is_enforced_at_the_http_surface() {
    let a = spawn_node("node-a", &[("a.txt", b"hi")]).await;

    // Announce a file owned by a node A has never heard of, bypassing
    // gossip entirely, so the proxy's redirect-budget check runs with no
    // outbound call possible regardless.
    a.fat_root.update(vec![fat::FileAnnouncement::new("/ghost.txt", 3, 0, 1, "node-ghost")]);

    let url = format!("http://{}/fs/ghost.txt?redirN=2", a.public_addr);
    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unknown_owner_without_redirect_budget_exhaustion_is_not_found() {
    let a = spawn_node("node-a", &[]).await;
    a.fat_root.update(vec![fat::FileAnnouncement::new("/ghost.txt", 3, 0, 1, "node-ghost")]);

    let url = format!("http://{}/fs/ghost.txt", a.public_addr);
    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn join_endpoint_greets_every_listed_peer() {
    let a = spawn_node("node-a", &[]).await;
    let b = spawn_node("node-b", &[("b.txt", b"hi")]).await;
    let c = spawn_node("node-c", &[("c.txt", b"hi")]).await;

    let client = reqwest::Client::new();
    let url = format!(
        "http://{}/join/?peer={}&peer={}",
        a.mgmt_addr, b.mgmt_addr, c.mgmt_addr
    );
    let resp = client.post(url).send().await.unwrap();
    assert!(resp.status().is_success());

    wait_until(|| a.registry.peer("node-b").is_some() && a.registry.peer("node-c").is_some()).await;
}
