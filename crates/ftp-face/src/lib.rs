//! Minimal read-only FTP surface (`LIST`/`RETR`, `PASV` only) over the same
//! FAT tree and read proxy as the HTTP surface.
//!
//! Grounded in `original_source/ftpface/server.go`, which wraps a
//! third-party `goftp.Driver` around exactly these five read operations
//! (`Stat`, `ChangeDir`, `ListDir`, `GetFile`) and rejects every write
//! operation with a fixed "read-only access" error. No equivalent async FTP
//! server crate appears anywhere in the retrieval pack, so the control and
//! data channel handling here is hand-rolled directly over `tokio::net` —
//! the same posture the teacher takes for its own (non-FTP) wire protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use fat::{ListingEntry, TreeNode};
use proxy::{Proxy, ReadBody};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const READ_ONLY: &str = "550 read-only access\r\n";

pub struct FtpServer {
    fat_root: Arc<TreeNode>,
    proxy: Arc<Proxy>,
}

impl FtpServer {
    #[must_use]
    pub fn new(fat_root: Arc<TreeNode>, proxy: Arc<Proxy>) -> Arc<Self> {
        Arc::new(FtpServer { fat_root, proxy })
    }

    /// Binds the control-channel listener and accepts connections until the
    /// process exits. A bind failure is a fatal boot error per §7.
    pub async fn serve(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "ftp-face: listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(socket).await {
                    tracing::debug!(%peer, error = %e, "ftp-face: connection ended");
                }
            });
        }
    }

    async fn handle_connection(self: &Arc<Self>, socket: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half);
        write_half.write_all(b"220 dftp read-only FTP ready\r\n").await?;

        let mut cwd = String::new();
        let mut pasv: Option<TcpListener> = None;

        let mut line = String::new();
        loop {
            line.clear();
            let n = lines.read_line(&mut line).await?;
            if n == 0 {
                return Ok(());
            }
            let line = line.trim_end();
            let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
            let cmd = cmd.to_ascii_uppercase();

            match cmd.as_str() {
                "USER" => write_half.write_all(b"331 send any password\r\n").await?,
                "PASS" => write_half.write_all(b"230 logged in\r\n").await?,
                "SYST" => write_half.write_all(b"215 UNIX Type: L8\r\n").await?,
                "TYPE" => write_half.write_all(b"200 type set\r\n").await?,
                "PWD" => {
                    write_half
                        .write_all(format!("257 \"/{cwd}\"\r\n").as_bytes())
                        .await?
                }
                "CWD" => {
                    let candidate = normalize(&join(&cwd, arg));
                    match self.fat_root.seek(&candidate) {
                        Some(node) if node.stat().is_dir => {
                            cwd = candidate;
                            write_half.write_all(b"250 directory changed\r\n").await?;
                        }
                        Some(_) => write_half.write_all(b"550 not a directory\r\n").await?,
                        None => write_half.write_all(b"550 not found\r\n").await?,
                    }
                }
                "PASV" => {
                    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
                    let local = listener.local_addr()?;
                    let ip = match local.ip() {
                        std::net::IpAddr::V4(v4) => v4,
                        std::net::IpAddr::V6(_) => std::net::Ipv4Addr::LOCALHOST,
                    };
                    let octets = ip.octets();
                    let port = local.port();
                    write_half
                        .write_all(
                            format!(
                                "227 Entering Passive Mode ({},{},{},{},{},{})\r\n",
                                octets[0],
                                octets[1],
                                octets[2],
                                octets[3],
                                port >> 8,
                                port & 0xff
                            )
                            .as_bytes(),
                        )
                        .await?;
                    pasv = Some(listener);
                }
                "LIST" => {
                    let Some(listener) = pasv.take() else {
                        write_half.write_all(b"425 use PASV first\r\n").await?;
                        continue;
                    };
                    let target = normalize(&join(&cwd, arg));
                    match self.fat_root.seek(&target) {
                        Some(node) if node.stat().is_dir => {
                            write_half.write_all(b"150 opening data connection\r\n").await?;
                            let (mut data, _) = listener.accept().await?;
                            let snapshot = node.readonly();
                            for child in snapshot.children.values() {
                                let stat = child.stat();
                                if stat.is_tombstone() {
                                    continue;
                                }
                                data.write_all(unix_list_line(&stat).as_bytes()).await?;
                            }
                            data.shutdown().await?;
                            write_half.write_all(b"226 listing complete\r\n").await?;
                        }
                        Some(_) => write_half.write_all(b"550 not a directory\r\n").await?,
                        None => write_half.write_all(b"550 not found\r\n").await?,
                    }
                }
                "RETR" => {
                    let Some(listener) = pasv.take() else {
                        write_half.write_all(b"425 use PASV first\r\n").await?;
                        continue;
                    };
                    let target = normalize(&join(&cwd, arg));
                    let Some(node) = self.fat_root.seek(&target) else {
                        write_half.write_all(b"550 not found\r\n").await?;
                        continue;
                    };
                    let stat = node.stat();
                    if stat.is_dir {
                        write_half.write_all(b"550 not a file\r\n").await?;
                        continue;
                    }
                    write_half.write_all(b"150 opening data connection\r\n").await?;
                    let (mut data, _) = listener.accept().await?;
                    match self.proxy.fetch(&target, stat.owner.as_str(), 0).await {
                        Ok(ReadBody::Local(mut file)) => {
                            let mut buf = Vec::new();
                            std::io::Read::read_to_end(&mut file, &mut buf)?;
                            data.write_all(&buf).await?;
                            data.shutdown().await?;
                            write_half.write_all(b"226 transfer complete\r\n").await?;
                        }
                        Ok(ReadBody::Remote(resp)) => {
                            let bytes = resp.bytes().await.map_err(std::io::Error::other)?;
                            data.write_all(&bytes).await?;
                            data.shutdown().await?;
                            write_half.write_all(b"226 transfer complete\r\n").await?;
                        }
                        Err(e) => {
                            tracing::warn!(path = %target, error = %e, "ftp-face: retrieve failed");
                            write_half.write_all(b"550 transfer failed\r\n").await?;
                        }
                    }
                }
                "STOR" | "DELE" | "RNFR" | "RNTO" | "MKD" | "RMD" | "APPE" => {
                    write_half.write_all(READ_ONLY.as_bytes()).await?;
                }
                "QUIT" => {
                    write_half.write_all(b"221 bye\r\n").await?;
                    return Ok(());
                }
                "NOOP" => write_half.write_all(b"200 ok\r\n").await?,
                _ => write_half.write_all(b"502 not implemented\r\n").await?,
            }
        }
    }
}

fn join(cwd: &str, arg: &str) -> String {
    if arg.starts_with('/') || cwd.is_empty() {
        arg.trim_start_matches('/').to_string()
    } else {
        format!("{cwd}/{arg}")
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn unix_list_line(stat: &fat::FileStat) -> String {
    let kind = if stat.is_dir { 'd' } else { '-' };
    format!(
        "{kind}rw-r--r-- 1 {owner} dftp {size:>12} Jan 01 00:00 {name}\r\n",
        owner = if stat.owner().is_empty() { "?" } else { stat.owner() },
        size = stat.size(),
        name = stat.name(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fat::FileAnnouncement;
    use localfs::LocalFs;
    use tokio::io::AsyncReadExt as _;

    #[tokio::test]
    async fn list_and_retr_round_trip() {
        let root = TreeNode::new_root();
        root.update(vec![FileAnnouncement::new("/a.txt", 5, 0, 100, "me")]);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let localfs = Arc::new(LocalFs::new(dir.path(), "", "me"));
        let registry = cluster::Registry::new("c1", "me", "127.0.0.1:7040", "127.0.0.1:7041", Arc::clone(&root), Arc::clone(&localfs));
        let proxy = Arc::new(Proxy::new(registry, localfs));
        let server = FtpServer::new(root, proxy);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ = server.handle_connection(socket).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("220"));

        client.write_all(b"USER anon\r\n").await.unwrap();
        let _ = client.read(&mut buf).await.unwrap();
        client.write_all(b"PASS x\r\n").await.unwrap();
        let _ = client.read(&mut buf).await.unwrap();
        client.write_all(b"PASV\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        let reply = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(reply.starts_with("227"));

        let data_port = parse_pasv_port(&reply);
        let data_conn_fut = TcpStream::connect(("127.0.0.1", data_port));

        client.write_all(b"RETR a.txt\r\n").await.unwrap();
        let mut data = data_conn_fut.await.unwrap();
        let mut body = Vec::new();
        data.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");
    }

    fn parse_pasv_port(reply: &str) -> u16 {
        let start = reply.find('(').unwrap() + 1;
        let end = reply.find(')').unwrap();
        let parts: Vec<u16> = reply[start..end].split(',').map(|p| p.parse().unwrap()).collect();
        parts[4] * 256 + parts[5]
    }
}
