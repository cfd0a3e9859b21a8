#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Canned response for one path.
#[derive(Clone)]
pub struct Route {
    status: u16,
    body: Vec<u8>,
    content_length: bool,
    /// Send this many bytes, then hold the connection open.
    stall_after: Option<usize>,
    /// Accept the request but never answer it.
    silent: bool,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_length: true,
            stall_after: None,
            silent: false,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: b"error".to_vec(),
            content_length: true,
            stall_after: None,
            silent: false,
        }
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    pub fn stall_after(mut self, bytes: usize) -> Self {
        self.stall_after = Some(bytes);
        self
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::status(200)
        }
    }
}

/// Minimal HTTP/1.1 file server on 127.0.0.1, one response per connection.
pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, Route>> =
            Arc::new(routes.into_iter().map(|(p, r)| (p.to_string(), r)).collect());
        let hits = Arc::new(Mutex::new(Vec::new()));

        let server_hits = hits.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let routes = routes.clone();
                let hits = server_hits.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, &routes, &hits).await;
                });
            }
        });

        Self { addr, hits }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Paths requested so far, query strings removed.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let request = String::from_utf8_lossy(&request);
    let target = request.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    hits.lock().unwrap().push(path.clone());

    let route = routes.get(&path).cloned().unwrap_or_else(|| Route::status(404));
    if route.silent {
        tokio::time::sleep(Duration::from_secs(30)).await;
        return Ok(());
    }
    let mut head = format!("HTTP/1.1 {} Test\r\nConnection: close\r\n", route.status);
    if route.content_length {
        head.push_str(&format!("Content-Length: {}\r\n", route.body.len()));
    }
    head.push_str("\r\n");
    socket.write_all(head.as_bytes()).await?;

    match route.stall_after {
        Some(n) => {
            socket.write_all(&route.body[..n.min(route.body.len())]).await?;
            socket.flush().await?;
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        None => {
            socket.write_all(&route.body).await?;
            socket.shutdown().await?;
        }
    }
    Ok(())
}

/// Client that never goes through a proxy configured in the environment.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Writes stdin to the `--output_file` argument.
pub const ECHO_ENGINE: &str = r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output_file) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cat > "$out""#;

pub const FAILING_ENGINE: &str = r#"cat > /dev/null
echo "model load failed" >&2
exit 1"#;

pub const EMPTY_OUTPUT_ENGINE: &str = r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output_file) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cat > /dev/null
: > "$out""#;

/// Writes the current directory to the output file instead of audio.
pub const PWD_ENGINE: &str = r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output_file) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cat > /dev/null
pwd > "$out""#;

/// Executable `sh` script at `<dir>/piper/piper`.
#[cfg(unix)]
pub fn write_engine(dir: &Path, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let engine_dir = dir.join("piper");
    std::fs::create_dir_all(&engine_dir).unwrap();
    let path = engine_dir.join("piper");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
