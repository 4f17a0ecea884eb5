//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use roundtrip::buffer::BufferPool;
use roundtrip::config::ProxyConfig;
use roundtrip::filter::Filter;
use roundtrip::http::HttpServer;
use roundtrip::lifecycle::Shutdown;

/// How the mock backend ends its chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Terminating zero-size chunk.
    Clean,
    /// Connection dropped mid-body.
    Abort,
}

/// A request as the mock backend saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub head: String,
    pub body: String,
}

impl Seen {
    /// Value of the first header called `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

pub struct Backend {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

/// Start a backend that streams `chunks` as a chunked body, pausing
/// `delay` before each chunk.
pub async fn start_chunked_backend(
    chunks: Vec<&'static str>,
    delay: Duration,
    ending: Ending,
) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let chunks = chunks.clone();
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                recorded.lock().unwrap().push(request);

                let head = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\
                            Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in chunks.iter().filter(|c| !c.is_empty()) {
                    tokio::time::sleep(delay).await;
                    let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
                    if socket.write_all(frame.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                }
                if ending == Ending::Clean {
                    let _ = socket.write_all(b"0\r\n\r\n").await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    Backend { addr, seen }
}

async fn read_request(socket: &mut TcpStream) -> Option<Seen> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut scratch).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&scratch[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut seen = Seen {
        head,
        body: String::new(),
    };
    let length: usize = seen
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut scratch).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&scratch[..n]);
    }
    seen.body = String::from_utf8_lossy(&body).into_owned();
    Some(seen)
}

/// A bound address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct Proxy {
    pub addr: SocketAddr,
    pub pool: Arc<BufferPool>,
    pub shutdown: Shutdown,
}

impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until every streaming worker gave its buffer back.
    pub async fn wait_for_buffers(&self) {
        for _ in 0..200 {
            if self.pool.outstanding() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} buffers still checked out", self.pool.outstanding());
    }
}

/// Start the bundled server on an ephemeral port.
pub async fn start_proxy(upstream: Option<String>, filters: Vec<Arc<dyn Filter>>) -> Proxy {
    let mut config = ProxyConfig::default();
    config.upstream.url = upstream;
    config.streaming.buffer_size = 8;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(config, filters);
    let pool = Arc::clone(server.buffer_pool());
    let ctx = shutdown.context();
    tokio::spawn(async move {
        let _ = server.run(listener, ctx).await;
    });

    Proxy {
        addr,
        pool,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
