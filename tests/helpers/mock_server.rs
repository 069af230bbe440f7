use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boring::ssl::SslAcceptor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use super::connection_tracker::ConnectionTracker;

/// A request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    /// Header fields in wire order, names as sent.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(k, _)| k.as_str()).collect()
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> Vec<u8> + Send + Sync>;

/// Build a response with an exact Content-Length.
pub fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason(status));
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

/// What a running server recorded.
#[derive(Clone)]
pub struct ServerState {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    pub connections: ConnectionTracker,
}

impl ServerState {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.connection_count(self.addr)
    }
}

/// A scripted HTTP/1.1 server that keeps connections alive.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
}

impl MockHttpServer {
    /// Bind to a random local port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Serve plain HTTP, answering every request with `handler`.
    pub fn start<F>(self, handler: F) -> ServerState
    where
        F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        self.spawn(None, Arc::new(handler))
    }

    /// Serve HTTPS with `acceptor`.
    pub fn start_tls<F>(self, acceptor: SslAcceptor, handler: F) -> ServerState
    where
        F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        self.spawn(Some(Arc::new(acceptor)), Arc::new(handler))
    }

    fn spawn(self, acceptor: Option<Arc<SslAcceptor>>, handler: Handler) -> ServerState {
        let state = ServerState {
            addr: SocketAddr::from(([127, 0, 0, 1], self.port)),
            requests: Arc::new(Mutex::new(Vec::new())),
            connections: ConnectionTracker::new(),
        };
        let shared = state.clone();
        let listener = self.listener;
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.connections.record_connection(shared.addr);
                let handler = handler.clone();
                let requests = shared.requests.clone();
                match acceptor.clone() {
                    Some(acceptor) => {
                        tokio::spawn(async move {
                            match tokio_boring::accept(&acceptor, stream).await {
                                Ok(tls) => handle_connection(tls, handler, requests).await,
                                Err(e) => tracing::debug!("TLS accept failed: {}", e),
                            }
                        });
                    }
                    None => {
                        tokio::spawn(handle_connection(stream, handler, requests));
                    }
                }
            }
        });
        state
    }
}

/// Serve requests on one connection until either side closes.
async fn handle_connection<S>(
    mut stream: S,
    handler: Handler,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let request = match timeout(Duration::from_secs(5), read_request(&mut stream, &mut buf)).await
        {
            Ok(Ok(Some(request))) => request,
            _ => break,
        };
        let reply = handler(&request);
        let close = request
            .header("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
            || contains_close(&reply);
        requests.lock().unwrap().push(request);

        if stream.write_all(&reply).await.is_err() || stream.flush().await.is_err() {
            break;
        }
        if close {
            let _ = stream.shutdown().await;
            break;
        }
    }
}

fn contains_close(reply: &[u8]) -> bool {
    let head_end = reply
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(reply.len());
    String::from_utf8_lossy(&reply[..head_end])
        .to_ascii_lowercase()
        .contains("\r\nconnection: close")
}

/// Read one request (head plus Content-Length body). `Ok(None)` on clean close.
async fn read_request<S>(stream: &mut S, buf: &mut Vec<u8>) -> std::io::Result<Option<RecordedRequest>>
where
    S: AsyncRead + Unpin,
{
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut headers);
        if let Ok(httparse::Status::Complete(head_len)) = parsed.parse(buf) {
            let headers: Vec<(String, String)> = parsed
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect();
            let method = parsed.method.unwrap_or_default().to_string();
            let target = parsed.path.unwrap_or_default().to_string();
            let body_len = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < head_len + body_len {
                if read_some(stream, buf).await? == 0 {
                    return Ok(None);
                }
            }
            let body = buf[head_len..head_len + body_len].to_vec();
            buf.drain(..head_len + body_len);
            return Ok(Some(RecordedRequest {
                method,
                target,
                headers,
                body,
            }));
        }
        if read_some(stream, buf).await? == 0 {
            return Ok(None);
        }
    }
}

async fn read_some<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut chunk = [0u8; 8192];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Run a server on its own runtime thread, for tests driving the blocking engine.
pub fn start_background<F>(handler: F) -> (String, ServerState)
where
    F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to build server runtime");
        runtime.block_on(async move {
            let server = MockHttpServer::new().await.expect("Failed to bind");
            let url = server.url();
            let state = server.start(handler);
            tx.send((url, state)).expect("Test went away");
            std::future::pending::<()>().await;
        });
    });
    rx.recv().expect("Server thread failed to start")
}
