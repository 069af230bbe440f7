//! Per-session connection reuse.
//!
//! - HTTP/1.1: a keep-alive connection goes back after a complete response
//! - HTTP/2: the connection stays while it accepts new streams
//!
//! One connection is kept per (scheme, host, port, proxy) key. The pool is
//! owned by a session and only touched under that session's lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::fingerprint::Http2Fingerprint;
use crate::response::Response;
use crate::transport::h1::{H1Connection, H1Request};
use crate::transport::h2::{H2Connection, H2Request};
use crate::transport::{Connector, MaybeHttpsStream, PinSet, Proxy};
use crate::version::HttpVersion;

/// Connection pool key identifying a unique origin and route.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PoolKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub proxy: Option<Proxy>,
    /// Connections made without verification are never handed to verifying requests.
    pub insecure: bool,
}

impl PoolKey {
    pub fn new(url: &Url, proxy: Option<&Proxy>, insecure: bool) -> Result<Self> {
        Ok(Self {
            scheme: url.scheme().to_string(),
            host: url
                .host_str()
                .ok_or_else(|| Error::config(format!("URL has no host: {}", url)))?
                .to_ascii_lowercase(),
            port: url
                .port_or_known_default()
                .ok_or_else(|| Error::config(format!("URL has no port: {}", url)))?,
            proxy: proxy.cloned(),
            insecure,
        })
    }
}

/// An established connection of either protocol.
pub enum Connection {
    H1(H1Connection<MaybeHttpsStream>),
    H2(Box<H2Connection<MaybeHttpsStream>>),
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Connection").field(&self.version()).finish()
    }
}

/// Request as handed to a connection.
#[derive(Debug)]
pub struct Outgoing<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    /// Headers in wire order.
    pub headers: &'a [(String, String)],
    pub body: Option<Bytes>,
}

impl Connection {
    /// Dial, handshake and pick the framing ALPN selected.
    pub async fn open(
        connector: &Connector,
        url: &Url,
        proxy: Option<&Proxy>,
        http2: &Http2Fingerprint,
    ) -> Result<Self> {
        let stream = connector.connect(url, proxy).await?;
        match stream.negotiated() {
            HttpVersion::Http2 => Ok(Self::H2(Box::new(
                H2Connection::handshake(stream, http2).await?,
            ))),
            HttpVersion::Http1_1 => Ok(Self::H1(H1Connection::new(stream))),
        }
    }

    pub fn version(&self) -> HttpVersion {
        match self {
            Self::H1(_) => HttpVersion::Http1_1,
            Self::H2(_) => HttpVersion::Http2,
        }
    }

    pub fn is_reusable(&self) -> bool {
        match self {
            Self::H1(conn) => conn.is_reusable(),
            Self::H2(conn) => conn.is_usable(),
        }
    }

    fn stream(&self) -> &MaybeHttpsStream {
        match self {
            Self::H1(conn) => conn.get_ref(),
            Self::H2(conn) => conn.get_ref(),
        }
    }

    /// Send one request and read the whole response.
    pub async fn send(&mut self, req: Outgoing<'_>) -> Result<Response> {
        let host = req
            .url
            .host_str()
            .ok_or_else(|| Error::config(format!("URL has no host: {}", req.url)))?;
        let authority = match req.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let mut target = req.url.path().to_string();
        if let Some(query) = req.url.query() {
            target.push('?');
            target.push_str(query);
        }

        let version = self.version();
        let (status, headers, body) = match self {
            Self::H1(conn) => {
                let res = conn
                    .send_request(H1Request {
                        method: req.method,
                        target: &target,
                        authority: &authority,
                        headers: req.headers,
                        body: req.body,
                    })
                    .await?;
                (res.status, res.headers, res.body)
            }
            Self::H2(conn) => {
                let res = conn
                    .send_request(H2Request {
                        method: req.method,
                        scheme: req.url.scheme(),
                        authority: &authority,
                        path: &target,
                        headers: req.headers,
                        body: req.body,
                    })
                    .await?;
                (res.status, res.headers, res.body)
            }
        };
        Ok(Response::new(status, headers, body, version, req.url.clone()))
    }
}

struct IdleEntry {
    conn: Connection,
    last_used: Instant,
}

impl IdleEntry {
    fn is_expired(&self, max_idle: Duration) -> bool {
        self.last_used.elapsed() >= max_idle
    }
}

/// Pool statistics (for debugging/monitoring).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
    pub http2_connections: usize,
}

pub struct ConnectionPool {
    idle: HashMap<PoolKey, IdleEntry>,
    max_idle_duration: Duration,
}

impl ConnectionPool {
    /// Default maximum idle duration (90 seconds)
    pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(90);

    pub fn new(max_idle_duration: Duration) -> Self {
        Self {
            idle: HashMap::new(),
            max_idle_duration,
        }
    }

    /// Take the cached connection for `key`, if it is fresh and still pinned correctly.
    pub fn take(&mut self, key: &PoolKey, pins: &PinSet) -> Result<Option<Connection>> {
        let Some(entry) = self.idle.remove(key) else {
            debug!(?key, "Pool: no cached connection");
            return Ok(None);
        };
        if entry.is_expired(self.max_idle_duration) || !entry.conn.is_reusable() {
            debug!(?key, idle = ?entry.last_used.elapsed(), "Pool: dropping stale connection");
            return Ok(None);
        }
        // The pin set may differ from the one checked at handshake time
        entry.conn.stream().verify_pins(&key.host, pins)?;
        debug!(?key, version = %entry.conn.version(), "Pool: reusing connection");
        Ok(Some(entry.conn))
    }

    /// Return a connection after a request. Unusable connections are dropped.
    pub fn put(&mut self, key: PoolKey, conn: Connection) {
        if !conn.is_reusable() {
            debug!(?key, "Pool: connection not reusable, closing");
            return;
        }
        self.idle.insert(
            key,
            IdleEntry {
                conn,
                last_used: Instant::now(),
            },
        );
    }

    /// Drop connections idle for longer than the limit.
    pub fn cleanup(&mut self) {
        let max_idle = self.max_idle_duration;
        self.idle.retain(|_, e| !e.is_expired(max_idle));
    }

    /// Close everything, returning how many connections were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.idle.len();
        self.idle.clear();
        n
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle_connections: self.idle.len(),
            http2_connections: self
                .idle
                .values()
                .filter(|e| e.conn.version() == HttpVersion::Http2)
                .count(),
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_IDLE)
    }
}
