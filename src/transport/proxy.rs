//! Proxy dialing: HTTP(S) CONNECT tunnels and SOCKS5.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use boring::ssl::{SslConnector, SslMethod, SslVerifyMode};
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const MAX_CONNECT_RESPONSE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Https,
    /// Target resolved locally.
    Socks5,
    /// Target resolved by the proxy.
    Socks5h,
}

/// A parsed proxy URL.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    credentials: Option<(String, String)>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Proxy {
    /// Parse `scheme://[user:pass@]host:port`.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| Error::config(format!("Invalid proxy URL {:?}: {}", raw, e)))?;
        let scheme = match url.scheme() {
            "http" => ProxyScheme::Http,
            "https" => ProxyScheme::Https,
            "socks5" => ProxyScheme::Socks5,
            "socks5h" => ProxyScheme::Socks5h,
            other => {
                return Err(Error::config(format!(
                    "Unsupported proxy scheme '{}'",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("Proxy URL {:?} has no host", raw)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port().unwrap_or(match scheme {
            ProxyScheme::Http => 80,
            ProxyScheme::Https => 443,
            ProxyScheme::Socks5 | ProxyScheme::Socks5h => 1080,
        });
        let credentials = if url.username().is_empty() {
            None
        } else {
            Some((
                decode_userinfo(url.username()),
                decode_userinfo(url.password().unwrap_or("")),
            ))
        };
        Ok(Self {
            scheme,
            host,
            port,
            credentials,
        })
    }

    /// `Proxy-Authorization` value for CONNECT.
    fn basic_auth(&self) -> Option<String> {
        self.credentials
            .as_ref()
            .map(|(u, p)| format!("Basic {}", BASE64_STANDARD.encode(format!("{}:{}", u, p))))
    }

    /// Open a byte stream to `target_host:target_port` through this proxy.
    pub async fn dial(
        &self,
        target_host: &str,
        target_port: u16,
        insecure_skip_verify: bool,
    ) -> Result<TunnelStream> {
        let proxy_addr = format!("{}:{}", self.host, self.port);
        debug!(proxy = %proxy_addr, target = %target_host, port = target_port, scheme = ?self.scheme, "Dialing through proxy");
        match self.scheme {
            ProxyScheme::Http => {
                let tcp = connect_tcp(&self.host, self.port).await?;
                let tcp = self.connect_tunnel(tcp, target_host, target_port).await?;
                Ok(TunnelStream::Tcp(tcp))
            }
            ProxyScheme::Https => {
                let tcp = connect_tcp(&self.host, self.port).await?;
                let tls = proxy_tls(&self.host, tcp, insecure_skip_verify).await?;
                let tls = self.connect_tunnel(tls, target_host, target_port).await?;
                Ok(TunnelStream::Tls(Box::new(tls)))
            }
            ProxyScheme::Socks5 | ProxyScheme::Socks5h => {
                let mut host = target_host.to_string();
                if self.scheme == ProxyScheme::Socks5 {
                    if let Some(addr) = tokio::net::lookup_host((target_host, target_port))
                        .await
                        .map_err(|e| {
                            Error::connection(format!("DNS resolution failed for {}: {}", target_host, e))
                        })?
                        .next()
                    {
                        host = addr.ip().to_string();
                    }
                }
                let stream = match &self.credentials {
                    Some((user, pass)) => Socks5Stream::connect_with_password(
                        proxy_addr.as_str(),
                        (host.as_str(), target_port),
                        user,
                        pass,
                    )
                    .await,
                    None => {
                        Socks5Stream::connect(proxy_addr.as_str(), (host.as_str(), target_port))
                            .await
                    }
                }
                .map_err(|e| Error::proxy(format!("SOCKS5 connect error: {}", e)))?;
                Ok(TunnelStream::Tcp(stream.into_inner()))
            }
        }
    }

    async fn connect_tunnel<T>(&self, mut conn: T, host: &str, port: u16) -> Result<T>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let authority = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let mut buf = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n").into_bytes();
        if let Some(auth) = self.basic_auth() {
            buf.extend_from_slice(b"Proxy-Authorization: ");
            buf.extend_from_slice(auth.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        conn.write_all(&buf)
            .await
            .map_err(|e| Error::proxy(format!("Failed to send CONNECT: {}", e)))?;
        conn.flush()
            .await
            .map_err(|e| Error::proxy(format!("Failed to send CONNECT: {}", e)))?;

        let mut recvd = Vec::with_capacity(512);
        let mut chunk = [0u8; 512];
        let head_end = loop {
            if let Some(end) = recvd.windows(4).position(|w| w == b"\r\n\r\n") {
                break end + 4;
            }
            if recvd.len() > MAX_CONNECT_RESPONSE {
                return Err(Error::proxy("Proxy response headers too long"));
            }
            let n = conn
                .read(&mut chunk)
                .await
                .map_err(|e| Error::proxy(format!("Failed to read CONNECT response: {}", e)))?;
            if n == 0 {
                return Err(Error::proxy("Proxy closed the connection during CONNECT"));
            }
            recvd.extend_from_slice(&chunk[..n]);
        };

        let status_line = String::from_utf8_lossy(&recvd[..head_end])
            .lines()
            .next()
            .unwrap_or("")
            .to_string();
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| Error::proxy(format!("Malformed CONNECT response: {:?}", status_line)))?;
        if !(200..300).contains(&status) {
            return Err(Error::proxy(format!("CONNECT rejected: {}", status_line)));
        }
        if recvd.len() > head_end {
            return Err(Error::proxy("Proxy sent data before the tunnel was used"));
        }
        debug!(target = %authority, "CONNECT tunnel established");
        Ok(conn)
    }
}

fn decode_userinfo(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

pub(crate) async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::connection(format!("Failed to connect to {}:{}: {}", host, port, e)))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Plain TLS to an `https://` proxy, advertising only http/1.1.
async fn proxy_tls(host: &str, tcp: TcpStream, insecure: bool) -> Result<SslStream<TcpStream>> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| Error::tls(format!("Failed to create SSL connector: {}", e)))?;
    builder
        .set_alpn_protos(b"\x08http/1.1")
        .map_err(|e| Error::tls(format!("Failed to set ALPN: {}", e)))?;
    if insecure {
        builder.set_verify(SslVerifyMode::NONE);
    }
    let config = builder
        .build()
        .configure()
        .map_err(|e| Error::tls(format!("Failed to configure SSL: {}", e)))?;
    tokio_boring::connect(config, host, tcp)
        .await
        .map_err(|e| Error::proxy(format!("TLS to proxy failed: {}", e)))
}

/// Byte stream to the target, before any target TLS.
#[derive(Debug)]
pub enum TunnelStream {
    /// Direct TCP, HTTP CONNECT or SOCKS5.
    Tcp(TcpStream),
    /// CONNECT through an `https://` proxy.
    Tls(Box<SslStream<TcpStream>>),
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            TunnelStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            TunnelStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            TunnelStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            TunnelStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            TunnelStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            TunnelStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            TunnelStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            TunnelStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
