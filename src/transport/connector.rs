//! BoringSSL TLS connector driven by a [`ClientHelloSpec`].
//!
//! Every declared extension is either configured on the handshake or
//! rejected when the profile is resolved. With random order off, the
//! declared order is handed to BoringSSL as permutation indices.

use std::collections::HashMap;
use std::io;
use std::io::Read;
use std::os::raw::c_int;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use boring::ssl::{
    ConnectConfiguration, ExtensionType, NameType, SslConnector, SslMethod, SslOptions,
    SslSession, SslSessionCacheMode, SslVerifyMode, SslVersion,
};
use boring_sys::{CRYPTO_BUFFER, SSL, SSL_CTX};
use foreign_types::ForeignTypeRef;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_boring::SslStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::fingerprint::client_hello::{self, HelloRandom};
use crate::fingerprint::tls::{ext, CertCompression, ClientHelloSpec, RECORD_SIZE_LIMIT};
use crate::fingerprint::FingerprintProfile;
use crate::transport::pinning::PinSet;
use crate::transport::proxy::{connect_tcp, Proxy, TunnelStream};
use crate::version::HttpVersion;

extern "C" {
    /// Enable GREASE (Generate Random Extensions And Sustain Extensibility)
    fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Shuffle extension order on every ClientHello
    fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

type DecompressFn =
    unsafe extern "C" fn(*mut SSL, *mut *mut CRYPTO_BUFFER, usize, *const u8, usize) -> c_int;

/// Hand a decompressed certificate back to BoringSSL.
///
/// # Safety
/// `out` must be the output pointer BoringSSL passed to the callback.
unsafe fn emit_cert_buffer(
    decompressed: io::Result<Vec<u8>>,
    expected_len: usize,
    out: *mut *mut CRYPTO_BUFFER,
) -> c_int {
    match decompressed {
        Ok(data) if data.len() == expected_len => {
            // CRYPTO_BUFFER_new copies the data
            let buffer =
                boring_sys::CRYPTO_BUFFER_new(data.as_ptr(), data.len(), std::ptr::null_mut());
            if buffer.is_null() {
                return 0;
            }
            *out = buffer;
            1
        }
        _ => 0,
    }
}

unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let result = brotli::Decompressor::new(compressed, 4096)
        .read_to_end(&mut decompressed)
        .map(|_| decompressed);
    emit_cert_buffer(result, uncompressed_len, out)
}

unsafe extern "C" fn decompress_zlib_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let result = flate2::read::ZlibDecoder::new(compressed)
        .read_to_end(&mut decompressed)
        .map(|_| decompressed);
    emit_cert_buffer(result, uncompressed_len, out)
}

unsafe extern "C" fn decompress_zstd_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let result = zstd::stream::decode_all(compressed);
    emit_cert_buffer(result, uncompressed_len, out)
}

fn ssl_version(v: u16) -> Option<SslVersion> {
    match v {
        0x0301 => Some(SslVersion::TLS1),
        0x0302 => Some(SslVersion::TLS1_1),
        0x0303 => Some(SslVersion::TLS1_2),
        0x0304 => Some(SslVersion::TLS1_3),
        _ => None,
    }
}

/// Resumable TLS sessions by server name, shared by one session's connections.
///
/// Only filled for profiles that declare pre_shared_key, which BoringSSL
/// sends on resumed handshakes.
#[derive(Clone, Default)]
pub struct TlsSessions(Arc<Mutex<HashMap<String, SslSession>>>);

impl TlsSessions {
    fn insert(&self, host: &str, session: SslSession) {
        if let Ok(mut map) = self.0.lock() {
            map.insert(host.to_ascii_lowercase(), session);
        }
    }

    /// TLS 1.3 tickets are single use, so a session is handed out once.
    fn take(&self, host: &str) -> Option<SslSession> {
        self.0.lock().ok()?.remove(&host.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.lock().map_or(0, |map| map.len())
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.0.lock() {
            map.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TlsSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSessions")
            .field("hosts", &self.len())
            .finish()
    }
}

/// Per-connection TLS policy.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Advertise only http/1.1 in ALPN.
    pub force_http1: bool,
    pub insecure_skip_verify: bool,
    pub pins: Arc<PinSet>,
    /// Log the synthesized ClientHello at `wraith::debug`.
    pub debug: bool,
    pub sessions: TlsSessions,
}

/// Dials targets directly or through a proxy and runs the fingerprinted handshake.
#[derive(Debug, Clone)]
pub struct Connector {
    profile: Arc<FingerprintProfile>,
    options: ConnectOptions,
}

impl Connector {
    pub fn new(profile: Arc<FingerprintProfile>, options: ConnectOptions) -> Self {
        Self { profile, options }
    }

    fn alpn(&self) -> &'static [&'static [u8]] {
        if self.options.force_http1 {
            &[b"http/1.1"]
        } else {
            &[b"h2", b"http/1.1"]
        }
    }

    /// Build the SSL connector for this profile.
    pub fn ssl_connector(&self) -> Result<SslConnector> {
        let spec = &self.profile.tls;
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("Failed to create SSL connector: {}", e)))?;

        let ciphers = spec.boring_cipher_list();
        if !ciphers.is_empty() {
            builder
                .set_cipher_list(&ciphers)
                .map_err(|e| Error::tls(format!("Failed to set cipher list: {}", e)))?;
        }

        let curves = spec.boring_curves();
        if !curves.is_empty() {
            builder
                .set_curves_list(&curves)
                .map_err(|e| Error::tls(format!("Failed to set curves {}: {}", curves, e)))?;
        }
        if let Some(limit) = spec.key_shares_limit()? {
            builder.set_key_shares_limit(limit);
        }

        let sigalgs = spec.boring_sigalgs();
        if !sigalgs.is_empty() {
            builder
                .set_sigalgs_list(&sigalgs)
                .map_err(|e| Error::tls(format!("Failed to set signature algorithms: {}", e)))?;
        }

        let (min, max) = spec.version_range();
        builder
            .set_min_proto_version(ssl_version(min))
            .map_err(|e| Error::tls(format!("Failed to set min TLS version: {}", e)))?;
        builder
            .set_max_proto_version(ssl_version(max))
            .map_err(|e| Error::tls(format!("Failed to set max TLS version: {}", e)))?;

        if spec.has_extension(ext::STATUS_REQUEST) {
            builder.enable_ocsp_stapling();
        }
        if spec.has_extension(ext::SCT) {
            builder.enable_signed_cert_timestamps();
        }
        if !spec.has_extension(ext::SESSION_TICKET) {
            builder.set_options(SslOptions::NO_TICKET);
        }
        if !spec.has_extension(ext::RENEGOTIATION_INFO) {
            builder.set_options(SslOptions::NO_RENEGOTIATION);
        }
        if spec.has_extension(ext::DELEGATED_CREDENTIALS) {
            let algs = spec.boring_delegated_credentials();
            builder
                .set_delegated_credentials(&algs)
                .map_err(|e| Error::tls(format!("Failed to set delegated credentials: {}", e)))?;
        }
        if spec.has_extension(ext::RECORD_SIZE_LIMIT) {
            builder.set_record_size_limit(RECORD_SIZE_LIMIT);
        }
        if !spec.random_extension_order {
            let indices = permutation_indices(spec)?;
            builder
                .set_extension_permutation_indices(&indices)
                .map_err(|e| Error::tls(format!("Failed to set extension order: {}", e)))?;
        }

        unsafe {
            let ctx = builder.as_ptr() as *mut SSL_CTX;
            SSL_CTX_set_grease_enabled(ctx, c_int::from(spec.uses_grease()));
            SSL_CTX_set_permute_extensions(ctx, c_int::from(spec.random_extension_order));

            // Client only receives compressed certificates, so no compress callback
            if let Some(algo) = spec.cert_compression {
                let decompress: DecompressFn = match algo {
                    CertCompression::Brotli => decompress_brotli_cert,
                    CertCompression::Zlib => decompress_zlib_cert,
                    CertCompression::Zstd => decompress_zstd_cert,
                };
                if boring_sys::SSL_CTX_add_cert_compression_alg(
                    ctx,
                    algo.id(),
                    None,
                    Some(decompress),
                ) != 1
                {
                    return Err(Error::tls(format!(
                        "Failed to register {:?} certificate compression",
                        algo
                    )));
                }
            }
        }

        // Browsers resume sessions
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
        if spec.has_extension(ext::PRE_SHARED_KEY) {
            let sessions = self.options.sessions.clone();
            builder.set_new_session_callback(move |ssl, session| {
                if let Some(host) = ssl.servername(NameType::HOST_NAME) {
                    sessions.insert(host, session);
                }
            });
        }

        let mut wire_alpn = Vec::new();
        for proto in self.alpn() {
            wire_alpn.push(proto.len() as u8);
            wire_alpn.extend_from_slice(proto);
        }
        builder
            .set_alpn_protos(&wire_alpn)
            .map_err(|e| Error::tls(format!("Failed to set ALPN: {}", e)))?;

        if self.options.insecure_skip_verify {
            builder.set_verify(SslVerifyMode::NONE);
        }

        Ok(builder.build())
    }

    /// Open a connection for `url`, tunnelling through `proxy` when given.
    pub async fn connect(&self, url: &Url, proxy: Option<&Proxy>) -> Result<MaybeHttpsStream> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("URL has no host: {}", url)))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("URL has no port: {}", url)))?;

        let tunnel = match proxy {
            Some(proxy) => {
                proxy
                    .dial(host, port, self.options.insecure_skip_verify)
                    .await?
            }
            None => TunnelStream::Tcp(connect_tcp(host, port).await?),
        };
        debug!(host, port, proxied = proxy.is_some(), "TCP connection established");

        match url.scheme() {
            "https" => self.handshake(host, tunnel).await,
            "http" => Ok(MaybeHttpsStream::Http(tunnel)),
            other => Err(Error::config(format!("Unsupported URL scheme '{}'", other))),
        }
    }

    async fn handshake(&self, host: &str, tunnel: TunnelStream) -> Result<MaybeHttpsStream> {
        if self.options.debug {
            self.log_client_hello(host);
        }

        let mut config = self
            .ssl_connector()?
            .configure()
            .map_err(|e| Error::tls(format!("Failed to configure SSL: {}", e)))?;
        if self.options.insecure_skip_verify {
            config.set_verify_hostname(false);
        }
        self.configure_connection(&mut config, host)?;

        let stream = tokio_boring::connect(config, host, tunnel)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake with {} failed: {}", host, e)))?;

        // Pins are checked before any application data moves
        self.options.pins.verify(host, stream.ssl())?;

        let stream = MaybeHttpsStream::Https(Box::new(stream));
        debug!(host, version = %stream.negotiated(), profile = %self.profile.name, "TLS handshake complete");
        Ok(stream)
    }

    /// Per-connection extensions: ECH GREASE, ALPS and PSK resumption.
    fn configure_connection(&self, config: &mut ConnectConfiguration, host: &str) -> Result<()> {
        let spec = &self.profile.tls;
        unsafe {
            let ssl = config.as_ptr();
            if spec.has_extension(ext::ENCRYPTED_CLIENT_HELLO) {
                boring_sys::SSL_set_enable_ech_grease(ssl, 1);
            }
            // ALPS is negotiated per protocol; Chrome only declares it for h2
            if spec.has_extension(ext::APPLICATION_SETTINGS) && !self.options.force_http1 {
                let proto = b"h2";
                if boring_sys::SSL_add_application_settings(
                    ssl,
                    proto.as_ptr(),
                    proto.len(),
                    std::ptr::null(),
                    0,
                ) != 1
                {
                    return Err(Error::tls("Failed to add application settings"));
                }
            }
        }
        if spec.has_extension(ext::PRE_SHARED_KEY) {
            if let Some(session) = self.options.sessions.take(host) {
                unsafe { config.set_session(&session) }
                    .map_err(|e| Error::tls(format!("Failed to resume session: {}", e)))?;
                debug!(host, "Resuming TLS session");
            }
        }
        Ok(())
    }

    fn log_client_hello(&self, host: &str) {
        let rendered = HelloRandom::generate()
            .and_then(|random| client_hello::build(&self.profile.tls, host, self.alpn(), &random));
        match rendered {
            Ok(bytes) => info!(
                target: "wraith::debug",
                host,
                profile = %self.profile.name,
                ja3 = %self.profile.ja3_string(),
                akamai = %self.profile.http2.akamai_string(),
                client_hello_len = bytes.len(),
                "ClientHello layout"
            ),
            Err(e) => warn!(target: "wraith::debug", host, "Could not render ClientHello: {}", e),
        }
    }
}

/// Positions of the declared extensions in BoringSSL's extension table.
///
/// GREASE, padding and pre_shared_key are placed by BoringSSL itself.
pub fn permutation_indices(spec: &ClientHelloSpec) -> Result<Vec<u8>> {
    spec.ordered_extensions()
        .map(|id| {
            ExtensionType::index_of(ExtensionType::from(id))
                .and_then(|idx| u8::try_from(idx).ok())
                .ok_or(Error::UnsupportedExtension(id))
        })
        .collect()
}

/// Stream that can be either HTTP (plain) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    Http(TunnelStream),
    Https(Box<SslStream<TunnelStream>>),
}

impl MaybeHttpsStream {
    /// Protocol selected through ALPN; plain connections speak HTTP/1.1.
    pub fn negotiated(&self) -> HttpVersion {
        match self {
            MaybeHttpsStream::Http(_) => HttpVersion::Http1_1,
            MaybeHttpsStream::Https(stream) => match stream.ssl().selected_alpn_protocol() {
                Some(b"h2") => HttpVersion::Http2,
                _ => HttpVersion::Http1_1,
            },
        }
    }

    /// Re-check pins on a pooled connection before reusing it.
    pub fn verify_pins(&self, host: &str, pins: &PinSet) -> Result<()> {
        match self {
            MaybeHttpsStream::Http(_) => Ok(()),
            MaybeHttpsStream::Https(stream) => pins.verify(host, stream.ssl()),
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
