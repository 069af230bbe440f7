//! Error types for wraith.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, dialing or executing a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent configuration, detected before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A named client identifier that is not in the registry.
    #[error("Unknown client identifier: {0}")]
    UnknownProfile(String),

    /// Malformed JA3 string.
    #[error("Malformed JA3 {field}: {message}")]
    Ja3Parse {
        field: &'static str,
        message: String,
    },

    /// Cipher suite id we cannot offer.
    #[error("Unsupported cipher suite: {0:#06x}")]
    UnsupportedCipher(u16),

    /// Extension id we cannot synthesize.
    #[error("Unsupported TLS extension: {0}")]
    UnsupportedExtension(u16),

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Redirect limit exceeded.
    #[error("Redirect limit exceeded ({count} redirects)")]
    RedirectLimit { count: u32 },

    /// Redirect chain revisited a URL.
    #[error("Redirect loop detected at {0}")]
    RedirectLoop(String),

    /// Invalid redirect URL.
    #[error("Invalid redirect URL: {0}")]
    InvalidRedirectUrl(String),

    /// Cookie parsing error.
    ///
    /// Only cookies handed in by the caller surface this; a bad Set-Cookie
    /// from a server is logged and skipped, so the kind is configuration.
    #[error("Cookie parse error: {0}")]
    CookieParse(String),

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding error.
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Missing required field or data.
    #[error("Missing required: {0}")]
    Missing(String),

    /// Whole-request deadline exceeded.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Proxy dial or tunnel error.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Certificate chain did not match the registered pins.
    #[error("Certificate pinning failed for {host}")]
    Pinning { host: String },

    /// Session was destroyed or never existed.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Request task panicked while panics were being caught.
    #[error("Request panicked: {0}")]
    Panic(String),
}

/// Coarse error category reported across the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Pinning,
    Timeout,
    Redirect,
    SessionClosed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Pinning => "pinning",
            Self::Timeout => "timeout",
            Self::Redirect => "redirect",
            Self::SessionClosed => "session_closed",
        }
    }
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::UnknownProfile(_)
            | Self::Ja3Parse { .. }
            | Self::UnsupportedCipher(_)
            | Self::UnsupportedExtension(_)
            | Self::UrlParse(_)
            | Self::Json(_)
            | Self::Base64(_)
            | Self::Missing(_)
            | Self::CookieParse(_) => ErrorKind::Configuration,
            Self::Pinning { .. } => ErrorKind::Pinning,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RedirectLimit { .. } | Self::RedirectLoop(_) | Self::InvalidRedirectUrl(_) => {
                ErrorKind::Redirect
            }
            Self::SessionClosed(_) => ErrorKind::SessionClosed,
            Self::HttpProtocol(_)
            | Self::Decompression(_)
            | Self::Io(_)
            | Self::Connection(_)
            | Self::Tls(_)
            | Self::Proxy(_)
            | Self::Panic(_) => ErrorKind::Transport,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a JA3 parse error for the given field.
    pub fn ja3(field: &'static str, message: impl Into<String>) -> Self {
        Self::Ja3Parse {
            field,
            message: message.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy(message.into())
    }

    /// Create a closed-session error.
    pub fn session_closed(id: impl Into<String>) -> Self {
        Self::SessionClosed(id.into())
    }
}
