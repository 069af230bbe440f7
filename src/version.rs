//! Negotiated HTTP version.

/// Protocol a response was carried over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    /// HTTP/1.1 framing, either forced or negotiated.
    #[default]
    Http1_1,
    /// HTTP/2 selected through ALPN.
    Http2,
}

impl HttpVersion {
    /// Protocol name as reported in `usedProtocol`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2.0",
        }
    }

    /// ALPN token advertised for this version.
    pub fn alpn_id(&self) -> &'static [u8] {
        match self {
            Self::Http1_1 => b"http/1.1",
            Self::Http2 => b"h2",
        }
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
