//! HTTP response with explicit decompression.

use std::io::Read;

use bytes::Bytes;
use url::Url;

use crate::error::{Error, Result};
use crate::version::HttpVersion;

/// Response as received from the transport, body still encoded.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Header fields in received order, names as sent by the server.
    pub headers: Vec<(String, String)>,
    body: Bytes,
    http_version: HttpVersion,
    /// URL that produced this response (the final hop after redirects).
    pub url: Url,
}

impl Response {
    pub fn new(
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
        http_version: HttpVersion,
        url: Url,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            http_version,
            url,
        }
    }

    pub fn http_version(&self) -> HttpVersion {
        self.http_version
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Headers grouped by name, values kept in arrival order.
    ///
    /// Names are grouped case-insensitively under their first spelling.
    pub fn header_multimap(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in &self.headers {
            match grouped.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some((_, values)) => values.push(value.clone()),
                None => grouped.push((name.clone(), vec![value.clone()])),
            }
        }
        grouped
    }

    /// Decode the body.
    ///
    /// A non-empty `forced` encoding overrides `Content-Encoding`. Stacked
    /// encodings (`gzip, br`) are undone right to left. An empty body is
    /// returned as is: HEAD, 204 and 304 replies still carry the header.
    pub fn decoded_body(&self, forced: Option<&str>) -> Result<Bytes> {
        if self.body.is_empty() {
            return Ok(self.body.clone());
        }
        let declared = match forced.filter(|f| !f.trim().is_empty()) {
            Some(f) => f.to_string(),
            None => self.header("content-encoding").unwrap_or("").to_string(),
        };
        let mut body = self.body.clone();
        for coding in declared.split(',').map(|c| c.trim().to_ascii_lowercase()).rev() {
            body = match coding.as_str() {
                "" | "identity" => body,
                "gzip" | "x-gzip" => decode_gzip(&body)?,
                "deflate" => decode_deflate(&body)?,
                "br" => decode_brotli(&body)?,
                "zstd" => decode_zstd(&body)?,
                other => {
                    tracing::warn!("Unknown content-encoding {}, leaving body as is", other);
                    body
                }
            };
        }
        Ok(body)
    }
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    // Servers send both zlib-wrapped and raw deflate under this name
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoder = brotli::Decompressor::new(data, 4096);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("brotli: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_zstd(data: &[u8]) -> Result<Bytes> {
    zstd::stream::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| Error::Decompression(format!("zstd: {}", e)))
}
