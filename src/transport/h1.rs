//! HTTP/1.1 client over a single connection.
//!
//! Requests are framed by hand so header order and casing reach the wire
//! exactly as resolved; responses are parsed with httparse.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::headers::{validate_header_name, validate_header_value};

/// Maximum response header size (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

const READ_CHUNK: usize = 8192;

/// A request ready to be framed.
#[derive(Debug)]
pub struct H1Request<'a> {
    pub method: &'a str,
    /// origin-form target (`/path?query`)
    pub target: &'a str,
    /// `host[:port]` sent as Host unless `headers` carries one.
    pub authority: &'a str,
    /// Headers in wire order.
    pub headers: &'a [(String, String)],
    pub body: Option<Bytes>,
}

#[derive(Debug)]
pub struct H1Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// HTTP/1.1 connection for sending requests.
pub struct H1Connection<S> {
    stream: S,
    /// Bytes read past the end of the previous response.
    buffer: Vec<u8>,
    /// Whether the connection must be closed after the current response.
    should_close: bool,
}

impl<S> H1Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            should_close: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Whether the connection can carry another request.
    pub fn is_reusable(&self) -> bool {
        !self.should_close && self.buffer.is_empty()
    }

    /// Send a request and read the final (non-1xx) response.
    pub async fn send_request(&mut self, req: H1Request<'_>) -> Result<H1Response> {
        let head = build_request(&req)?;
        let result = self.exchange(&head, req.body.as_ref(), req.method).await;
        if result.is_err() {
            self.should_close = true;
        }
        result
    }

    async fn exchange(
        &mut self,
        head: &[u8],
        body: Option<&Bytes>,
        method: &str,
    ) -> Result<H1Response> {
        self.stream
            .write_all(head)
            .await
            .map_err(|e| Error::http_protocol(format!("Failed to write request: {}", e)))?;
        if let Some(body) = body {
            self.stream
                .write_all(body)
                .await
                .map_err(|e| Error::http_protocol(format!("Failed to write body: {}", e)))?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::http_protocol(format!("Failed to flush: {}", e)))?;

        loop {
            let header_end = self.fill_headers().await?;
            let (status, headers) = parse_head(&self.buffer[..header_end])?;
            self.buffer.drain(..header_end);

            // RFC 9112 Section 6: any number of 1xx may precede the final response
            if (100..200).contains(&status) {
                trace!(status, "Skipping interim response");
                continue;
            }

            if header_value(&headers, "connection")
                .map(|v| v.to_ascii_lowercase().contains("close"))
                .unwrap_or(false)
            {
                self.should_close = true;
            }

            let body = self.read_body(status, &headers, method).await?;
            return Ok(H1Response {
                status,
                headers,
                body,
            });
        }
    }

    /// Read until the buffer holds a complete header block, returning its length.
    async fn fill_headers(&mut self) -> Result<usize> {
        loop {
            if let Some(end) = find_header_end(&self.buffer) {
                return Ok(end);
            }
            if self.buffer.len() > MAX_HEADERS_SIZE {
                return Err(Error::http_protocol("Response headers too large"));
            }
            if self.read_more().await? == 0 {
                return Err(Error::connection(
                    "Connection closed before response complete",
                ));
            }
        }
    }

    async fn read_more(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::http_protocol(format!("Failed to read response: {}", e)))?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// RFC 9112 Section 6.3 message body length.
    async fn read_body(
        &mut self,
        status: u16,
        headers: &[(String, String)],
        method: &str,
    ) -> Result<Bytes> {
        if method.eq_ignore_ascii_case("HEAD") || matches!(status, 204 | 304) {
            return Ok(Bytes::new());
        }

        let transfer_encoding = header_value(headers, "transfer-encoding");
        if let Some(te) = transfer_encoding {
            let chunked = te
                .split(',')
                .next_back()
                .map(|s| s.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false);
            if chunked {
                return self.read_chunked().await;
            }
            self.should_close = true;
            return self.read_until_close().await;
        }

        if let Some(cl) = header_value(headers, "content-length") {
            let len = parse_content_length(cl)?;
            return self.read_fixed(len).await;
        }

        self.should_close = true;
        self.read_until_close().await
    }

    async fn read_fixed(&mut self, len: usize) -> Result<Bytes> {
        while self.buffer.len() < len {
            if self.read_more().await? == 0 {
                return Err(Error::http_protocol(format!(
                    "Connection closed before receiving full body (got {} of {} bytes)",
                    self.buffer.len(),
                    len
                )));
            }
        }
        Ok(Bytes::from(self.buffer.drain(..len).collect::<Vec<u8>>()))
    }

    async fn read_until_close(&mut self) -> Result<Bytes> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                // TLS peers often close without close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(Error::http_protocol(format!(
                        "Failed to read body (close-delimited): {}",
                        e
                    )))
                }
            }
        }
        Ok(Bytes::from(std::mem::take(&mut self.buffer)))
    }

    /// chunked-body = *chunk last-chunk trailer-section CRLF
    async fn read_chunked(&mut self) -> Result<Bytes> {
        let mut body = Vec::new();
        loop {
            let (size, line_end) = loop {
                if let Some(found) = find_chunk_size(&self.buffer)? {
                    break found;
                }
                if self.read_more().await? == 0 {
                    return Err(Error::http_protocol(
                        "Connection closed while reading chunk size",
                    ));
                }
            };
            self.buffer.drain(..line_end);

            if size == 0 {
                self.consume_trailers().await?;
                return Ok(Bytes::from(body));
            }

            while self.buffer.len() < size + 2 {
                if self.read_more().await? == 0 {
                    return Err(Error::http_protocol(
                        "Connection closed while reading chunk data",
                    ));
                }
            }
            if &self.buffer[size..size + 2] != b"\r\n" {
                return Err(Error::http_protocol("Chunk data not terminated by CRLF"));
            }
            body.extend_from_slice(&self.buffer[..size]);
            self.buffer.drain(..size + 2);
        }
    }

    /// Trailer fields are read and discarded.
    async fn consume_trailers(&mut self) -> Result<()> {
        loop {
            match find_crlf(&self.buffer) {
                Some(0) => {
                    self.buffer.drain(..2);
                    return Ok(());
                }
                Some(pos) => {
                    self.buffer.drain(..pos + 2);
                }
                None => {
                    if self.read_more().await? == 0 {
                        self.should_close = true;
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Whether a bodyless request still announces `Content-Length: 0`.
pub fn declares_length(method: &str) -> bool {
    !matches!(method, "GET" | "HEAD")
}

/// Frame the request line and header block.
fn build_request(req: &H1Request<'_>) -> Result<Vec<u8>> {
    for (name, value) in req.headers {
        if !validate_header_name(name) {
            return Err(Error::config(format!("Invalid header name: {:?}", name)));
        }
        if !validate_header_value(value) {
            return Err(Error::config(format!("Invalid value for header {}", name)));
        }
    }
    if !validate_header_value(req.target) || req.target.contains(' ') {
        return Err(Error::config(format!("Invalid request target: {:?}", req.target)));
    }

    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(req.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let has = |name: &str| req.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name));

    // Host leads unless the caller placed it
    if !has("host") {
        push_header(&mut out, "Host", req.authority);
    }
    for (name, value) in req.headers {
        push_header(&mut out, name, value);
    }

    if let Some(body) = &req.body {
        if !has("transfer-encoding") && !has("content-length") {
            push_header(&mut out, "Content-Length", &body.len().to_string());
        }
    } else if declares_length(req.method) && !has("content-length") {
        push_header(&mut out, "Content-Length", "0");
    }

    out.extend_from_slice(b"\r\n");
    Ok(out)
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn parse_head(block: &[u8]) -> Result<(u16, Vec<(String, String)>)> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut storage);
    match response
        .parse(block)
        .map_err(|e| Error::http_protocol(format!("Failed to parse response: {}", e)))?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => {
            return Err(Error::http_protocol("Incomplete response headers"));
        }
    }
    let status = response
        .code
        .ok_or_else(|| Error::http_protocol("Missing status code"))?;
    let headers = response
        .headers
        .iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();
    Ok((status, headers))
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Parse a chunk-size line, returning (size, bytes through CRLF).
fn find_chunk_size(buffer: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(pos) = find_crlf(buffer) else {
        return Ok(None);
    };
    let line = String::from_utf8_lossy(&buffer[..pos]);
    let size_part = line.split(';').next().unwrap_or("").trim();
    let size = usize::from_str_radix(size_part, 16)
        .map_err(|_| Error::http_protocol(format!("Invalid chunk size: {:?}", size_part)))?;
    Ok(Some((size, pos + 2)))
}

/// Content-Length must be a non-negative integer; a comma list must repeat one value.
fn parse_content_length(value: &str) -> Result<usize> {
    let mut parsed: Option<usize> = None;
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::http_protocol(format!(
                "Invalid Content-Length: {:?}",
                value
            )));
        }
        let n: usize = part
            .parse()
            .map_err(|_| Error::http_protocol(format!("Content-Length overflow: {:?}", value)))?;
        match parsed {
            Some(prev) if prev != n => {
                return Err(Error::http_protocol(format!(
                    "Conflicting Content-Length values: {:?}",
                    value
                )));
            }
            _ => parsed = Some(n),
        }
    }
    parsed.ok_or_else(|| Error::http_protocol("Empty Content-Length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    async fn roundtrip(
        reply: &'static [u8],
        method: &'static str,
        hdrs: Vec<(String, String)>,
        body: Option<Bytes>,
    ) -> (Result<H1Response>, Vec<u8>, bool) {
        let (client, mut server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = server.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
                if let Some(end) = find_header_end(&seen) {
                    let head = String::from_utf8_lossy(&seen[..end]).to_lowercase();
                    let want = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length: "))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if seen.len() >= end + want {
                        break;
                    }
                }
            }
            server.write_all(reply).await.unwrap();
            seen
        });
        let mut conn = H1Connection::new(client);
        let res = conn
            .send_request(H1Request {
                method,
                target: "/path?q=1",
                authority: "example.com",
                headers: &hdrs,
                body,
            })
            .await;
        let seen = server_task.await.unwrap();
        (res, seen, conn.is_reusable())
    }

    #[tokio::test]
    async fn request_is_framed_in_resolved_order() {
        let hdrs = headers(&[("User-Agent", "ua"), ("accept", "*/*"), ("X-Trace", "1")]);
        let (res, seen, reusable) = roundtrip(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
            "POST",
            hdrs,
            Some(Bytes::from_static(b"abc")),
        )
        .await;
        let res = res.unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.body.as_ref(), b"ok");
        assert!(reusable);
        assert_eq!(
            String::from_utf8(seen).unwrap(),
            "POST /path?q=1 HTTP/1.1\r\nHost: example.com\r\nUser-Agent: ua\r\naccept: */*\r\n\
             X-Trace: 1\r\nContent-Length: 3\r\n\r\nabc"
        );
    }

    #[tokio::test]
    async fn caller_placed_host_is_kept_in_place() {
        let hdrs = headers(&[("Accept", "*/*"), ("Host", "override.test")]);
        let (_, seen, _) =
            roundtrip(b"HTTP/1.1 204 No Content\r\n\r\n", "GET", hdrs, None).await;
        let text = String::from_utf8(seen).unwrap();
        assert!(text.starts_with("GET /path?q=1 HTTP/1.1\r\nAccept: */*\r\nHost: override.test\r\n"));
        assert_eq!(text.matches("Host:").count(), 1);
    }

    #[tokio::test]
    async fn interim_responses_are_skipped() {
        let (res, _, _) = roundtrip(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 103 Early Hints\r\nLink: </a>\r\n\r\n\
              HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
            "GET",
            Vec::new(),
            None,
        )
        .await;
        assert_eq!(res.unwrap().status, 201);
    }

    #[tokio::test]
    async fn chunked_body_with_trailers() {
        let (res, _, reusable) = roundtrip(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: abc\r\n\r\n",
            "GET",
            Vec::new(),
            None,
        )
        .await;
        assert_eq!(res.unwrap().body.as_ref(), b"hello world");
        assert!(reusable);
    }

    #[tokio::test]
    async fn close_delimited_body_is_not_reusable() {
        let (res, _, reusable) = roundtrip(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nuntil close",
            "GET",
            Vec::new(),
            None,
        )
        .await;
        assert_eq!(res.unwrap().body.as_ref(), b"until close");
        assert!(!reusable);
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let (res, _, reusable) = roundtrip(
            b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n",
            "HEAD",
            Vec::new(),
            None,
        )
        .await;
        let res = res.unwrap();
        assert!(res.body.is_empty());
        assert_eq!(header_value(&res.headers, "content-length"), Some("1234"));
        assert!(reusable);
    }

    #[tokio::test]
    async fn connection_close_marks_not_reusable() {
        let (_, _, reusable) = roundtrip(
            b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
            "GET",
            Vec::new(),
            None,
        )
        .await;
        assert!(!reusable);
    }

    #[test]
    fn header_injection_is_rejected() {
        let hdrs = headers(&[("X-Evil", "a\r\nInjected: 1")]);
        let req = H1Request {
            method: "GET",
            target: "/",
            authority: "example.com",
            headers: &hdrs,
            body: None,
        };
        assert!(build_request(&req).is_err());
    }

    #[test]
    fn bodyless_requests_declare_zero_length_except_get_and_head() {
        let hdrs = headers(&[]);
        for (method, expected) in [
            ("GET", false),
            ("HEAD", false),
            ("DELETE", true),
            ("OPTIONS", true),
            ("POST", true),
        ] {
            let req = H1Request {
                method,
                target: "/",
                authority: "example.com",
                headers: &hdrs,
                body: None,
            };
            let wire = String::from_utf8(build_request(&req).unwrap()).unwrap();
            assert_eq!(wire.contains("Content-Length: 0\r\n"), expected, "{}", method);
        }
    }

    #[test]
    fn content_length_rules() {
        assert_eq!(parse_content_length("42").unwrap(), 42);
        assert_eq!(parse_content_length("7, 7").unwrap(), 7);
        assert!(parse_content_length("7, 8").is_err());
        assert!(parse_content_length("-1").is_err());
        assert!(parse_content_length("").is_err());
    }

    #[test]
    fn chunk_size_lines() {
        assert_eq!(find_chunk_size(b"1A\r\n").unwrap(), Some((26, 4)));
        assert_eq!(find_chunk_size(b"ff;name=v\r\n").unwrap(), Some((255, 11)));
        assert_eq!(find_chunk_size(b"10").unwrap(), None);
        assert!(find_chunk_size(b"zz\r\n").is_err());
    }
}
