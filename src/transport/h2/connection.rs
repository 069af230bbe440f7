//! HTTP/2 client connection with a fingerprint-shaped preface.
//!
//! The preface is written in one flight: connection preface, SETTINGS in the
//! profile's order, the connection WINDOW_UPDATE, then any PRIORITY frames.
//! Requests run one stream at a time; the session lock serializes callers.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::frame::{
    error_code_name, Frame, FrameHeader, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN, PREFACE,
};
use super::hpack::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::fingerprint::http2::{Http2Fingerprint, PseudoHeader, SettingId};

const DEFAULT_WINDOW: i64 = 65_535;
const MAX_WINDOW: i64 = (1 << 31) - 1;
const REFUSED_STREAM: u32 = 0x7;

/// Headers that are meaningless (and forbidden) on HTTP/2.
const CONNECTION_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// One request as the HTTP/2 layer sees it.
#[derive(Debug)]
pub struct H2Request<'a> {
    pub method: &'a str,
    pub scheme: &'a str,
    pub authority: &'a str,
    pub path: &'a str,
    /// Regular headers, already in send order.
    pub headers: &'a [(String, String)],
    pub body: Option<Bytes>,
}

#[derive(Debug)]
pub struct H2Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Response { end_stream: bool },
    Push,
}

/// Header block waiting for CONTINUATION frames.
#[derive(Debug)]
struct PendingBlock {
    stream_id: u32,
    kind: BlockKind,
    block: BytesMut,
}

/// State of the single in-flight stream.
#[derive(Debug, Default)]
struct StreamState {
    id: u32,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
    send_window: i64,
    unacked_recv: i64,
    done: bool,
}

pub struct H2Connection<S> {
    io: S,
    read_buf: BytesMut,
    encoder: Encoder,
    decoder: Decoder,
    fingerprint: Http2Fingerprint,
    next_stream_id: u32,
    local_max_frame: u32,
    local_stream_window: i64,
    conn_recv_target: i64,
    conn_unacked_recv: i64,
    peer_max_frame: u32,
    peer_initial_window: i64,
    conn_send_window: i64,
    pending: Option<PendingBlock>,
    goaway: Option<u32>,
    broken: bool,
}

impl<S> H2Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Write the client preface shaped by `fingerprint`.
    ///
    /// The server's SETTINGS are not awaited; they are applied when the first
    /// response is read.
    pub async fn handshake(mut io: S, fingerprint: &Http2Fingerprint) -> Result<Self> {
        let mut out = BytesMut::with_capacity(256);
        out.extend_from_slice(PREFACE);
        Frame::Settings {
            ack: false,
            values: fingerprint
                .settings
                .iter()
                .map(|(id, v)| (id.id(), *v))
                .collect(),
        }
        .encode(&mut out);
        if fingerprint.connection_flow > 0 {
            Frame::WindowUpdate {
                stream_id: 0,
                increment: fingerprint.connection_flow,
            }
            .encode(&mut out);
        }
        for p in &fingerprint.priority_frames {
            Frame::Priority {
                stream_id: p.stream_id,
                param: p.priority_param,
            }
            .encode(&mut out);
        }
        io.write_all(&out).await?;
        io.flush().await?;
        debug!(akamai = %fingerprint.akamai_string(), "HTTP/2 preface sent");

        // Streams named by PRIORITY frames are idle placeholders; requests start after them
        let next_stream_id = fingerprint
            .priority_frames
            .iter()
            .map(|p| p.stream_id)
            .filter(|id| id % 2 == 1)
            .max()
            .map_or(1, |id| id + 2);

        Ok(Self {
            io,
            read_buf: BytesMut::with_capacity(16 * 1024),
            encoder: Encoder::new(),
            decoder: Decoder::new(fingerprint.header_table_size() as usize),
            fingerprint: fingerprint.clone(),
            next_stream_id,
            local_max_frame: fingerprint
                .setting(SettingId::MaxFrameSize)
                .unwrap_or(DEFAULT_MAX_FRAME_SIZE),
            local_stream_window: fingerprint.initial_window_size() as i64,
            conn_recv_target: DEFAULT_WINDOW + fingerprint.connection_flow as i64,
            conn_unacked_recv: 0,
            peer_max_frame: DEFAULT_MAX_FRAME_SIZE,
            peer_initial_window: DEFAULT_WINDOW,
            conn_send_window: DEFAULT_WINDOW,
            pending: None,
            goaway: None,
            broken: false,
        })
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Whether another request may be started on this connection.
    pub fn is_usable(&self) -> bool {
        !self.broken && self.goaway.is_none() && self.next_stream_id < (1 << 31)
    }

    /// Build the ordered header list: pseudo-headers first, then regular ones.
    fn header_list<'r>(&self, req: &H2Request<'r>) -> Vec<(String, &'r str)> {
        let mut list = Vec::with_capacity(4 + req.headers.len());
        for p in &self.fingerprint.pseudo_header_order {
            let value = match p {
                PseudoHeader::Method => req.method,
                PseudoHeader::Authority => req.authority,
                PseudoHeader::Scheme => req.scheme,
                PseudoHeader::Path => req.path,
            };
            list.push((p.as_str().to_string(), value));
        }
        for (name, value) in req.headers {
            let name = name.to_ascii_lowercase();
            if name.starts_with(':') || CONNECTION_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if name == "te" && !value.eq_ignore_ascii_case("trailers") {
                continue;
            }
            list.push((name, value.as_str()));
        }
        list
    }

    /// Send one request and read its complete response.
    pub async fn send_request(&mut self, req: H2Request<'_>) -> Result<H2Response> {
        if !self.is_usable() {
            return Err(Error::connection("HTTP/2 connection is no longer usable"));
        }
        let result = self.exchange(req).await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    async fn exchange(&mut self, req: H2Request<'_>) -> Result<H2Response> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let list = self.header_list(&req);
        let block = self
            .encoder
            .encode(list.iter().map(|(n, v)| (n.as_str(), *v)));
        let body = req.body.filter(|b| !b.is_empty());
        trace!(stream_id, headers = list.len(), "sending HEADERS");

        let mut out = BytesMut::new();
        let max = self.peer_max_frame as usize;
        let mut chunks = block.chunks(max.max(1)).peekable();
        let first = Bytes::copy_from_slice(chunks.next().unwrap_or(&[]));
        Frame::Headers {
            stream_id,
            block: first,
            priority: self.fingerprint.header_priority,
            end_stream: body.is_none(),
            end_headers: chunks.peek().is_none(),
        }
        .encode(&mut out);
        while let Some(chunk) = chunks.next() {
            Frame::Continuation {
                stream_id,
                block: Bytes::copy_from_slice(chunk),
                end_headers: chunks.peek().is_none(),
            }
            .encode(&mut out);
        }
        self.io.write_all(&out).await?;
        self.io.flush().await?;

        let mut state = StreamState {
            id: stream_id,
            send_window: self.peer_initial_window,
            ..Default::default()
        };

        if let Some(body) = body {
            self.send_body(&mut state, body).await?;
        }

        while !state.done {
            let frame = self.read_frame().await?;
            self.process(frame, &mut state).await?;
        }

        let status = state
            .status
            .ok_or_else(|| Error::http_protocol("stream ended without a response"))?;
        Ok(H2Response {
            status,
            headers: state.headers,
            body: state.body.freeze(),
        })
    }

    /// Send DATA frames within the peer's windows, reading frames while blocked.
    async fn send_body(&mut self, state: &mut StreamState, mut body: Bytes) -> Result<()> {
        while !body.is_empty() {
            let window = self.conn_send_window.min(state.send_window);
            if window <= 0 {
                let frame = self.read_frame().await?;
                self.process(frame, state).await?;
                if state.done {
                    // Server answered before reading the whole body
                    return Ok(());
                }
                continue;
            }
            let n = (window as usize)
                .min(self.peer_max_frame as usize)
                .min(body.len());
            let chunk = body.split_to(n);
            let frame = Frame::Data {
                stream_id: state.id,
                data: chunk,
                end_stream: body.is_empty(),
                flow_len: n as u32,
            };
            self.io.write_all(&frame.to_bytes()).await?;
            self.conn_send_window -= n as i64;
            state.send_window -= n as i64;
        }
        self.io.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(header) = FrameHeader::parse(&self.read_buf) {
                if header.length > self.local_max_frame {
                    return Err(Error::http_protocol(format!(
                        "frame of {} bytes exceeds MAX_FRAME_SIZE {}",
                        header.length, self.local_max_frame
                    )));
                }
                let total = FRAME_HEADER_LEN + header.length as usize;
                if self.read_buf.len() >= total {
                    let mut raw = self.read_buf.split_to(total).freeze();
                    let payload = raw.split_off(FRAME_HEADER_LEN);
                    let frame = Frame::decode(&header, payload)?;
                    trace!(kind = ?header.kind, stream_id = header.stream_id, "frame received");
                    return Ok(frame);
                }
            }
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::connection("HTTP/2 connection closed by peer"));
            }
        }
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.io.write_all(&frame.to_bytes()).await?;
        self.io.flush().await?;
        Ok(())
    }

    fn apply_settings(&mut self, values: &[(u16, u32)], state: &mut StreamState) -> Result<()> {
        for &(id, value) in values {
            match SettingId::from_id(id) {
                Some(SettingId::HeaderTableSize) => {
                    self.encoder.set_max_table_size(value as usize)
                }
                Some(SettingId::InitialWindowSize) => {
                    let value = value as i64;
                    if value > MAX_WINDOW {
                        return Err(Error::http_protocol("INITIAL_WINDOW_SIZE above 2^31-1"));
                    }
                    state.send_window += value - self.peer_initial_window;
                    self.peer_initial_window = value;
                }
                Some(SettingId::MaxFrameSize) => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=16_777_215).contains(&value) {
                        return Err(Error::http_protocol(format!(
                            "invalid MAX_FRAME_SIZE {}",
                            value
                        )));
                    }
                    self.peer_max_frame = value;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn decode_block(&mut self, stream_id: u32, kind: BlockKind, block: &[u8], state: &mut StreamState) -> Result<()> {
        // Push blocks are decoded only to keep HPACK state in sync
        let fields = self.decoder.decode(block)?;
        let BlockKind::Response { end_stream } = kind else {
            return Ok(());
        };
        if stream_id != state.id {
            return Ok(());
        }

        if state.status.is_none() {
            let status = fields
                .iter()
                .find(|(n, _)| n == ":status")
                .and_then(|(_, v)| v.parse::<u16>().ok())
                .ok_or_else(|| Error::http_protocol("response without :status"))?;
            if (100..200).contains(&status) {
                trace!(status, "interim response skipped");
            } else {
                state.status = Some(status);
                state.headers = fields
                    .into_iter()
                    .filter(|(n, _)| !n.starts_with(':'))
                    .collect();
            }
        }
        // A second block after the status is trailers, which are dropped
        if end_stream {
            state.done = true;
        }
        Ok(())
    }

    async fn process(&mut self, frame: Frame, state: &mut StreamState) -> Result<()> {
        if let Some(pending) = &self.pending {
            let continues = matches!(&frame, Frame::Continuation { stream_id, .. } if *stream_id == pending.stream_id);
            if !continues {
                return Err(Error::http_protocol("expected CONTINUATION frame"));
            }
        }

        match frame {
            Frame::Settings { ack: false, values } => {
                self.apply_settings(&values, state)?;
                self.write_frame(Frame::Settings {
                    ack: true,
                    values: Vec::new(),
                })
                .await?;
                debug!(count = values.len(), "peer SETTINGS applied");
            }
            Frame::Settings { ack: true, .. } => {}
            Frame::Ping {
                ack: false,
                payload,
            } => {
                self.write_frame(Frame::Ping { ack: true, payload }).await?;
            }
            Frame::Ping { ack: true, .. } => {}
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                if stream_id == 0 {
                    self.conn_send_window += increment as i64;
                    if self.conn_send_window > MAX_WINDOW {
                        return Err(Error::http_protocol("connection window overflow"));
                    }
                } else if stream_id == state.id {
                    state.send_window += increment as i64;
                }
            }
            Frame::GoAway {
                last_stream_id,
                code,
                debug,
            } => {
                self.goaway = Some(last_stream_id);
                warn!(
                    last_stream_id,
                    code = error_code_name(code),
                    debug = %String::from_utf8_lossy(&debug),
                    "GOAWAY received"
                );
                if last_stream_id < state.id {
                    return Err(Error::connection(format!(
                        "server sent GOAWAY ({}) before stream {}",
                        error_code_name(code),
                        state.id
                    )));
                }
            }
            Frame::RstStream { stream_id, code } => {
                if stream_id == state.id {
                    return Err(Error::connection(format!(
                        "stream {} reset by server: {}",
                        stream_id,
                        error_code_name(code)
                    )));
                }
            }
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
                ..
            } => {
                let kind = BlockKind::Response { end_stream };
                if end_headers {
                    self.decode_block(stream_id, kind, &block, state)?;
                } else {
                    self.pending = Some(PendingBlock {
                        stream_id,
                        kind,
                        block: BytesMut::from(&block[..]),
                    });
                }
            }
            Frame::PushPromise {
                promised_stream_id,
                block,
                end_headers,
                stream_id,
            } => {
                if end_headers {
                    self.decode_block(stream_id, BlockKind::Push, &block, state)?;
                } else {
                    self.pending = Some(PendingBlock {
                        stream_id,
                        kind: BlockKind::Push,
                        block: BytesMut::from(&block[..]),
                    });
                }
                self.write_frame(Frame::RstStream {
                    stream_id: promised_stream_id,
                    code: REFUSED_STREAM,
                })
                .await?;
            }
            Frame::Continuation {
                block, end_headers, ..
            } => {
                let mut pending = self
                    .pending
                    .take()
                    .ok_or_else(|| Error::http_protocol("CONTINUATION without HEADERS"))?;
                pending.block.extend_from_slice(&block);
                if end_headers {
                    self.decode_block(pending.stream_id, pending.kind, &pending.block, state)?;
                } else {
                    self.pending = Some(pending);
                }
            }
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_len,
            } => {
                self.conn_unacked_recv += flow_len as i64;
                if stream_id == state.id {
                    if state.status.is_none() {
                        return Err(Error::http_protocol("DATA before response headers"));
                    }
                    state.body.extend_from_slice(&data);
                    state.unacked_recv += flow_len as i64;
                    if end_stream {
                        state.done = true;
                    } else if state.unacked_recv >= self.local_stream_window / 2 {
                        let increment = state.unacked_recv as u32;
                        state.unacked_recv = 0;
                        self.write_frame(Frame::WindowUpdate {
                            stream_id,
                            increment,
                        })
                        .await?;
                    }
                }
                if self.conn_unacked_recv >= self.conn_recv_target / 2 {
                    let increment = self.conn_unacked_recv as u32;
                    self.conn_unacked_recv = 0;
                    self.write_frame(Frame::WindowUpdate {
                        stream_id: 0,
                        increment,
                    })
                    .await?;
                }
            }
            Frame::Priority { .. } | Frame::Unknown { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::http2::{PriorityFrameSpec, PriorityParam};
    use crate::transport::h2::hpack;
    use tokio::io::duplex;

    async fn read_frames(server: &mut tokio::io::DuplexStream, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            while let Some(header) = FrameHeader::parse(buf) {
                let total = FRAME_HEADER_LEN + header.length as usize;
                if buf.len() < total {
                    break;
                }
                let mut raw = buf.split_to(total).freeze();
                let payload = raw.split_off(FRAME_HEADER_LEN);
                frames.push(Frame::decode(&header, payload).unwrap());
            }
            if !frames.is_empty() {
                return frames;
            }
            server.read_buf(buf).await.unwrap();
        }
    }

    fn firefox_like() -> Http2Fingerprint {
        Http2Fingerprint {
            settings: vec![
                (SettingId::HeaderTableSize, 65536),
                (SettingId::InitialWindowSize, 131072),
                (SettingId::MaxFrameSize, 16384),
            ],
            connection_flow: 12517377,
            pseudo_header_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Path,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
            ],
            priority_frames: vec![PriorityFrameSpec {
                stream_id: 3,
                priority_param: PriorityParam {
                    stream_dep: 0,
                    exclusive: false,
                    weight: 201,
                },
            }],
            header_priority: Some(PriorityParam {
                stream_dep: 3,
                exclusive: false,
                weight: 42,
            }),
        }
    }

    #[tokio::test]
    async fn preface_and_request_follow_fingerprint() {
        let (client, mut server) = duplex(64 * 1024);
        let fp = firefox_like();

        let server_task = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            while buf.len() < PREFACE.len() {
                server.read_buf(&mut buf).await.unwrap();
            }
            assert_eq!(&buf.split_to(PREFACE.len())[..], PREFACE);

            let mut seen = Vec::new();
            let mut request_headers = None;
            while request_headers.is_none() {
                for frame in read_frames(&mut server, &mut buf).await {
                    if let Frame::Headers {
                        stream_id,
                        block,
                        priority,
                        ..
                    } = &frame
                    {
                        request_headers = Some((*stream_id, block.clone(), *priority));
                    }
                    seen.push(frame);
                }
            }
            let (stream_id, block, priority) = request_headers.unwrap();

            let mut out = BytesMut::new();
            Frame::Settings {
                ack: false,
                values: vec![(4, 1 << 20)],
            }
            .encode(&mut out);
            let mut enc = hpack::Encoder::new();
            Frame::Headers {
                stream_id,
                block: enc.encode([(":status", "200"), ("content-type", "text/plain")]),
                priority: None,
                end_stream: false,
                end_headers: true,
            }
            .encode(&mut out);
            Frame::Data {
                stream_id,
                data: Bytes::from_static(b"hello"),
                end_stream: true,
                flow_len: 5,
            }
            .encode(&mut out);
            server.write_all(&out).await.unwrap();
            (seen, stream_id, block, priority)
        });

        let mut conn = H2Connection::handshake(client, &fp).await.unwrap();
        let headers = vec![
            ("User-Agent".to_string(), "test".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
            ("TE".to_string(), "gzip".to_string()),
        ];
        let resp = conn
            .send_request(H2Request {
                method: "GET",
                scheme: "https",
                authority: "example.com",
                path: "/x",
                headers: &headers,
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], b"hello");
        assert_eq!(resp.headers, vec![("content-type".into(), "text/plain".into())]);

        let (seen, stream_id, block, priority) = server_task.await.unwrap();
        match &seen[0] {
            Frame::Settings { values, .. } => {
                assert_eq!(values, &vec![(1, 65536), (4, 131072), (5, 16384)])
            }
            other => panic!("expected SETTINGS first, got {:?}", other),
        }
        assert_eq!(
            seen[1],
            Frame::WindowUpdate {
                stream_id: 0,
                increment: 12517377
            }
        );
        assert!(matches!(seen[2], Frame::Priority { stream_id: 3, .. }));
        assert_eq!(stream_id, 5);
        assert_eq!(priority.unwrap().weight, 42);

        let decoded = hpack::Decoder::new(4096).decode(&block).unwrap();
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![":method", ":path", ":authority", ":scheme", "user-agent"]);
    }

    #[tokio::test]
    async fn reset_stream_surfaces_as_error() {
        let (client, mut server) = duplex(64 * 1024);
        let fp = Http2Fingerprint::default();
        tokio::spawn(async move {
            let mut buf = BytesMut::new();
            while buf.len() < PREFACE.len() {
                server.read_buf(&mut buf).await.unwrap();
            }
            let _ = buf.split_to(PREFACE.len());
            loop {
                let frames = read_frames(&mut server, &mut buf).await;
                if let Some(id) = frames.iter().find_map(|f| match f {
                    Frame::Headers { stream_id, .. } => Some(*stream_id),
                    _ => None,
                }) {
                    let rst = Frame::RstStream {
                        stream_id: id,
                        code: 0x2,
                    };
                    server.write_all(&rst.to_bytes()).await.unwrap();
                    break;
                }
            }
            // Keep the pipe open until the client reads the reset
            let _ = server.read_buf(&mut buf).await;
        });

        let mut conn = H2Connection::handshake(client, &fp).await.unwrap();
        let err = conn
            .send_request(H2Request {
                method: "GET",
                scheme: "https",
                authority: "example.com",
                path: "/",
                headers: &[],
                body: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("INTERNAL_ERROR"));
        assert!(!conn.is_usable());
    }
}
