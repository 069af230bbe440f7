//! HTTP/2 frame codec (RFC 9113 section 4 and 6).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::fingerprint::http2::PriorityParam;

pub const FRAME_HEADER_LEN: usize = 9;

pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Client connection preface.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for Kind {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<Kind> for u8 {
    fn from(kind: Kind) -> u8 {
        match kind {
            Kind::Data => 0x0,
            Kind::Headers => 0x1,
            Kind::Priority => 0x2,
            Kind::RstStream => 0x3,
            Kind::Settings => 0x4,
            Kind::PushPromise => 0x5,
            Kind::Ping => 0x6,
            Kind::GoAway => 0x7,
            Kind::WindowUpdate => 0x8,
            Kind::Continuation => 0x9,
            Kind::Unknown(v) => v,
        }
    }
}

/// Readable name for an RST_STREAM / GOAWAY error code.
pub fn error_code_name(code: u32) -> &'static str {
    match code {
        0x0 => "NO_ERROR",
        0x1 => "PROTOCOL_ERROR",
        0x2 => "INTERNAL_ERROR",
        0x3 => "FLOW_CONTROL_ERROR",
        0x4 => "SETTINGS_TIMEOUT",
        0x5 => "STREAM_CLOSED",
        0x6 => "FRAME_SIZE_ERROR",
        0x7 => "REFUSED_STREAM",
        0x8 => "CANCEL",
        0x9 => "COMPRESSION_ERROR",
        0xa => "CONNECT_ERROR",
        0xb => "ENHANCE_YOUR_CALM",
        0xc => "INADEQUATE_SECURITY",
        0xd => "HTTP_1_1_REQUIRED",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: Kind,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        // The reserved bit is ignored on receipt
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        Some(Self {
            length,
            kind: Kind::from(buf[3]),
            flags: buf[4],
            stream_id,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_slice(&self.length.to_be_bytes()[1..]);
        out.put_u8(self.kind.into());
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7fff_ffff);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Bytes counted against flow control, padding included.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        block: Bytes,
        priority: Option<PriorityParam>,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
        param: PriorityParam,
    },
    RstStream {
        stream_id: u32,
        code: u32,
    },
    Settings {
        ack: bool,
        values: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        code: u32,
        debug: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Unknown {
        kind: u8,
        stream_id: u32,
    },
}

fn put_priority(out: &mut BytesMut, p: &PriorityParam) {
    let dep = if p.exclusive {
        p.stream_dep | 0x8000_0000
    } else {
        p.stream_dep & 0x7fff_ffff
    };
    out.put_u32(dep);
    out.put_u8(p.wire_weight());
}

fn get_priority(payload: &mut Bytes) -> PriorityParam {
    let raw = payload.get_u32();
    PriorityParam {
        stream_dep: raw & 0x7fff_ffff,
        exclusive: raw & 0x8000_0000 != 0,
        weight: payload.get_u8() as u16 + 1,
    }
}

fn frame_error(kind: &str, msg: &str) -> Error {
    Error::HttpProtocol(format!("invalid {} frame: {}", kind, msg))
}

/// Strip PADDED framing; returns the unpadded payload.
fn unpad(flags_byte: u8, mut payload: Bytes, kind: &str) -> Result<Bytes> {
    if flags_byte & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(frame_error(kind, "missing pad length"));
    }
    let pad = payload.get_u8() as usize;
    if pad > payload.len() {
        return Err(frame_error(kind, "padding exceeds payload"));
    }
    payload.truncate(payload.len() - pad);
    Ok(payload)
}

impl Frame {
    /// Append the serialized frame to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        let mut payload = BytesMut::new();
        let (kind, flags_byte, stream_id) = match self {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                ..
            } => {
                payload.put_slice(data);
                let f = if *end_stream { flags::END_STREAM } else { 0 };
                (Kind::Data, f, *stream_id)
            }
            Frame::Headers {
                stream_id,
                block,
                priority,
                end_stream,
                end_headers,
            } => {
                let mut f = 0;
                if *end_stream {
                    f |= flags::END_STREAM;
                }
                if *end_headers {
                    f |= flags::END_HEADERS;
                }
                if let Some(p) = priority {
                    f |= flags::PRIORITY;
                    put_priority(&mut payload, p);
                }
                payload.put_slice(block);
                (Kind::Headers, f, *stream_id)
            }
            Frame::Priority { stream_id, param } => {
                put_priority(&mut payload, param);
                (Kind::Priority, 0, *stream_id)
            }
            Frame::RstStream { stream_id, code } => {
                payload.put_u32(*code);
                (Kind::RstStream, 0, *stream_id)
            }
            Frame::Settings { ack, values } => {
                if !*ack {
                    for (id, value) in values {
                        payload.put_u16(*id);
                        payload.put_u32(*value);
                    }
                }
                (Kind::Settings, if *ack { flags::ACK } else { 0 }, 0)
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                block,
                end_headers,
            } => {
                payload.put_u32(*promised_stream_id);
                payload.put_slice(block);
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                (Kind::PushPromise, f, *stream_id)
            }
            Frame::Ping { ack, payload: data } => {
                payload.put_slice(data);
                (Kind::Ping, if *ack { flags::ACK } else { 0 }, 0)
            }
            Frame::GoAway {
                last_stream_id,
                code,
                debug,
            } => {
                payload.put_u32(*last_stream_id & 0x7fff_ffff);
                payload.put_u32(*code);
                payload.put_slice(debug);
                (Kind::GoAway, 0, 0)
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                payload.put_u32(*increment & 0x7fff_ffff);
                (Kind::WindowUpdate, 0, *stream_id)
            }
            Frame::Continuation {
                stream_id,
                block,
                end_headers,
            } => {
                payload.put_slice(block);
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                (Kind::Continuation, f, *stream_id)
            }
            Frame::Unknown { kind, stream_id } => (Kind::Unknown(*kind), 0, *stream_id),
        };

        FrameHeader {
            length: payload.len() as u32,
            kind,
            flags: flags_byte,
            stream_id,
        }
        .encode(out);
        out.put_slice(&payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.freeze()
    }

    /// Decode one frame from its header and full payload.
    pub fn decode(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        let sid = header.stream_id;
        let f = header.flags;
        let require_stream = |name: &str| {
            if sid == 0 {
                Err(frame_error(name, "stream id 0"))
            } else {
                Ok(())
            }
        };

        let frame = match header.kind {
            Kind::Data => {
                require_stream("DATA")?;
                let flow_len = payload.len() as u32;
                let data = unpad(f, payload, "DATA")?;
                Frame::Data {
                    stream_id: sid,
                    data,
                    end_stream: f & flags::END_STREAM != 0,
                    flow_len,
                }
            }
            Kind::Headers => {
                require_stream("HEADERS")?;
                let mut block = unpad(f, payload, "HEADERS")?;
                let priority = if f & flags::PRIORITY != 0 {
                    if block.len() < 5 {
                        return Err(frame_error("HEADERS", "short priority block"));
                    }
                    Some(get_priority(&mut block))
                } else {
                    None
                };
                Frame::Headers {
                    stream_id: sid,
                    block,
                    priority,
                    end_stream: f & flags::END_STREAM != 0,
                    end_headers: f & flags::END_HEADERS != 0,
                }
            }
            Kind::Priority => {
                require_stream("PRIORITY")?;
                let mut payload = payload;
                if payload.len() != 5 {
                    return Err(frame_error("PRIORITY", "length must be 5"));
                }
                Frame::Priority {
                    stream_id: sid,
                    param: get_priority(&mut payload),
                }
            }
            Kind::RstStream => {
                require_stream("RST_STREAM")?;
                let mut payload = payload;
                if payload.len() != 4 {
                    return Err(frame_error("RST_STREAM", "length must be 4"));
                }
                Frame::RstStream {
                    stream_id: sid,
                    code: payload.get_u32(),
                }
            }
            Kind::Settings => {
                if sid != 0 {
                    return Err(frame_error("SETTINGS", "non-zero stream id"));
                }
                let ack = f & flags::ACK != 0;
                if ack && !payload.is_empty() {
                    return Err(frame_error("SETTINGS", "ACK with payload"));
                }
                if payload.len() % 6 != 0 {
                    return Err(frame_error("SETTINGS", "length not a multiple of 6"));
                }
                let mut payload = payload;
                let mut values = Vec::with_capacity(payload.len() / 6);
                while payload.has_remaining() {
                    values.push((payload.get_u16(), payload.get_u32()));
                }
                Frame::Settings { ack, values }
            }
            Kind::PushPromise => {
                let mut block = unpad(f, payload, "PUSH_PROMISE")?;
                if block.len() < 4 {
                    return Err(frame_error("PUSH_PROMISE", "too short"));
                }
                let promised_stream_id = block.get_u32() & 0x7fff_ffff;
                Frame::PushPromise {
                    stream_id: sid,
                    promised_stream_id,
                    block,
                    end_headers: f & flags::END_HEADERS != 0,
                }
            }
            Kind::Ping => {
                if payload.len() != 8 {
                    return Err(frame_error("PING", "length must be 8"));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Frame::Ping {
                    ack: f & flags::ACK != 0,
                    payload: data,
                }
            }
            Kind::GoAway => {
                let mut payload = payload;
                if payload.len() < 8 {
                    return Err(frame_error("GOAWAY", "too short"));
                }
                Frame::GoAway {
                    last_stream_id: payload.get_u32() & 0x7fff_ffff,
                    code: payload.get_u32(),
                    debug: payload,
                }
            }
            Kind::WindowUpdate => {
                let mut payload = payload;
                if payload.len() != 4 {
                    return Err(frame_error("WINDOW_UPDATE", "length must be 4"));
                }
                let increment = payload.get_u32() & 0x7fff_ffff;
                if increment == 0 {
                    return Err(frame_error("WINDOW_UPDATE", "zero increment"));
                }
                Frame::WindowUpdate {
                    stream_id: sid,
                    increment,
                }
            }
            Kind::Continuation => {
                require_stream("CONTINUATION")?;
                Frame::Continuation {
                    stream_id: sid,
                    block: payload,
                    end_headers: f & flags::END_HEADERS != 0,
                }
            }
            Kind::Unknown(kind) => Frame::Unknown {
                kind,
                stream_id: sid,
            },
        };
        Ok(frame)
    }
}
