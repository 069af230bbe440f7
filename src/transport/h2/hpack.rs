//! HPACK header compression (RFC 7541).
//!
//! The encoder indexes everything except credentials, Huffman-codes a string
//! whenever that is shorter, and emits a dynamic table size update after the
//! peer shrinks HEADER_TABLE_SIZE. The decoder enforces the size we
//! advertised.

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Size of the table both sides start with.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// Per-entry overhead counted against the table size.
const ENTRY_OVERHEAD: usize = 32;

const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// RFC 7541 Appendix B: (code, bit length) per byte value.
const HUFFMAN: [(u32, u8); 256] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28), (0xfffffe4, 28),
    (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28), (0xfffffe8, 28), (0xffffea, 24),
    (0x3ffffffc, 30), (0xfffffe9, 28), (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28),
    (0xfffffec, 28), (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28), (0xffffff4, 28),
    (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28), (0xffffff8, 28), (0xffffff9, 28),
    (0xffffffa, 28), (0xffffffb, 28), (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11), (0x3fa, 10), (0x3fb, 10), (0xf9, 8),
    (0x7fb, 11), (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6), (0x0, 5), (0x1, 5), (0x2, 5),
    (0x19, 6), (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6), (0x1e, 6), (0x1f, 6), (0x5c, 7),
    (0xfb, 8), (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10), (0x1ffa, 13), (0x21, 6),
    (0x5d, 7), (0x5e, 7), (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7), (0x63, 7), (0x64, 7),
    (0x65, 7), (0x66, 7), (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7), (0x6b, 7), (0x6c, 7),
    (0x6d, 7), (0x6e, 7), (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7), (0xfc, 8), (0x73, 7),
    (0xfd, 8), (0x1ffb, 13), (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5), (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7), (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5), (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15), (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13),
    (0xffffffc, 28), (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23), (0x3fffd6, 22),
    (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23), (0x7fffdd, 23), (0x7fffde, 23),
    (0xffffeb, 24), (0x7fffdf, 23), (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22),
    (0x7fffe0, 23), (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23), (0x3fffd9, 22),
    (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24), (0x3fffda, 22), (0x1fffdd, 21),
    (0xfffe9, 20), (0x3fffdb, 22), (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23),
    (0x1fffde, 21), (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23), (0x1fffe0, 21),
    (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21), (0x7fffed, 23), (0x3fffe1, 22),
    (0x7fffee, 23), (0x7fffef, 23), (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22),
    (0x3fffe4, 22), (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19), (0x3fffe7, 22),
    (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25), (0x3ffffe2, 26), (0x3ffffe3, 26),
    (0x3ffffe4, 26), (0x7ffffde, 27), (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24),
    (0x1ffffed, 25), (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24), (0x1fffe4, 21),
    (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26), (0xffffffd, 28), (0x7ffffe3, 27),
    (0x7ffffe4, 27), (0x7ffffe5, 27), (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20),
    (0x1fffe6, 21), (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25), (0xfffff4, 24),
    (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23), (0x3ffffeb, 26), (0x7ffffe6, 27),
    (0x3ffffec, 26), (0x3ffffed, 26), (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27),
    (0x7ffffea, 27), (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
];

const EOS: (u32, u8) = (0x3fffffff, 30);

/// Headers never added to either table.
const NEVER_INDEXED: &[&str] = &["authorization", "proxy-authorization"];

fn hpack_error(msg: impl Into<String>) -> Error {
    Error::HttpProtocol(format!("HPACK: {}", msg.into()))
}

#[derive(Debug)]
struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + ENTRY_OVERHEAD
    }

    fn evict_to(&mut self, limit: usize) {
        while self.size > limit {
            match self.entries.pop_back() {
                Some((n, v)) => self.size -= Self::entry_size(&n, &v),
                None => break,
            }
        }
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn insert(&mut self, name: String, value: String) {
        let size = Self::entry_size(&name, &value);
        if size > self.max_size {
            // An oversized entry empties the table (RFC 7541 4.4)
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.max_size - size);
        self.size += size;
        self.entries.push_front((name, value));
    }

    fn get(&self, index: usize) -> Option<&(String, String)> {
        self.entries.get(index)
    }
}

/// Resolve a 1-based HPACK index across the static and dynamic tables.
fn lookup(table: &DynamicTable, index: usize) -> Result<(String, String)> {
    if index == 0 {
        return Err(hpack_error("index 0"));
    }
    if index <= STATIC_TABLE.len() {
        let (n, v) = STATIC_TABLE[index - 1];
        return Ok((n.to_string(), v.to_string()));
    }
    table
        .get(index - STATIC_TABLE.len() - 1)
        .cloned()
        .ok_or_else(|| hpack_error(format!("index {} out of range", index)))
}

fn encode_int(out: &mut BytesMut, value: usize, prefix_bits: u8, flags: u8) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        out.put_u8(flags | value as u8);
        return;
    }
    out.put_u8(flags | max as u8);
    let mut rest = value - max;
    while rest >= 128 {
        out.put_u8((rest % 128) as u8 | 0x80);
        rest /= 128;
    }
    out.put_u8(rest as u8);
}

fn decode_int(buf: &[u8], pos: &mut usize, prefix_bits: u8) -> Result<usize> {
    let max = (1usize << prefix_bits) - 1;
    let first = *buf.get(*pos).ok_or_else(|| hpack_error("truncated integer"))?;
    *pos += 1;
    let mut value = (first as usize) & max;
    if value < max {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        let b = *buf.get(*pos).ok_or_else(|| hpack_error("truncated integer"))?;
        *pos += 1;
        if shift > 28 {
            return Err(hpack_error("integer overflow"));
        }
        value += ((b & 0x7f) as usize) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn huffman_len(data: &[u8]) -> usize {
    let bits: usize = data.iter().map(|&b| HUFFMAN[b as usize].1 as usize).sum();
    (bits + 7) / 8
}

pub fn huffman_encode(data: &[u8], out: &mut BytesMut) {
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;
    for &b in data {
        let (code, len) = HUFFMAN[b as usize];
        acc = (acc << len) | code as u64;
        bits += len as u32;
        while bits >= 8 {
            bits -= 8;
            out.put_u8((acc >> bits) as u8);
        }
    }
    if bits > 0 {
        // Pad with the most significant bits of EOS
        let pad = 8 - bits;
        out.put_u8(((acc << pad) | ((1u64 << pad) - 1)) as u8);
    }
}

fn huffman_codes() -> &'static HashMap<(u8, u32), u8> {
    static CODES: OnceLock<HashMap<(u8, u32), u8>> = OnceLock::new();
    CODES.get_or_init(|| {
        HUFFMAN
            .iter()
            .enumerate()
            .map(|(sym, &(code, len))| ((len, code), sym as u8))
            .collect()
    })
}

pub fn huffman_decode(data: &[u8]) -> Result<Vec<u8>> {
    let codes = huffman_codes();
    let mut out = Vec::with_capacity(data.len() * 8 / 5);
    let mut code: u32 = 0;
    let mut len: u8 = 0;
    for &byte in data {
        for shift in (0..8).rev() {
            code = (code << 1) | ((byte >> shift) & 1) as u32;
            len += 1;
            if let Some(&sym) = codes.get(&(len, code)) {
                out.push(sym);
                code = 0;
                len = 0;
            } else if len == EOS.1 && code == EOS.0 {
                return Err(hpack_error("EOS in Huffman string"));
            } else if len > EOS.1 {
                return Err(hpack_error("invalid Huffman code"));
            }
        }
    }
    // Leftover must be shorter than a byte and all ones
    if len > 7 || code != (1u32 << len) - 1 {
        return Err(hpack_error("invalid Huffman padding"));
    }
    Ok(out)
}

fn encode_string(out: &mut BytesMut, s: &str) {
    let raw = s.as_bytes();
    let compressed = huffman_len(raw);
    if compressed < raw.len() {
        encode_int(out, compressed, 7, 0x80);
        huffman_encode(raw, out);
    } else {
        encode_int(out, raw.len(), 7, 0);
        out.put_slice(raw);
    }
}

fn decode_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    let huffman = buf
        .get(*pos)
        .map(|b| b & 0x80 != 0)
        .ok_or_else(|| hpack_error("truncated string"))?;
    let len = decode_int(buf, pos, 7)?;
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| hpack_error("string exceeds block"))?;
    let bytes = &buf[*pos..end];
    *pos = end;
    let bytes = if huffman {
        huffman_decode(bytes)?
    } else {
        bytes.to_vec()
    };
    String::from_utf8(bytes).map_err(|_| hpack_error("header is not valid UTF-8"))
}

/// Request-side encoder.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    pending_size_update: Option<usize>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(DEFAULT_TABLE_SIZE),
            pending_size_update: None,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_max_table_size(&mut self, peer_limit: usize) {
        let size = peer_limit.min(DEFAULT_TABLE_SIZE);
        if size != self.table.max_size {
            self.table.set_max_size(size);
            self.pending_size_update = Some(size);
        }
    }

    /// Find (index, value_matches) for a header, preferring full matches.
    fn find(&self, name: &str, value: &str) -> Option<(usize, bool)> {
        let mut name_only = None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if *n == name {
                if *v == value {
                    return Some((i + 1, true));
                }
                name_only.get_or_insert(i + 1);
            }
        }
        for (i, (n, v)) in self.table.entries.iter().enumerate() {
            if n == name {
                let index = STATIC_TABLE.len() + 1 + i;
                if v == value {
                    return Some((index, true));
                }
                name_only.get_or_insert(index);
            }
        }
        name_only.map(|i| (i, false))
    }

    /// Encode a header list in the given order. Names must be lowercase.
    pub fn encode<'a>(&mut self, headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Bytes {
        let mut out = BytesMut::with_capacity(256);
        if let Some(size) = self.pending_size_update.take() {
            encode_int(&mut out, size, 5, 0x20);
        }
        for (name, value) in headers {
            if NEVER_INDEXED.contains(&name) {
                match self.find(name, value) {
                    Some((index, _)) => encode_int(&mut out, index, 4, 0x10),
                    None => {
                        out.put_u8(0x10);
                        encode_string(&mut out, name);
                    }
                }
                encode_string(&mut out, value);
                continue;
            }
            match self.find(name, value) {
                Some((index, true)) => encode_int(&mut out, index, 7, 0x80),
                Some((index, false)) => {
                    encode_int(&mut out, index, 6, 0x40);
                    encode_string(&mut out, value);
                    self.table.insert(name.to_string(), value.to_string());
                }
                None => {
                    out.put_u8(0x40);
                    encode_string(&mut out, name);
                    encode_string(&mut out, value);
                    self.table.insert(name.to_string(), value.to_string());
                }
            }
        }
        out.freeze()
    }
}

/// Response-side decoder.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Largest size the peer may switch to (what we advertised).
    limit: usize,
}

impl Decoder {
    pub fn new(limit: usize) -> Self {
        Self {
            table: DynamicTable::new(limit.min(DEFAULT_TABLE_SIZE)),
            limit,
        }
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < block.len() {
            let b = block[pos];
            if b & 0x80 != 0 {
                let index = decode_int(block, &mut pos, 7)?;
                headers.push(lookup(&self.table, index)?);
            } else if b & 0xc0 == 0x40 {
                let (name, value) = self.literal(block, &mut pos, 6)?;
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
            } else if b & 0xe0 == 0x20 {
                let size = decode_int(block, &mut pos, 5)?;
                if size > self.limit {
                    return Err(hpack_error(format!(
                        "table size update {} above limit {}",
                        size, self.limit
                    )));
                }
                self.table.set_max_size(size);
            } else {
                // Without indexing (0000) or never indexed (0001)
                headers.push(self.literal(block, &mut pos, 4)?);
            }
        }
        Ok(headers)
    }

    fn literal(&self, block: &[u8], pos: &mut usize, prefix: u8) -> Result<(String, String)> {
        let index = decode_int(block, pos, prefix)?;
        let name = if index == 0 {
            decode_string(block, pos)?
        } else {
            lookup(&self.table, index)?.0
        };
        let value = decode_string(block, pos)?;
        Ok((name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        let s: String = s.split_whitespace().collect();
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn integer_examples_from_rfc() {
        let mut out = BytesMut::new();
        encode_int(&mut out, 10, 5, 0);
        encode_int(&mut out, 1337, 5, 0);
        encode_int(&mut out, 42, 8, 0);
        assert_eq!(&out[..], &[0x0a, 0x1f, 0x9a, 0x0a, 0x2a]);

        let mut pos = 1;
        assert_eq!(decode_int(&out, &mut pos, 5).unwrap(), 1337);
        assert_eq!(pos, 4);
    }

    #[test]
    fn literal_with_indexing_c2_1() {
        let block = hex("400a 6375 7374 6f6d 2d6b 6579 0d63 7573 746f 6d2d 6865 6164 6572");
        let mut decoder = Decoder::new(DEFAULT_TABLE_SIZE);
        assert_eq!(
            decoder.decode(&block).unwrap(),
            pairs(&[("custom-key", "custom-header")])
        );
        assert_eq!(decoder.table.size, 55);
    }

    #[test]
    fn huffman_requests_c4() {
        let first = hex("8286 8441 8cf1 e3c2 e5f2 3a6b a0ab 90f4 ff");
        let second = hex("8286 84be 5886 a8eb 1064 9cbf");
        let mut decoder = Decoder::new(DEFAULT_TABLE_SIZE);
        assert_eq!(
            decoder.decode(&first).unwrap(),
            pairs(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
            ])
        );
        assert_eq!(
            decoder.decode(&second).unwrap(),
            pairs(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
                ("cache-control", "no-cache"),
            ])
        );
    }

    #[test]
    fn encoder_reproduces_c4() {
        let mut encoder = Encoder::new();
        let first = encoder.encode([
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
        ]);
        assert_eq!(&first[..], &hex("8286 8441 8cf1 e3c2 e5f2 3a6b a0ab 90f4 ff")[..]);
        let second = encoder.encode([
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
            ("cache-control", "no-cache"),
        ]);
        assert_eq!(&second[..], &hex("8286 84be 5886 a8eb 1064 9cbf")[..]);
    }

    #[test]
    fn huffman_round_trip_and_padding() {
        let mut out = BytesMut::new();
        huffman_encode(b"custom-value", &mut out);
        assert_eq!(huffman_decode(&out).unwrap(), b"custom-value");
        // 0x00 is a complete 5-bit '0' plus three zero bits of bad padding
        assert!(huffman_decode(&[0x00]).is_err());
    }

    #[test]
    fn credentials_are_never_indexed() {
        let mut encoder = Encoder::new();
        let block = encoder.encode([("authorization", "Basic Zm9vOmJhcg==")]);
        assert_eq!(block[0] & 0xf0, 0x10);
        assert!(encoder.table.entries.is_empty());

        let mut decoder = Decoder::new(DEFAULT_TABLE_SIZE);
        assert_eq!(
            decoder.decode(&block).unwrap(),
            pairs(&[("authorization", "Basic Zm9vOmJhcg==")])
        );
    }

    #[test]
    fn size_update_is_announced_and_bounded() {
        let mut encoder = Encoder::new();
        encoder.encode([("x-one", "1")]);
        encoder.set_max_table_size(0);
        let block = encoder.encode([("x-two", "2")]);
        assert_eq!(block[0], 0x20);
        assert!(encoder.table.entries.is_empty());

        let mut decoder = Decoder::new(1024);
        let mut big = BytesMut::new();
        encode_int(&mut big, 2048, 5, 0x20);
        assert!(decoder.decode(&big).is_err());
    }

    #[test]
    fn eviction_keeps_table_within_limit() {
        let mut table = DynamicTable::new(100);
        table.insert("a".repeat(20), "b".repeat(20)); // 72
        table.insert("c".into(), "d".into()); // 34
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.entries[0].0, "c");
        table.insert("x".repeat(100), String::new());
        assert!(table.entries.is_empty());
        assert_eq!(table.size, 0);
    }
}
