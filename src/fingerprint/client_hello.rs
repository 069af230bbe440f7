//! ClientHello byte layout.
//!
//! Serializes a [`ClientHelloSpec`] into a complete TLS record so the declared
//! cipher, extension and group order can be checked byte for byte. The
//! connector logs this layout under `withDebug`; the live handshake itself is
//! driven by BoringSSL from the same spec.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::fingerprint::tls::{
    ext, is_grease, key_share_len, ClientHelloSpec, GREASE_PLACEHOLDER, GREASE_VALUES,
    RECORD_SIZE_LIMIT,
};

/// Per-handshake random material.
#[derive(Debug, Clone)]
pub struct HelloRandom {
    pub client_random: [u8; 32],
    pub session_id: [u8; 32],
    /// GREASE picks for ciphers, groups, extensions and versions.
    pub grease: [u16; 4],
    /// Seed for extension shuffling.
    pub shuffle_seed: u64,
}

impl HelloRandom {
    /// Fresh entropy from the OS.
    pub fn generate() -> Result<Self> {
        let mut buf = [0u8; 64 + 4 + 8];
        getrandom::getrandom(&mut buf)
            .map_err(|e| Error::tls(format!("Failed to gather entropy: {}", e)))?;
        let mut client_random = [0u8; 32];
        let mut session_id = [0u8; 32];
        client_random.copy_from_slice(&buf[..32]);
        session_id.copy_from_slice(&buf[32..64]);
        let grease = [
            GREASE_VALUES[(buf[64] & 0x0f) as usize],
            GREASE_VALUES[(buf[65] & 0x0f) as usize],
            GREASE_VALUES[(buf[66] & 0x0f) as usize],
            GREASE_VALUES[(buf[67] & 0x0f) as usize],
        ];
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&buf[68..76]);
        Ok(Self {
            client_random,
            session_id,
            grease,
            shuffle_seed: u64::from_le_bytes(seed),
        })
    }

    /// Deterministic material for reproducible layouts.
    pub fn fixed() -> Self {
        Self {
            client_random: [0u8; 32],
            session_id: [0u8; 32],
            grease: [GREASE_PLACEHOLDER; 4],
            shuffle_seed: 0x5eed,
        }
    }

    fn cipher_grease(&self) -> u16 {
        self.grease[0]
    }

    fn group_grease(&self) -> u16 {
        self.grease[1]
    }

    fn extension_grease(&self, occurrence: usize) -> u16 {
        // Two GREASE extensions must differ
        if occurrence == 0 {
            self.grease[2]
        } else {
            self.grease[2] ^ 0x1010
        }
    }

    fn version_grease(&self) -> u16 {
        self.grease[3]
    }
}

/// Extension order for one handshake.
///
/// With random order enabled, every extension except GREASE markers, padding
/// and pre_shared_key is permuted; those keep their declared slots.
pub fn extension_order(spec: &ClientHelloSpec, seed: u64) -> Vec<u16> {
    let mut order = spec.extensions.clone();
    if !spec.random_extension_order {
        return order;
    }
    let movable: Vec<usize> = order
        .iter()
        .enumerate()
        .filter(|(_, &e)| !ext::is_positional(e))
        .map(|(i, _)| i)
        .collect();
    let mut values: Vec<u16> = movable.iter().map(|&i| order[i]).collect();

    // xorshift64*; only needs to be unpredictable enough to vary per handshake
    let mut state = seed | 1;
    for i in (1..values.len()).rev() {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        let r = state.wrapping_mul(0x2545_f491_4f6c_dd1d);
        let j = (r % (i as u64 + 1)) as usize;
        values.swap(i, j);
    }
    for (slot, value) in movable.into_iter().zip(values) {
        order[slot] = value;
    }
    order
}

/// Build the full ClientHello record.
pub fn build(
    spec: &ClientHelloSpec,
    server_name: &str,
    alpn: &[&[u8]],
    random: &HelloRandom,
) -> Result<Vec<u8>> {
    spec.validate()?;
    let order = extension_order(spec, random.shuffle_seed);

    // Extension bodies first so padding can be sized against the rest
    let mut bodies: Vec<(u16, Vec<u8>)> = Vec::with_capacity(order.len());
    let mut grease_seen = 0;
    for &id in &order {
        if is_grease(id) {
            let value = random.extension_grease(grease_seen);
            // Chrome sends the trailing GREASE extension with a single zero byte
            let body = if grease_seen == 0 { Vec::new() } else { vec![0] };
            grease_seen += 1;
            bodies.push((value, body));
        } else {
            bodies.push((id, extension_body(spec, id, server_name, alpn, random)));
        }
    }

    let fixed_len = 2 + 32 + 1 + 32 + 2 + spec.cipher_suites.len() * 2 + 2 + 2;
    let ext_len: usize = bodies
        .iter()
        .filter(|(id, _)| *id != ext::PADDING)
        .map(|(_, b)| 4 + b.len())
        .sum();
    if let Some(slot) = bodies.iter_mut().find(|(id, _)| *id == ext::PADDING) {
        slot.1 = vec![0u8; padding_len(4 + fixed_len + ext_len + 4)];
    }

    let mut hello = BytesMut::with_capacity(512);
    hello.put_u16(0x0303);
    hello.put_slice(&random.client_random);
    hello.put_u8(32);
    hello.put_slice(&random.session_id);

    hello.put_u16((spec.cipher_suites.len() * 2) as u16);
    for &c in &spec.cipher_suites {
        hello.put_u16(if is_grease(c) { random.cipher_grease() } else { c });
    }
    // compression: null only
    hello.put_u8(1);
    hello.put_u8(0);

    let ext_start = hello.len();
    hello.put_u16(0);
    for (id, body) in &bodies {
        hello.put_u16(*id);
        hello.put_u16(body.len() as u16);
        hello.put_slice(body);
    }
    let ext_total = (hello.len() - ext_start - 2) as u16;
    hello[ext_start..ext_start + 2].copy_from_slice(&ext_total.to_be_bytes());

    let mut record = BytesMut::with_capacity(hello.len() + 9);
    record.put_u8(0x16);
    // Record layer version stays 1.0 for compatibility
    record.put_u16(0x0301);
    record.put_u16((hello.len() + 4) as u16);
    record.put_u8(0x01);
    let len = hello.len() as u32;
    record.put_slice(&len.to_be_bytes()[1..]);
    record.put_slice(&hello);
    Ok(record.to_vec())
}

/// BoringSSL's rule: pad handshakes between 256 and 511 bytes up to 512.
fn padding_len(unpadded: usize) -> usize {
    if unpadded > 0xff && unpadded < 0x200 {
        (0x200 - unpadded).max(1)
    } else {
        0
    }
}

fn extension_body(
    spec: &ClientHelloSpec,
    id: u16,
    server_name: &str,
    alpn: &[&[u8]],
    random: &HelloRandom,
) -> Vec<u8> {
    let mut b = BytesMut::new();
    match id {
        ext::SERVER_NAME => {
            let name = server_name.as_bytes();
            b.put_u16((name.len() + 3) as u16);
            b.put_u8(0);
            b.put_u16(name.len() as u16);
            b.put_slice(name);
        }
        ext::STATUS_REQUEST => {
            // OCSP, empty responder list and extensions
            b.put_u8(1);
            b.put_u16(0);
            b.put_u16(0);
        }
        ext::SUPPORTED_GROUPS => {
            b.put_u16((spec.curves.len() * 2) as u16);
            for &g in &spec.curves {
                b.put_u16(if is_grease(g) { random.group_grease() } else { g });
            }
        }
        ext::EC_POINT_FORMATS => {
            b.put_u8(spec.point_formats.len() as u8);
            b.put_slice(&spec.point_formats);
        }
        ext::SIGNATURE_ALGORITHMS | ext::SIGNATURE_ALGORITHMS_CERT => {
            b.put_u16((spec.signature_algorithms.len() * 2) as u16);
            for &s in &spec.signature_algorithms {
                b.put_u16(s);
            }
        }
        ext::DELEGATED_CREDENTIALS => {
            b.put_u16((spec.delegated_credentials.len() * 2) as u16);
            for &s in &spec.delegated_credentials {
                b.put_u16(s);
            }
        }
        ext::ALPN | ext::APPLICATION_SETTINGS => {
            let total: usize = alpn.iter().map(|p| p.len() + 1).sum();
            b.put_u16(total as u16);
            for proto in alpn {
                b.put_u8(proto.len() as u8);
                b.put_slice(proto);
            }
        }
        ext::COMPRESS_CERTIFICATE => {
            if let Some(alg) = spec.cert_compression {
                b.put_u8(2);
                b.put_u16(alg.id());
            }
        }
        ext::RECORD_SIZE_LIMIT => b.put_u16(RECORD_SIZE_LIMIT),
        ext::SUPPORTED_VERSIONS => {
            b.put_u8((spec.supported_versions.len() * 2) as u8);
            for &v in &spec.supported_versions {
                b.put_u16(if is_grease(v) { random.version_grease() } else { v });
            }
        }
        ext::PSK_KEY_EXCHANGE_MODES => {
            // psk_dhe_ke
            b.put_u8(1);
            b.put_u8(1);
        }
        ext::KEY_SHARE => {
            let mut shares = BytesMut::new();
            for &g in &spec.key_share_curves {
                if is_grease(g) {
                    shares.put_u16(random.group_grease());
                    shares.put_u16(1);
                    shares.put_u8(0);
                } else {
                    let len = key_share_len(g);
                    shares.put_u16(g);
                    shares.put_u16(len as u16);
                    // Placeholder key material; only the layout matters here
                    shares.extend(std::iter::repeat(0x42).take(len));
                }
            }
            b.put_u16(shares.len() as u16);
            b.put_slice(&shares);
        }
        ext::RENEGOTIATION_INFO => b.put_u8(0),
        ext::ENCRYPTED_CLIENT_HELLO => {
            // GREASE ECH: outer, HPKE X25519/HKDF-SHA256/AES-128-GCM
            b.put_u8(0);
            b.put_u16(0x0001);
            b.put_u16(0x0001);
            b.put_u8(random.client_random[0]);
            b.put_u16(32);
            b.put_slice(&random.session_id);
            b.put_u16(144);
            b.extend(std::iter::repeat(0).take(144));
        }
        // Empty-bodied: SCT, extended_master_secret, session_ticket,
        // pre_shared_key
        _ => {}
    }
    b.to_vec()
}

/// Walk a ClientHello record and pull out the ordered lists.
///
/// Used to check layouts; not a general TLS parser.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedHello {
    pub cipher_suites: Vec<u16>,
    pub extensions: Vec<u16>,
    pub curves: Vec<u16>,
    pub point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub alpn: Vec<Vec<u8>>,
}

pub fn parse(record: &[u8]) -> Result<ParsedHello> {
    let bad = || Error::tls("truncated ClientHello");
    let mut r = Reader { buf: record, pos: 0 };
    if r.u8().ok_or_else(bad)? != 0x16 {
        return Err(Error::tls("not a handshake record"));
    }
    r.skip(4).ok_or_else(bad)?;
    if r.u8().ok_or_else(bad)? != 0x01 {
        return Err(Error::tls("not a ClientHello"));
    }
    r.skip(3 + 2 + 32).ok_or_else(bad)?;
    let sid_len = r.u8().ok_or_else(bad)? as usize;
    r.skip(sid_len).ok_or_else(bad)?;

    let mut out = ParsedHello::default();
    let cs_len = r.u16().ok_or_else(bad)? as usize;
    for _ in 0..cs_len / 2 {
        out.cipher_suites.push(r.u16().ok_or_else(bad)?);
    }
    let comp_len = r.u8().ok_or_else(bad)? as usize;
    r.skip(comp_len).ok_or_else(bad)?;

    let ext_total = r.u16().ok_or_else(bad)? as usize;
    let end = r.pos + ext_total;
    while r.pos < end {
        let id = r.u16().ok_or_else(bad)?;
        let len = r.u16().ok_or_else(bad)? as usize;
        let body = r.take(len).ok_or_else(bad)?;
        out.extensions.push(id);
        let mut b = Reader { buf: body, pos: 0 };
        match id {
            ext::SUPPORTED_GROUPS => {
                let n = b.u16().ok_or_else(bad)? as usize / 2;
                for _ in 0..n {
                    out.curves.push(b.u16().ok_or_else(bad)?);
                }
            }
            ext::EC_POINT_FORMATS => {
                let n = b.u8().ok_or_else(bad)? as usize;
                out.point_formats = b.take(n).ok_or_else(bad)?.to_vec();
            }
            ext::SIGNATURE_ALGORITHMS => {
                let n = b.u16().ok_or_else(bad)? as usize / 2;
                for _ in 0..n {
                    out.signature_algorithms.push(b.u16().ok_or_else(bad)?);
                }
            }
            ext::SUPPORTED_VERSIONS => {
                let n = b.u8().ok_or_else(bad)? as usize / 2;
                for _ in 0..n {
                    out.supported_versions.push(b.u16().ok_or_else(bad)?);
                }
            }
            ext::ALPN => {
                b.skip(2).ok_or_else(bad)?;
                while b.pos < body.len() {
                    let n = b.u8().ok_or_else(bad)? as usize;
                    out.alpn.push(b.take(n).ok_or_else(bad)?.to_vec());
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(slice)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }
}
