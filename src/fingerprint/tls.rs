//! TLS ClientHello specification.
//!
//! [`ClientHelloSpec`] is the one internal form every profile converges on:
//! named presets and custom JA3 strings are both parsed into it, and both the
//! byte-layout builder and the BoringSSL connector read from it.

use crate::error::{Error, Result};

/// Placeholder stored wherever a profile declares a GREASE value.
pub const GREASE_PLACEHOLDER: u16 = 0x0a0a;

/// The sixteen RFC 8701 GREASE values.
pub const GREASE_VALUES: [u16; 16] = [
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa,
    0xbaba, 0xcaca, 0xdada, 0xeaea, 0xfafa,
];

/// True for any of the reserved 0x?a?a values.
pub fn is_grease(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a && value >> 8 == value & 0xff
}

/// Extension ids.
pub mod ext {
    pub const SERVER_NAME: u16 = 0;
    pub const STATUS_REQUEST: u16 = 5;
    pub const SUPPORTED_GROUPS: u16 = 10;
    pub const EC_POINT_FORMATS: u16 = 11;
    pub const SIGNATURE_ALGORITHMS: u16 = 13;
    pub const ALPN: u16 = 16;
    pub const SCT: u16 = 18;
    pub const PADDING: u16 = 21;
    pub const ENCRYPT_THEN_MAC: u16 = 22;
    pub const EXTENDED_MASTER_SECRET: u16 = 23;
    pub const COMPRESS_CERTIFICATE: u16 = 27;
    pub const RECORD_SIZE_LIMIT: u16 = 28;
    pub const DELEGATED_CREDENTIALS: u16 = 34;
    pub const SESSION_TICKET: u16 = 35;
    pub const PRE_SHARED_KEY: u16 = 41;
    pub const EARLY_DATA: u16 = 42;
    pub const SUPPORTED_VERSIONS: u16 = 43;
    pub const PSK_KEY_EXCHANGE_MODES: u16 = 45;
    pub const POST_HANDSHAKE_AUTH: u16 = 49;
    pub const SIGNATURE_ALGORITHMS_CERT: u16 = 50;
    pub const KEY_SHARE: u16 = 51;
    pub const APPLICATION_SETTINGS: u16 = 17513;
    pub const ENCRYPTED_CLIENT_HELLO: u16 = 65037;
    pub const RENEGOTIATION_INFO: u16 = 65281;

    /// Every extension both the byte builder and the live BoringSSL
    /// handshake can produce.
    ///
    /// encrypt_then_mac, early_data and post_handshake_auth are absent:
    /// BoringSSL never sends them on a fresh client handshake.
    pub const SUPPORTED: &[u16] = &[
        SERVER_NAME,
        STATUS_REQUEST,
        SUPPORTED_GROUPS,
        EC_POINT_FORMATS,
        SIGNATURE_ALGORITHMS,
        ALPN,
        SCT,
        PADDING,
        EXTENDED_MASTER_SECRET,
        COMPRESS_CERTIFICATE,
        RECORD_SIZE_LIMIT,
        DELEGATED_CREDENTIALS,
        SESSION_TICKET,
        PRE_SHARED_KEY,
        SUPPORTED_VERSIONS,
        PSK_KEY_EXCHANGE_MODES,
        SIGNATURE_ALGORITHMS_CERT,
        KEY_SHARE,
        APPLICATION_SETTINGS,
        ENCRYPTED_CLIENT_HELLO,
        RENEGOTIATION_INFO,
    ];

    /// Extensions BoringSSL places itself; they are not part of its
    /// permutation table.
    pub fn is_positional(id: u16) -> bool {
        super::is_grease(id) || id == PADDING || id == PRE_SHARED_KEY
    }
}

/// record_size_limit value browsers advertise (RFC 8449).
pub const RECORD_SIZE_LIMIT: u16 = 0x4001;

/// Cipher suites we can offer: (IANA id, OpenSSL name used by BoringSSL).
///
/// The patched BoringSSL keeps TLS 1.3 suites in the order the list gives.
const CIPHER_SUITES: &[(u16, &str)] = &[
    (0x1301, "TLS_AES_128_GCM_SHA256"),
    (0x1302, "TLS_AES_256_GCM_SHA384"),
    (0x1303, "TLS_CHACHA20_POLY1305_SHA256"),
    (0xc02b, "ECDHE-ECDSA-AES128-GCM-SHA256"),
    (0xc02f, "ECDHE-RSA-AES128-GCM-SHA256"),
    (0xc02c, "ECDHE-ECDSA-AES256-GCM-SHA384"),
    (0xc030, "ECDHE-RSA-AES256-GCM-SHA384"),
    (0xcca9, "ECDHE-ECDSA-CHACHA20-POLY1305"),
    (0xcca8, "ECDHE-RSA-CHACHA20-POLY1305"),
    (0xc009, "ECDHE-ECDSA-AES128-SHA"),
    (0xc00a, "ECDHE-ECDSA-AES256-SHA"),
    (0xc013, "ECDHE-RSA-AES128-SHA"),
    (0xc014, "ECDHE-RSA-AES256-SHA"),
    (0xc023, "ECDHE-ECDSA-AES128-SHA256"),
    (0xc024, "ECDHE-ECDSA-AES256-SHA384"),
    (0xc027, "ECDHE-RSA-AES128-SHA256"),
    (0xc028, "ECDHE-RSA-AES256-SHA384"),
    (0xc008, "ECDHE-ECDSA-DES-CBC3-SHA"),
    (0xc012, "ECDHE-RSA-DES-CBC3-SHA"),
    (0x009c, "AES128-GCM-SHA256"),
    (0x009d, "AES256-GCM-SHA384"),
    (0x009e, "DHE-RSA-AES128-GCM-SHA256"),
    (0x009f, "DHE-RSA-AES256-GCM-SHA384"),
    (0x002f, "AES128-SHA"),
    (0x0035, "AES256-SHA"),
    (0x0033, "DHE-RSA-AES128-SHA"),
    (0x0039, "DHE-RSA-AES256-SHA"),
    (0x003c, "AES128-SHA256"),
    (0x003d, "AES256-SHA256"),
    (0x000a, "DES-CBC3-SHA"),
    (0x00ff, "TLS_EMPTY_RENEGOTIATION_INFO_SCSV"),
];

/// Named groups: (id, BoringSSL curve name, key share length in bytes).
const GROUPS: &[(u16, &str, usize)] = &[
    (29, "X25519", 32),
    (23, "P-256", 65),
    (24, "P-384", 97),
    (25, "P-521", 133),
    (256, "ffdhe2048", 256),
    (257, "ffdhe3072", 384),
    (0x6399, "X25519Kyber768Draft00", 1216),
    (0x11ec, "X25519MLKEM768", 1216),
];

/// Signature schemes: (id, IANA name, Go crypto/tls name).
const SIGNATURE_SCHEMES: &[(u16, &str, &str)] = &[
    (0x0403, "ecdsa_secp256r1_sha256", "ECDSAWithP256AndSHA256"),
    (0x0503, "ecdsa_secp384r1_sha384", "ECDSAWithP384AndSHA384"),
    (0x0603, "ecdsa_secp521r1_sha512", "ECDSAWithP521AndSHA512"),
    (0x0804, "rsa_pss_rsae_sha256", "PSSWithSHA256"),
    (0x0805, "rsa_pss_rsae_sha384", "PSSWithSHA384"),
    (0x0806, "rsa_pss_rsae_sha512", "PSSWithSHA512"),
    (0x0401, "rsa_pkcs1_sha256", "PKCS1WithSHA256"),
    (0x0501, "rsa_pkcs1_sha384", "PKCS1WithSHA384"),
    (0x0601, "rsa_pkcs1_sha512", "PKCS1WithSHA512"),
    (0x0201, "rsa_pkcs1_sha1", "PKCS1WithSHA1"),
    (0x0203, "ecdsa_sha1", "ECDSAWithSHA1"),
    (0x0807, "ed25519", "Ed25519"),
];

pub fn cipher_name(id: u16) -> Option<&'static str> {
    CIPHER_SUITES.iter().find(|(i, _)| *i == id).map(|(_, n)| *n)
}

pub fn group_name(id: u16) -> Option<&'static str> {
    GROUPS.iter().find(|(i, _, _)| *i == id).map(|(_, n, _)| *n)
}

pub fn key_share_len(id: u16) -> usize {
    GROUPS
        .iter()
        .find(|(i, _, _)| *i == id)
        .map(|(_, _, l)| *l)
        .unwrap_or(1)
}

pub fn signature_scheme_name(id: u16) -> Option<&'static str> {
    SIGNATURE_SCHEMES
        .iter()
        .find(|(i, _, _)| *i == id)
        .map(|(_, n, _)| *n)
}

/// Resolve a signature scheme from either its IANA or its Go name.
pub fn signature_scheme_from_name(name: &str) -> Result<u16> {
    SIGNATURE_SCHEMES
        .iter()
        .find(|(_, iana, go)| iana.eq_ignore_ascii_case(name) || go.eq_ignore_ascii_case(name))
        .map(|(id, _, _)| *id)
        .ok_or_else(|| Error::config(format!("unknown signature algorithm '{}'", name)))
}

/// Resolve a `supportedVersions` entry.
pub fn version_from_name(name: &str) -> Result<u16> {
    match name.trim() {
        n if n.eq_ignore_ascii_case("grease") => Ok(GREASE_PLACEHOLDER),
        "1.3" => Ok(0x0304),
        "1.2" => Ok(0x0303),
        "1.1" => Ok(0x0302),
        "1.0" => Ok(0x0301),
        other => Err(Error::config(format!("unknown TLS version '{}'", other))),
    }
}

/// Resolve a `keyShareCurves` entry.
pub fn key_share_from_name(name: &str) -> Result<u16> {
    let id = match name.trim().to_ascii_lowercase().as_str() {
        "grease" => GREASE_PLACEHOLDER,
        "x25519" => 29,
        "p256" | "p-256" | "secp256r1" => 23,
        "p384" | "p-384" | "secp384r1" => 24,
        "p521" | "p-521" | "secp521r1" => 25,
        "x25519kyber768" | "x25519kyber768draft00" => 0x6399,
        "x25519mlkem768" => 0x11ec,
        _ => return Err(Error::config(format!("unknown key share curve '{}'", name))),
    };
    Ok(id)
}

/// Certificate compression algorithm (RFC 8879).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertCompression {
    Zlib,
    Brotli,
    Zstd,
}

impl CertCompression {
    pub fn id(&self) -> u16 {
        match self {
            Self::Zlib => 1,
            Self::Brotli => 2,
            Self::Zstd => 3,
        }
    }

    /// Parse `certCompressionAlgo`; empty means no compression.
    pub fn from_name(name: &str) -> Result<Option<Self>> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            "zlib" => Ok(Some(Self::Zlib)),
            "brotli" => Ok(Some(Self::Brotli)),
            "zstd" => Ok(Some(Self::Zstd)),
            other => Err(Error::config(format!(
                "unknown certificate compression '{}'",
                other
            ))),
        }
    }
}

/// Complete, ordered description of a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloSpec {
    /// Legacy record version from the JA3 string (771 = TLS 1.2).
    pub tls_version: u16,
    pub cipher_suites: Vec<u16>,
    pub extensions: Vec<u16>,
    pub curves: Vec<u16>,
    pub point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub key_share_curves: Vec<u16>,
    pub delegated_credentials: Vec<u16>,
    pub cert_compression: Option<CertCompression>,
    /// Shuffle extensions on every handshake.
    pub random_extension_order: bool,
}

/// Chromium's signature algorithm list, used when a profile lists
/// signature_algorithms without naming them.
pub const DEFAULT_SIGNATURE_ALGORITHMS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
];

impl ClientHelloSpec {
    /// Reject ids we cannot reproduce instead of silently dropping them.
    pub fn validate(&self) -> Result<()> {
        if self.cipher_suites.is_empty() {
            return Err(Error::ja3("ciphers", "no cipher suites"));
        }
        for &id in &self.cipher_suites {
            if !is_grease(id) && cipher_name(id).is_none() {
                return Err(Error::UnsupportedCipher(id));
            }
        }
        for &id in &self.extensions {
            if !is_grease(id) && !ext::SUPPORTED.contains(&id) {
                return Err(Error::UnsupportedExtension(id));
            }
        }
        for &id in self.curves.iter().chain(&self.key_share_curves) {
            if !is_grease(id) && group_name(id).is_none() {
                return Err(Error::config(format!("unsupported curve {}", id)));
            }
        }
        for &id in self.signature_algorithms.iter().chain(&self.delegated_credentials) {
            if signature_scheme_name(id).is_none() {
                return Err(Error::config(format!(
                    "unsupported signature algorithm {:#06x}",
                    id
                )));
            }
        }
        if let Some(pos) = self.extensions.iter().position(|&e| e == ext::PRE_SHARED_KEY) {
            if pos + 1 != self.extensions.len() {
                return Err(Error::config("pre_shared_key must be the last extension"));
            }
        }
        self.key_shares_limit()?;
        Ok(())
    }

    /// Number of key shares BoringSSL must send.
    ///
    /// BoringSSL generates shares for the leading supported groups, so the
    /// declared key shares have to be a prefix of the curve list.
    pub fn key_shares_limit(&self) -> Result<Option<u8>> {
        if !self.has_extension(ext::KEY_SHARE) {
            return Ok(None);
        }
        let shares: Vec<u16> = self
            .key_share_curves
            .iter()
            .copied()
            .filter(|v| !is_grease(*v))
            .collect();
        let curves = self.curves.iter().copied().filter(|v| !is_grease(*v));
        if shares.is_empty() || !curves.take(shares.len()).eq(shares.iter().copied()) {
            return Err(Error::config(format!(
                "key share curves {:?} must lead the supported groups {:?}",
                self.key_share_curves, self.curves
            )));
        }
        let limit = u8::try_from(shares.len())
            .map_err(|_| Error::config("too many key share curves"))?;
        Ok(Some(limit))
    }

    /// Declared extensions BoringSSL lets us order, in declared order.
    pub fn ordered_extensions(&self) -> impl Iterator<Item = u16> + '_ {
        self.extensions
            .iter()
            .copied()
            .filter(|&id| !ext::is_positional(id))
    }

    pub fn has_extension(&self, id: u16) -> bool {
        self.extensions.contains(&id)
    }

    /// Whether any GREASE marker is declared.
    pub fn uses_grease(&self) -> bool {
        self.cipher_suites
            .iter()
            .chain(&self.extensions)
            .chain(&self.curves)
            .any(|&v| is_grease(v))
    }

    /// Highest and lowest real protocol versions offered.
    pub fn version_range(&self) -> (u16, u16) {
        let real: Vec<u16> = self
            .supported_versions
            .iter()
            .copied()
            .filter(|v| !is_grease(*v))
            .collect();
        if real.is_empty() {
            return (self.tls_version, self.tls_version);
        }
        let min = real.iter().copied().min().unwrap_or(self.tls_version);
        let max = real.iter().copied().max().unwrap_or(self.tls_version);
        (min, max)
    }

    /// Cipher string for BoringSSL in declared order, TLS 1.3 suites included.
    pub fn boring_cipher_list(&self) -> String {
        self.cipher_suites
            .iter()
            .filter(|&&id| !is_grease(id) && id != 0x00ff)
            .filter_map(|&id| cipher_name(id))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Curve list for BoringSSL in declared order.
    pub fn boring_curves(&self) -> String {
        self.curves
            .iter()
            .filter(|&&id| !is_grease(id))
            .filter_map(|&id| group_name(id))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn boring_sigalgs(&self) -> String {
        join_sigalgs(&self.signature_algorithms)
    }

    pub fn boring_delegated_credentials(&self) -> String {
        join_sigalgs(&self.delegated_credentials)
    }
}

fn join_sigalgs(ids: &[u16]) -> String {
    ids.iter()
        .filter_map(|&id| signature_scheme_name(id))
        .collect::<Vec<_>>()
        .join(":")
}
