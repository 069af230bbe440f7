//! Public-key pinning checked right after the TLS handshake.

use std::collections::HashMap;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use boring::ssl::SslRef;
use boring::x509::X509Ref;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Host → accepted base64 SHA-256 SPKI hashes.
///
/// A pinned host also covers its subdomains; `*.example.com` is accepted as
/// a spelling of the same rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinSet {
    hosts: HashMap<String, Vec<String>>,
}

impl PinSet {
    pub fn new(map: HashMap<String, Vec<String>>) -> Self {
        let hosts = map
            .into_iter()
            .map(|(host, pins)| {
                let host = host.trim().trim_start_matches("*.").to_ascii_lowercase();
                let pins = pins
                    .into_iter()
                    .map(|p| p.trim().trim_start_matches("sha256/").to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                (host, pins)
            })
            .collect();
        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Pins that apply to `host`, most specific rule first.
    pub fn pins_for(&self, host: &str) -> Option<&[String]> {
        let host = host.to_ascii_lowercase();
        let mut candidate = host.as_str();
        loop {
            if let Some(pins) = self.hosts.get(candidate) {
                return Some(pins);
            }
            candidate = candidate.split_once('.')?.1;
        }
    }

    /// Verify the peer chain of an established session.
    pub fn verify(&self, host: &str, ssl: &SslRef) -> Result<()> {
        let Some(pins) = self.pins_for(host) else {
            return Ok(());
        };

        let mut seen = Vec::new();
        if let Some(chain) = ssl.peer_cert_chain() {
            for cert in chain {
                seen.push(spki_hash(cert)?);
            }
        }
        if seen.is_empty() {
            if let Some(leaf) = ssl.peer_certificate() {
                seen.push(spki_hash(&leaf)?);
            }
        }

        if seen.iter().any(|h| pins.contains(h)) {
            debug!(host, "Certificate pin matched");
            Ok(())
        } else {
            debug!(host, chain = ?seen, "No certificate in chain matches pins");
            Err(Error::Pinning {
                host: host.to_string(),
            })
        }
    }
}

/// base64(SHA-256(SubjectPublicKeyInfo DER)).
pub fn spki_hash(cert: &X509Ref) -> Result<String> {
    let key = cert
        .public_key()
        .map_err(|e| Error::tls(format!("Failed to read certificate key: {}", e)))?;
    let der = key
        .public_key_to_der()
        .map_err(|e| Error::tls(format!("Failed to encode certificate key: {}", e)))?;
    Ok(BASE64_STANDARD.encode(Sha256::digest(&der)))
}
