//! JA3 string parsing and rendering.
//!
//! Format: `version,ciphers,extensions,curves,point_formats`, each list
//! dash-separated decimal. Any GREASE value is normalized to
//! [`GREASE_PLACEHOLDER`] so its position survives; rendering drops GREASE
//! again, as JA3 does.

use crate::error::{Error, Result};
use crate::fingerprint::tls::{is_grease, GREASE_PLACEHOLDER};

/// Parsed JA3 fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ja3 {
    pub version: u16,
    pub ciphers: Vec<u16>,
    pub extensions: Vec<u16>,
    pub curves: Vec<u16>,
    pub point_formats: Vec<u8>,
}

const FIELDS: [&str; 5] = ["version", "ciphers", "extensions", "curves", "point_formats"];

impl Ja3 {
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.trim().split(',').collect();
        if parts.len() != FIELDS.len() {
            return Err(Error::ja3(
                "version",
                format!("expected 5 comma-separated fields, got {}", parts.len()),
            ));
        }

        let version = parts[0]
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::ja3("version", format!("invalid number '{}'", parts[0])))?;
        if !(0x0300..=0x0304).contains(&version) {
            return Err(Error::ja3("version", format!("unknown version {}", version)));
        }

        let ciphers = parse_list(parts[1], FIELDS[1])?;
        let extensions = parse_list(parts[2], FIELDS[2])?;
        let curves = parse_list(parts[3], FIELDS[3])?;
        let point_formats = parse_list(parts[4], FIELDS[4])?
            .into_iter()
            .map(|v| {
                u8::try_from(v)
                    .map_err(|_| Error::ja3("point_formats", format!("{} out of range", v)))
            })
            .collect::<Result<Vec<u8>>>()?;

        if ciphers.is_empty() {
            return Err(Error::ja3("ciphers", "empty cipher list"));
        }

        let mut seen = Vec::with_capacity(extensions.len());
        for &e in extensions.iter().filter(|e| !is_grease(**e)) {
            if seen.contains(&e) {
                return Err(Error::ja3("extensions", format!("duplicate extension {}", e)));
            }
            seen.push(e);
        }

        Ok(Self {
            version,
            ciphers,
            extensions,
            curves,
            point_formats,
        })
    }

    /// Canonical JA3 string with GREASE values omitted.
    pub fn render(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.version,
            join(self.ciphers.iter().copied()),
            join(self.extensions.iter().copied()),
            join(self.curves.iter().copied()),
            self.point_formats
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join("-"),
        )
    }
}

fn parse_list(field: &str, name: &'static str) -> Result<Vec<u16>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field
        .split('-')
        .map(|item| {
            let value = item
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::ja3(name, format!("invalid number '{}'", item)))?;
            Ok(if is_grease(value) {
                GREASE_PLACEHOLDER
            } else {
                value
            })
        })
        .collect()
}

fn join(values: impl Iterator<Item = u16>) -> String {
    values
        .filter(|v| !is_grease(*v))
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}
