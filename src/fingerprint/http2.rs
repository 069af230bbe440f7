//! HTTP/2 fingerprint: SETTINGS order, connection window, pseudo-header
//! order and stream priorities.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The six SETTINGS parameters a profile may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
}

impl SettingId {
    pub const ALL: [SettingId; 6] = [
        Self::HeaderTableSize,
        Self::EnablePush,
        Self::MaxConcurrentStreams,
        Self::InitialWindowSize,
        Self::MaxFrameSize,
        Self::MaxHeaderListSize,
    ];

    pub fn id(&self) -> u16 {
        match self {
            Self::HeaderTableSize => 1,
            Self::EnablePush => 2,
            Self::MaxConcurrentStreams => 3,
            Self::InitialWindowSize => 4,
            Self::MaxFrameSize => 5,
            Self::MaxHeaderListSize => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::HeaderTableSize => "HEADER_TABLE_SIZE",
            Self::EnablePush => "ENABLE_PUSH",
            Self::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            Self::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            Self::MaxFrameSize => "MAX_FRAME_SIZE",
            Self::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Accepts the symbolic name (with or without `SETTINGS_`) or the numeric id.
    pub fn parse(key: &str) -> Result<Self> {
        let key = key.trim();
        if let Ok(id) = key.parse::<u16>() {
            return Self::from_id(id)
                .ok_or_else(|| Error::config(format!("unknown HTTP/2 setting id {}", id)));
        }
        let upper = key.to_ascii_uppercase();
        let name = upper.strip_prefix("SETTINGS_").unwrap_or(&upper);
        Self::ALL
            .into_iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| Error::config(format!("unknown HTTP/2 setting '{}'", key)))
    }
}

/// Pseudo-header fields sent before regular headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoHeader {
    Method,
    Authority,
    Scheme,
    Path,
}

impl PseudoHeader {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Method => ":method",
            Self::Authority => ":authority",
            Self::Scheme => ":scheme",
            Self::Path => ":path",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim() {
            ":method" | "m" => Ok(Self::Method),
            ":authority" | "a" => Ok(Self::Authority),
            ":scheme" | "s" => Ok(Self::Scheme),
            ":path" | "p" => Ok(Self::Path),
            other => Err(Error::config(format!("unknown pseudo-header '{}'", other))),
        }
    }

    fn letter(&self) -> char {
        match self {
            Self::Method => 'm',
            Self::Authority => 'a',
            Self::Scheme => 's',
            Self::Path => 'p',
        }
    }
}

/// Stream dependency and weight. `weight` is the wire value plus one (1..=256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityParam {
    pub stream_dep: u32,
    pub exclusive: bool,
    pub weight: u16,
}

impl PriorityParam {
    /// Weight as carried on the wire (0..=255).
    pub fn wire_weight(&self) -> u8 {
        self.weight.clamp(1, 256).saturating_sub(1) as u8
    }
}

/// A PRIORITY frame sent right after the connection preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityFrameSpec {
    #[serde(rename = "streamID")]
    pub stream_id: u32,
    pub priority_param: PriorityParam,
}

/// Everything that shapes the HTTP/2 side of a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http2Fingerprint {
    /// SETTINGS entries, in send order. Parameters not listed are not sent.
    pub settings: Vec<(SettingId, u32)>,
    /// Connection-level WINDOW_UPDATE increment; 0 sends none.
    pub connection_flow: u32,
    pub pseudo_header_order: Vec<PseudoHeader>,
    pub priority_frames: Vec<PriorityFrameSpec>,
    /// Priority block carried on every request HEADERS frame.
    pub header_priority: Option<PriorityParam>,
}

impl Default for Http2Fingerprint {
    fn default() -> Self {
        Self {
            settings: Vec::new(),
            connection_flow: 0,
            pseudo_header_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
                PseudoHeader::Path,
            ],
            priority_frames: Vec::new(),
            header_priority: None,
        }
    }
}

impl Http2Fingerprint {
    /// Build the ordered settings list from a keyed map and an explicit order.
    ///
    /// Keys in `order` must exist in `values`; keys only in `values` follow
    /// the ordered ones in map order.
    pub fn ordered_settings(
        values: &[(SettingId, u32)],
        order: &[SettingId],
    ) -> Result<Vec<(SettingId, u32)>> {
        let mut out = Vec::with_capacity(values.len());
        for id in order {
            if out.iter().any(|(s, _)| s == id) {
                return Err(Error::config(format!(
                    "{} listed twice in h2SettingsOrder",
                    id.name()
                )));
            }
            let value = values
                .iter()
                .find(|(s, _)| s == id)
                .map(|(_, v)| *v)
                .ok_or_else(|| {
                    Error::config(format!("{} ordered but has no value", id.name()))
                })?;
            out.push((*id, value));
        }
        for (id, value) in values {
            if !out.iter().any(|(s, _)| s == id) {
                out.push((*id, *value));
            }
        }
        Ok(out)
    }

    pub fn setting(&self, id: SettingId) -> Option<u32> {
        self.settings.iter().find(|(s, _)| *s == id).map(|(_, v)| *v)
    }

    /// Stream receive window we advertise (RFC default when unset).
    pub fn initial_window_size(&self) -> u32 {
        self.setting(SettingId::InitialWindowSize).unwrap_or(65_535)
    }

    /// Decoder table size we advertise to the peer.
    pub fn header_table_size(&self) -> u32 {
        self.setting(SettingId::HeaderTableSize).unwrap_or(4_096)
    }

    /// Akamai-style fingerprint: `settings|window|priorities|pseudo-order`.
    pub fn akamai_string(&self) -> String {
        let settings = self
            .settings
            .iter()
            .map(|(id, v)| format!("{}:{}", id.id(), v))
            .collect::<Vec<_>>()
            .join(";");
        let priorities = if self.priority_frames.is_empty() {
            "0".to_string()
        } else {
            self.priority_frames
                .iter()
                .map(|p| {
                    format!(
                        "{}:{}:{}:{}",
                        p.stream_id,
                        u8::from(p.priority_param.exclusive),
                        p.priority_param.stream_dep,
                        p.priority_param.weight
                    )
                })
                .collect::<Vec<_>>()
                .join(",")
        };
        let pseudo = self
            .pseudo_header_order
            .iter()
            .map(|p| p.letter().to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}|{}|{}|{}", settings, self.connection_flow, priorities, pseudo)
    }
}

/// Validate a pseudo-header order: each of the four exactly once.
pub fn parse_pseudo_order(names: &[String]) -> Result<Vec<PseudoHeader>> {
    let order = names
        .iter()
        .map(|n| PseudoHeader::parse(n))
        .collect::<Result<Vec<_>>>()?;
    for p in [
        PseudoHeader::Method,
        PseudoHeader::Authority,
        PseudoHeader::Scheme,
        PseudoHeader::Path,
    ] {
        if order.iter().filter(|&&o| o == p).count() != 1 {
            return Err(Error::config(format!(
                "pseudoHeaderOrder must list {} exactly once",
                p.as_str()
            )));
        }
    }
    Ok(order)
}
