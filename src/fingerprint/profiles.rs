//! Client profile registry.
//!
//! Every named preset is declared as a JA3 string plus the fields JA3 does
//! not capture, and goes through the same parser as a caller-supplied
//! `customTlsClient`. Both paths end in one [`FingerprintProfile`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::http2::{
    parse_pseudo_order, Http2Fingerprint, PriorityFrameSpec, PriorityParam, PseudoHeader,
    SettingId,
};
use super::ja3::Ja3;
use super::tls::{
    ext, is_grease, key_share_from_name, signature_scheme_from_name, version_from_name,
    CertCompression, ClientHelloSpec, DEFAULT_SIGNATURE_ALGORITHMS, GREASE_PLACEHOLDER,
};
use crate::error::{Error, Result};

/// Fully resolved fingerprint used by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintProfile {
    /// Identifier name, or `custom`.
    pub name: String,
    pub tls: ClientHelloSpec,
    pub http2: Http2Fingerprint,
}

impl FingerprintProfile {
    /// JA3 rendering of the TLS half (GREASE omitted).
    pub fn ja3_string(&self) -> String {
        Ja3 {
            version: self.tls.tls_version,
            ciphers: self.tls.cipher_suites.clone(),
            extensions: self.tls.extensions.clone(),
            curves: self.tls.curves.clone(),
            point_formats: self.tls.point_formats.clone(),
        }
        .render()
    }
}

/// Fields a ClientHello needs beyond what JA3 records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsExtras {
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub key_share_curves: Vec<u16>,
    pub delegated_credentials: Vec<u16>,
    pub cert_compression: Option<CertCompression>,
    pub random_extension_order: bool,
}

/// Parse a JA3 string and complete it with `extras`.
///
/// Extensions whose payload JA3 does not describe get Chromium-like defaults
/// when the extras leave them empty.
pub fn tls_spec_from_ja3(ja3: &str, extras: TlsExtras) -> Result<ClientHelloSpec> {
    let parsed = Ja3::parse(ja3)?;
    let has = |id: u16| parsed.extensions.contains(&id);
    let grease = parsed.extensions.iter().any(|e| is_grease(*e));

    let mut spec = ClientHelloSpec {
        tls_version: parsed.version,
        cipher_suites: parsed.ciphers,
        extensions: parsed.extensions.clone(),
        curves: parsed.curves,
        point_formats: parsed.point_formats,
        signature_algorithms: extras.signature_algorithms,
        supported_versions: extras.supported_versions,
        key_share_curves: extras.key_share_curves,
        delegated_credentials: extras.delegated_credentials,
        cert_compression: extras.cert_compression,
        random_extension_order: extras.random_extension_order,
    };

    if has(ext::SIGNATURE_ALGORITHMS) && spec.signature_algorithms.is_empty() {
        spec.signature_algorithms = DEFAULT_SIGNATURE_ALGORITHMS.to_vec();
    }
    if has(ext::SUPPORTED_VERSIONS) && spec.supported_versions.is_empty() {
        if grease {
            spec.supported_versions.push(GREASE_PLACEHOLDER);
        }
        spec.supported_versions.extend([0x0304, 0x0303]);
    }
    if has(ext::KEY_SHARE) && spec.key_share_curves.is_empty() {
        if grease {
            spec.key_share_curves.push(GREASE_PLACEHOLDER);
        }
        if let Some(&first) = spec.curves.iter().find(|c| !is_grease(**c)) {
            spec.key_share_curves.push(first);
        }
    }
    if has(ext::DELEGATED_CREDENTIALS) && spec.delegated_credentials.is_empty() {
        spec.delegated_credentials = vec![0x0403, 0x0503, 0x0603, 0x0203];
    }
    if !has(ext::COMPRESS_CERTIFICATE) {
        spec.cert_compression = None;
    } else if spec.cert_compression.is_none() {
        spec.cert_compression = Some(CertCompression::Brotli);
    }

    spec.validate()?;
    Ok(spec)
}

macro_rules! client_identifiers {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Named client presets.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ClientIdentifier {
            $($variant,)*
        }

        impl ClientIdentifier {
            pub const ALL: &'static [ClientIdentifier] = &[$(Self::$variant,)*];

            /// Canonical identifier string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }
        }
    };
}

client_identifiers! {
    Chrome103 => "chrome_103",
    Chrome104 => "chrome_104",
    Chrome105 => "chrome_105",
    Chrome106 => "chrome_106",
    Chrome107 => "chrome_107",
    Chrome108 => "chrome_108",
    Chrome109 => "chrome_109",
    Chrome110 => "chrome_110",
    Chrome111 => "chrome_111",
    Chrome112 => "chrome_112",
    Chrome116Psk => "chrome_116_PSK",
    Chrome116PskPq => "chrome_116_PSK_PQ",
    Chrome117 => "chrome_117",
    Chrome120 => "chrome_120",
    Safari15_6_1 => "safari_15_6_1",
    Safari16_0 => "safari_16_0",
    SafariIos15_5 => "safari_ios_15_5",
    SafariIos15_6 => "safari_ios_15_6",
    SafariIos16_0 => "safari_ios_16_0",
    Firefox102 => "firefox_102",
    Firefox104 => "firefox_104",
    Firefox105 => "firefox_105",
    Firefox106 => "firefox_106",
    Firefox108 => "firefox_108",
    Firefox110 => "firefox_110",
    Firefox117 => "firefox_117",
    Firefox120 => "firefox_120",
    Opera89 => "opera_89",
    Opera90 => "opera_90",
    Opera91 => "opera_91",
    OkHttp4Android7 => "okhttp4_android_7",
    OkHttp4Android8 => "okhttp4_android_8",
    OkHttp4Android9 => "okhttp4_android_9",
    OkHttp4Android10 => "okhttp4_android_10",
    OkHttp4Android11 => "okhttp4_android_11",
    OkHttp4Android12 => "okhttp4_android_12",
    OkHttp4Android13 => "okhttp4_android_13",
    ZalandoIosMobile => "zalando_ios_mobile",
    ZalandoAndroidMobile => "zalando_android_mobile",
    NikeIosMobile => "nike_ios_mobile",
    NikeAndroidMobile => "nike_android_mobile",
    MmsIos => "mms_ios",
    MmsIos2 => "mms_ios_2",
    MmsIos3 => "mms_ios_3",
    MeshIos => "mesh_ios",
    MeshIos2 => "mesh_ios_2",
    MeshAndroid => "mesh_android",
    MeshAndroid2 => "mesh_android_2",
    ConfirmedIos => "confirmed_ios",
    ConfirmedAndroid => "confirmed_android",
    ConfirmedAndroid2 => "confirmed_android_2",
}

impl Default for ClientIdentifier {
    fn default() -> Self {
        Self::Chrome120
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientIdentifier {
    type Err = Error;

    /// Case-insensitive; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str().to_ascii_lowercase() == wanted)
            .ok_or_else(|| Error::UnknownProfile(s.to_string()))
    }
}

/// Static description of a preset.
struct Preset {
    ja3: &'static str,
    signature_algorithms: &'static [u16],
    supported_versions: &'static [u16],
    key_shares: &'static [u16],
    delegated: &'static [u16],
    cert_compression: Option<CertCompression>,
    shuffle: bool,
    h2: H2Preset,
}

struct H2Preset {
    settings: &'static [(SettingId, u32)],
    flow: u32,
    pseudo: [PseudoHeader; 4],
    priority_frames: &'static [PriorityFrameSpec],
    header_priority: Option<PriorityParam>,
}

const G: u16 = GREASE_PLACEHOLDER;
use PseudoHeader::{Authority as A, Method as M, Path as P, Scheme as S};
use SettingId::*;

const CHROME_JA3: &str = "771,2570-4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,2570-0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513-2570-21,2570-29-23-24,0";
const CHROME_PSK_JA3: &str = "771,2570-4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,2570-0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513-2570-21-41,2570-29-23-24,0";
const CHROME_PSK_PQ_JA3: &str = "771,2570-4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,2570-0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513-2570-21-41,2570-25497-29-23-24,0";
const CHROME_ECH_JA3: &str = "771,2570-4865-4866-4867-49195-49199-49196-49200-52393-52392-49171-49172-156-157-47-53,2570-0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513-65037-2570-21,2570-29-23-24,0";
const FIREFOX_JA3: &str = "771,4865-4867-4866-49195-49199-52393-52392-49196-49200-49162-49161-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-34-51-43-13-45-28-21,29-23-24-25-256-257,0";
const FIREFOX_ECH_JA3: &str = "771,4865-4867-4866-49195-49199-52393-52392-49196-49200-49162-49161-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-34-51-43-13-45-28-65037,29-23-24-25-256-257,0";
const SAFARI_JA3: &str = "771,2570-4865-4866-4867-49196-49195-52393-49200-49199-52392-49162-49161-49172-49171-157-156-53-47-49160-49170-10,2570-0-23-65281-10-11-16-5-13-18-51-45-43-27-2570-21,2570-29-23-24-25,0";
const OKHTTP_LEGACY_JA3: &str = "771,49195-49196-52393-49199-49200-52392-49171-49172-156-157-47-53,65281-0-23-35-13-5-16-11-10,29-23-24,0";
const OKHTTP_JA3: &str = "771,4865-4866-4867-49195-49196-52393-49199-49200-52392-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-13-51-45-43-21,29-23-24,0";

const CHROME_SIGALGS: &[u16] = DEFAULT_SIGNATURE_ALGORITHMS;
const FIREFOX_SIGALGS: &[u16] = &[
    0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
];
const SAFARI_SIGALGS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0203, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
];
const OKHTTP_SIGALGS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
];

const CHROME_H2_LEGACY: &[(SettingId, u32)] = &[
    (HeaderTableSize, 65536),
    (MaxConcurrentStreams, 1000),
    (InitialWindowSize, 6291456),
    (MaxHeaderListSize, 262144),
];
const CHROME_H2: &[(SettingId, u32)] = &[
    (HeaderTableSize, 65536),
    (EnablePush, 0),
    (InitialWindowSize, 6291456),
    (MaxHeaderListSize, 262144),
];
const FIREFOX_H2_LEGACY: &[(SettingId, u32)] = &[
    (HeaderTableSize, 65536),
    (InitialWindowSize, 131072),
    (MaxFrameSize, 16384),
];
const FIREFOX_H2: &[(SettingId, u32)] = &[
    (HeaderTableSize, 65536),
    (EnablePush, 0),
    (InitialWindowSize, 131072),
    (MaxFrameSize, 16384),
];
const SAFARI_H2: &[(SettingId, u32)] = &[(InitialWindowSize, 4194304), (MaxConcurrentStreams, 100)];
const SAFARI_IOS_H2: &[(SettingId, u32)] =
    &[(InitialWindowSize, 2097152), (MaxConcurrentStreams, 100)];
const IOS_APP_H2: &[(SettingId, u32)] = &[
    (EnablePush, 0),
    (InitialWindowSize, 2097152),
    (MaxConcurrentStreams, 100),
];
const OKHTTP_H2: &[(SettingId, u32)] = &[(InitialWindowSize, 16777216)];

const fn prio(stream_id: u32, stream_dep: u32, weight: u16) -> PriorityFrameSpec {
    PriorityFrameSpec {
        stream_id,
        priority_param: PriorityParam {
            stream_dep,
            exclusive: false,
            weight,
        },
    }
}

const FIREFOX_PRIORITY_FRAMES: &[PriorityFrameSpec] = &[
    prio(3, 0, 201),
    prio(5, 0, 101),
    prio(7, 0, 1),
    prio(9, 7, 1),
    prio(11, 3, 1),
    prio(13, 0, 241),
];

const CHROME_HEADER_PRIORITY: PriorityParam = PriorityParam {
    stream_dep: 0,
    exclusive: true,
    weight: 256,
};

const fn chrome_h2(settings: &'static [(SettingId, u32)]) -> H2Preset {
    H2Preset {
        settings,
        flow: 15663105,
        pseudo: [M, A, S, P],
        priority_frames: &[],
        header_priority: Some(CHROME_HEADER_PRIORITY),
    }
}

const fn chrome(ja3: &'static str, shuffle: bool, h2: H2Preset) -> Preset {
    Preset {
        ja3,
        signature_algorithms: CHROME_SIGALGS,
        supported_versions: &[G, 0x0304, 0x0303],
        key_shares: &[G, 29],
        delegated: &[],
        cert_compression: Some(CertCompression::Brotli),
        shuffle,
        h2,
    }
}

const fn firefox(ja3: &'static str, h2: H2Preset) -> Preset {
    Preset {
        ja3,
        signature_algorithms: FIREFOX_SIGALGS,
        supported_versions: &[0x0304, 0x0303],
        key_shares: &[29, 23],
        delegated: &[0x0403, 0x0503, 0x0603, 0x0203],
        cert_compression: None,
        shuffle: false,
        h2,
    }
}

const fn safari(h2: H2Preset) -> Preset {
    Preset {
        ja3: SAFARI_JA3,
        signature_algorithms: SAFARI_SIGALGS,
        supported_versions: &[G, 0x0304, 0x0303, 0x0302, 0x0301],
        key_shares: &[G, 29],
        delegated: &[],
        cert_compression: Some(CertCompression::Zlib),
        shuffle: false,
        h2,
    }
}

const fn safari_h2(settings: &'static [(SettingId, u32)], flow: u32, weight: u16) -> H2Preset {
    H2Preset {
        settings,
        flow,
        pseudo: [M, S, P, A],
        priority_frames: &[],
        header_priority: Some(PriorityParam {
            stream_dep: 0,
            exclusive: false,
            weight,
        }),
    }
}

const fn okhttp(ja3: &'static str) -> Preset {
    Preset {
        ja3,
        signature_algorithms: OKHTTP_SIGALGS,
        supported_versions: &[0x0304, 0x0303],
        key_shares: &[29],
        delegated: &[],
        cert_compression: None,
        shuffle: false,
        h2: H2Preset {
            settings: OKHTTP_H2,
            flow: 16711681,
            pseudo: [M, P, A, S],
            priority_frames: &[],
            header_priority: None,
        },
    }
}

impl ClientIdentifier {
    fn preset(&self) -> Preset {
        use ClientIdentifier::*;
        match self {
            Chrome103 | Chrome104 | Chrome105 => chrome(CHROME_JA3, false, chrome_h2(CHROME_H2_LEGACY)),
            Chrome106 | Chrome107 | Chrome108 | Chrome109 | Opera89 | Opera90 | Opera91 => {
                chrome(CHROME_JA3, false, chrome_h2(CHROME_H2))
            }
            Chrome110 | Chrome111 | Chrome112 | Chrome117 => {
                chrome(CHROME_JA3, true, chrome_h2(CHROME_H2))
            }
            Chrome116Psk => chrome(CHROME_PSK_JA3, true, chrome_h2(CHROME_H2)),
            Chrome116PskPq => Preset {
                key_shares: &[G, 0x6399, 29],
                ..chrome(CHROME_PSK_PQ_JA3, true, chrome_h2(CHROME_H2))
            },
            Chrome120 => chrome(CHROME_ECH_JA3, true, chrome_h2(CHROME_H2)),
            Firefox102 | Firefox104 | Firefox105 | Firefox106 | Firefox108 | Firefox110 => firefox(
                FIREFOX_JA3,
                H2Preset {
                    settings: FIREFOX_H2_LEGACY,
                    flow: 12517377,
                    pseudo: [M, P, A, S],
                    priority_frames: FIREFOX_PRIORITY_FRAMES,
                    header_priority: Some(PriorityParam {
                        stream_dep: 13,
                        exclusive: false,
                        weight: 42,
                    }),
                },
            ),
            Firefox117 | Firefox120 => firefox(
                FIREFOX_ECH_JA3,
                H2Preset {
                    settings: FIREFOX_H2,
                    flow: 12517377,
                    pseudo: [M, P, A, S],
                    priority_frames: &[],
                    header_priority: Some(PriorityParam {
                        stream_dep: 0,
                        exclusive: false,
                        weight: 42,
                    }),
                },
            ),
            Safari15_6_1 | Safari16_0 => safari(safari_h2(SAFARI_H2, 10485760, 255)),
            SafariIos15_5 | SafariIos15_6 | SafariIos16_0 => {
                safari(safari_h2(SAFARI_IOS_H2, 10485760, 255))
            }
            ZalandoIosMobile | NikeIosMobile | MmsIos | MmsIos2 | MmsIos3 | MeshIos | MeshIos2
            | ConfirmedIos => safari(safari_h2(IOS_APP_H2, 15663105, 256)),
            OkHttp4Android7 | OkHttp4Android8 => okhttp(OKHTTP_LEGACY_JA3),
            OkHttp4Android9 | OkHttp4Android10 | OkHttp4Android11 | OkHttp4Android12
            | OkHttp4Android13 | ZalandoAndroidMobile | NikeAndroidMobile | MeshAndroid
            | MeshAndroid2 | ConfirmedAndroid | ConfirmedAndroid2 => okhttp(OKHTTP_JA3),
        }
    }

    /// JA3 string this preset is declared with (GREASE markers included).
    pub fn ja3(&self) -> &'static str {
        self.preset().ja3
    }

    /// Resolve the preset into a full profile.
    pub fn profile(&self) -> Result<FingerprintProfile> {
        let preset = self.preset();
        let tls = tls_spec_from_ja3(
            preset.ja3,
            TlsExtras {
                signature_algorithms: preset.signature_algorithms.to_vec(),
                supported_versions: preset.supported_versions.to_vec(),
                key_share_curves: preset.key_shares.to_vec(),
                delegated_credentials: preset.delegated.to_vec(),
                cert_compression: preset.cert_compression,
                random_extension_order: preset.shuffle,
            },
        )?;
        let http2 = Http2Fingerprint {
            settings: preset.h2.settings.to_vec(),
            connection_flow: preset.h2.flow,
            pseudo_header_order: preset.h2.pseudo.to_vec(),
            priority_frames: preset.h2.priority_frames.to_vec(),
            header_priority: preset.h2.header_priority,
        };
        Ok(FingerprintProfile {
            name: self.as_str().to_string(),
            tls,
            http2,
        })
    }
}

/// Caller-supplied fingerprint (`customTlsClient` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomClient {
    pub ja3_string: String,
    /// Setting name or id to value, in caller order.
    pub h2_settings: serde_json::Map<String, serde_json::Value>,
    pub h2_settings_order: Vec<String>,
    pub pseudo_header_order: Vec<String>,
    pub connection_flow: u32,
    pub priority_frames: Vec<PriorityFrameSpec>,
    pub header_priority: Option<PriorityParam>,
    pub cert_compression_algo: String,
    pub supported_versions: Vec<String>,
    pub supported_signature_algorithms: Vec<String>,
    pub supported_delegated_credentials_algorithms: Vec<String>,
    pub key_share_curves: Vec<String>,
}

impl CustomClient {
    pub fn to_profile(&self) -> Result<FingerprintProfile> {
        if self.ja3_string.trim().is_empty() {
            return Err(Error::ja3("version", "empty JA3 string"));
        }

        let names = |list: &[String], f: fn(&str) -> Result<u16>| -> Result<Vec<u16>> {
            list.iter().map(|n| f(n)).collect()
        };
        let extras = TlsExtras {
            signature_algorithms: names(
                &self.supported_signature_algorithms,
                signature_scheme_from_name,
            )?,
            supported_versions: names(&self.supported_versions, version_from_name)?,
            key_share_curves: names(&self.key_share_curves, key_share_from_name)?,
            delegated_credentials: names(
                &self.supported_delegated_credentials_algorithms,
                signature_scheme_from_name,
            )?,
            cert_compression: CertCompression::from_name(&self.cert_compression_algo)?,
            random_extension_order: false,
        };
        let tls = tls_spec_from_ja3(&self.ja3_string, extras)?;

        let mut values = Vec::with_capacity(self.h2_settings.len());
        for (key, value) in &self.h2_settings {
            let id = SettingId::parse(key)?;
            let value = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::config(format!("h2 setting {} must be a u32", key)))?;
            values.push((id, value));
        }
        let order = self
            .h2_settings_order
            .iter()
            .map(|k| SettingId::parse(k))
            .collect::<Result<Vec<_>>>()?;

        let pseudo_header_order = if self.pseudo_header_order.is_empty() {
            Http2Fingerprint::default().pseudo_header_order
        } else {
            parse_pseudo_order(&self.pseudo_header_order)?
        };

        Ok(FingerprintProfile {
            name: "custom".to_string(),
            tls,
            http2: Http2Fingerprint {
                settings: Http2Fingerprint::ordered_settings(&values, &order)?,
                connection_flow: self.connection_flow,
                pseudo_header_order,
                priority_frames: self.priority_frames.clone(),
                header_priority: self.header_priority,
            },
        })
    }
}

/// Which fingerprint a session uses: exactly one of named or custom.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientProfile {
    Named(ClientIdentifier),
    Custom(Box<CustomClient>),
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self::Named(ClientIdentifier::default())
    }
}

impl ClientProfile {
    /// Select a profile from the two mutually exclusive wire fields.
    pub fn resolve(identifier: Option<&str>, custom: Option<&CustomClient>) -> Result<Self> {
        let identifier = identifier.map(str::trim).filter(|s| !s.is_empty());
        match (identifier, custom) {
            (Some(id), Some(_)) => Err(Error::config(format!(
                "both tlsClientIdentifier '{}' and customTlsClient were given",
                id
            ))),
            (Some(id), None) => Ok(Self::Named(id.parse()?)),
            (None, Some(custom)) => Ok(Self::Custom(Box::new(custom.clone()))),
            (None, None) => Ok(Self::default()),
        }
    }

    /// Build the fingerprint; `random_order` forces extension shuffling on.
    pub fn fingerprint(&self, random_order: bool) -> Result<FingerprintProfile> {
        let mut profile = match self {
            Self::Named(id) => id.profile()?,
            Self::Custom(custom) => custom.to_profile()?,
        };
        profile.tls.random_extension_order |= random_order;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_resolves() {
        for id in ClientIdentifier::ALL {
            let profile = id.profile().unwrap_or_else(|e| panic!("{}: {}", id, e));
            assert_eq!(profile.name, id.as_str());
            assert!(!profile.tls.cipher_suites.is_empty());
            assert_eq!(profile.http2.pseudo_header_order.len(), 4);
            assert_eq!(id.as_str().parse::<ClientIdentifier>().unwrap(), *id);
        }
    }

    #[test]
    fn identifier_parsing_is_lenient_on_case_and_dashes() {
        assert_eq!(
            "Chrome-120".parse::<ClientIdentifier>().unwrap(),
            ClientIdentifier::Chrome120
        );
        assert_eq!(
            "chrome_116_psk".parse::<ClientIdentifier>().unwrap(),
            ClientIdentifier::Chrome116Psk
        );
        match "chrome_999".parse::<ClientIdentifier>() {
            Err(Error::UnknownProfile(name)) => assert_eq!(name, "chrome_999"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ja3_path_converges_with_named_path() {
        let named = ClientIdentifier::Chrome120.profile().unwrap();
        let mut custom = CustomClient {
            ja3_string: ClientIdentifier::Chrome120.ja3().to_string(),
            supported_signature_algorithms: vec![
                "ECDSAWithP256AndSHA256".into(),
                "PSSWithSHA256".into(),
                "PKCS1WithSHA256".into(),
                "ECDSAWithP384AndSHA384".into(),
                "PSSWithSHA384".into(),
                "PKCS1WithSHA384".into(),
                "PSSWithSHA512".into(),
                "PKCS1WithSHA512".into(),
            ],
            supported_versions: vec!["GREASE".into(), "1.3".into(), "1.2".into()],
            key_share_curves: vec!["GREASE".into(), "X25519".into()],
            cert_compression_algo: "brotli".into(),
            h2_settings_order: vec![
                "HEADER_TABLE_SIZE".into(),
                "ENABLE_PUSH".into(),
                "INITIAL_WINDOW_SIZE".into(),
                "MAX_HEADER_LIST_SIZE".into(),
            ],
            pseudo_header_order: vec![
                ":method".into(),
                ":authority".into(),
                ":scheme".into(),
                ":path".into(),
            ],
            connection_flow: 15663105,
            header_priority: Some(PriorityParam {
                stream_dep: 0,
                exclusive: true,
                weight: 256,
            }),
            ..Default::default()
        };
        for (k, v) in [
            ("HEADER_TABLE_SIZE", 65536),
            ("ENABLE_PUSH", 0),
            ("INITIAL_WINDOW_SIZE", 6291456),
            ("MAX_HEADER_LIST_SIZE", 262144),
        ] {
            custom.h2_settings.insert(k.into(), v.into());
        }

        let resolved = ClientProfile::resolve(None, Some(&custom))
            .unwrap()
            .fingerprint(true)
            .unwrap();
        assert_eq!(resolved.tls, named.tls);
        assert_eq!(resolved.http2, named.http2);
        assert_eq!(resolved.ja3_string(), named.ja3_string());
    }

    #[test]
    fn plain_ja3_matches_firefox_preset() {
        let named = ClientIdentifier::Firefox110.profile().unwrap();
        let custom = CustomClient {
            ja3_string: "771,4865-4867-4866-49195-49199-52393-52392-49196-49200-49162-49161-49171-49172-156-157-47-53,0-23-65281-10-11-35-16-5-34-51-43-13-45-28-21,29-23-24-25-256-257,0".into(),
            ..Default::default()
        };
        let tls = custom.to_profile().unwrap().tls;
        assert_eq!(tls.cipher_suites, named.tls.cipher_suites);
        assert_eq!(tls.extensions, named.tls.extensions);
        assert_eq!(tls.curves, named.tls.curves);
        assert_eq!(named.ja3_string(), custom.ja3_string);
    }

    #[test]
    fn resolve_rejects_both_and_defaults_to_chrome() {
        let custom = CustomClient::default();
        assert!(matches!(
            ClientProfile::resolve(Some("chrome_120"), Some(&custom)),
            Err(Error::Configuration(_))
        ));
        assert_eq!(
            ClientProfile::resolve(None, None).unwrap(),
            ClientProfile::Named(ClientIdentifier::Chrome120)
        );
        assert_eq!(
            ClientProfile::resolve(Some(" "), None).unwrap(),
            ClientProfile::default()
        );
    }

    #[test]
    fn custom_errors_surface() {
        let bad_cipher = CustomClient {
            ja3_string: "771,4865-4660,0-10,29,0".into(),
            ..Default::default()
        };
        assert!(matches!(
            bad_cipher.to_profile(),
            Err(Error::UnsupportedCipher(4660))
        ));

        let bad_ext = CustomClient {
            ja3_string: "771,4865,0-12345,29,0".into(),
            ..Default::default()
        };
        assert!(matches!(
            bad_ext.to_profile(),
            Err(Error::UnsupportedExtension(12345))
        ));

        let mut bad_setting = CustomClient {
            ja3_string: "771,4865,0,29,0".into(),
            ..Default::default()
        };
        bad_setting
            .h2_settings
            .insert("WINDOW_MAGIC".into(), 1.into());
        assert!(bad_setting.to_profile().is_err());
    }

    #[test]
    fn custom_settings_only_send_what_was_declared() {
        let mut custom = CustomClient {
            ja3_string: "771,4865,0-43-51,29,0".into(),
            h2_settings_order: vec!["MAX_HEADER_LIST_SIZE".into(), "1".into()],
            ..Default::default()
        };
        custom.h2_settings.insert("HEADER_TABLE_SIZE".into(), 65536.into());
        custom.h2_settings.insert("MAX_HEADER_LIST_SIZE".into(), 262144.into());
        let profile = custom.to_profile().unwrap();
        assert_eq!(
            profile.http2.settings,
            vec![
                (SettingId::MaxHeaderListSize, 262144),
                (SettingId::HeaderTableSize, 65536)
            ]
        );
        assert_eq!(profile.tls.supported_versions, vec![0x0304, 0x0303]);
        assert_eq!(profile.tls.key_share_curves, vec![29]);
    }

    #[test]
    fn wire_shape_of_custom_client() {
        let custom: CustomClient = serde_json::from_str(
            r#"{
                "ja3String": "771,4865,0,29,0",
                "h2Settings": {"INITIAL_WINDOW_SIZE": 6291456, "HEADER_TABLE_SIZE": 65536},
                "priorityFrames": [{"streamID": 3, "priorityParam": {"streamDep": 0, "exclusive": false, "weight": 201}}],
                "headerPriority": {"streamDep": 0, "exclusive": true, "weight": 256},
                "certCompressionAlgo": "zlib"
            }"#,
        )
        .unwrap();
        assert_eq!(custom.priority_frames[0].stream_id, 3);
        let keys: Vec<_> = custom.h2_settings.keys().cloned().collect();
        assert_eq!(keys, vec!["INITIAL_WINDOW_SIZE", "HEADER_TABLE_SIZE"]);
        let profile = custom.to_profile().unwrap();
        assert_eq!(profile.http2.settings[0].0, SettingId::InitialWindowSize);
        assert_eq!(profile.tls.cert_compression, None);
    }
}
