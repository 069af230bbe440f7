//! TLS and HTTP/2 fingerprinting configuration.

pub mod client_hello;
pub mod http2;
pub mod ja3;
pub mod profiles;
pub mod tls;

pub use http2::{Http2Fingerprint, PriorityFrameSpec, PriorityParam, PseudoHeader, SettingId};
pub use ja3::Ja3;
pub use profiles::{ClientIdentifier, ClientProfile, CustomClient, FingerprintProfile};
pub use tls::{CertCompression, ClientHelloSpec};
