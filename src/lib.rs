//! # Wraith
//!
//! HTTP client engine that reproduces the TLS ClientHello and HTTP/2
//! connection preface of real browsers and mobile clients.
//!
//! A caller creates sessions on an [`Engine`], each bound to one
//! [`FingerprintProfile`], and sends requests described by the JSON wire
//! contract in [`wire`]. HTTP/1.1 and HTTP/2 run over BoringSSL with
//! fingerprint-shaped handshakes.

// Core modules
pub mod cookie;
pub mod error;
pub mod headers;
pub mod response;
pub mod version;

// Fingerprinting
pub mod fingerprint;

// Transport layer
pub mod transport;

// Connection reuse
pub mod pool;

// Request execution and sessions
pub mod executor;
pub mod redirect;
pub mod session;

// Caller-facing surface
pub mod engine;
pub mod wire;

// Re-exports
pub use cookie::{Cookie, CookieJar};
pub use engine::Engine;
pub use error::{Error, ErrorKind, Result};
pub use executor::{Executed, RequestOptions};
pub use fingerprint::{ClientIdentifier, ClientProfile, CustomClient, FingerprintProfile};
pub use headers::OrderedHeaders;
pub use response::Response;
pub use session::{Session, SessionConfig};
pub use version::HttpVersion;
pub use wire::{RequestPayload, WireCookie, WireResponse};
