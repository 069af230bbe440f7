//! HTTP/2 with full control over the connection preface.
//!
//! Unlike general-purpose stacks, every fingerprint-visible detail comes from
//! [`Http2Fingerprint`](crate::fingerprint::Http2Fingerprint): SETTINGS order
//! and values, the connection WINDOW_UPDATE, PRIORITY frames, pseudo-header
//! order and the priority block on each HEADERS frame.

pub mod connection;
pub mod frame;
pub mod hpack;

pub use connection::{H2Connection, H2Request, H2Response};
