//! Wire transports.
//!
//! - TCP, HTTP(S) CONNECT and SOCKS5 dialing
//! - BoringSSL handshakes shaped by the profile
//! - HTTP/1.1 framing by hand, HTTP/2 over our own frame codec and HPACK

pub mod connector;
pub mod h1;
pub mod h2;
pub mod pinning;
pub mod proxy;

pub use connector::{ConnectOptions, Connector, MaybeHttpsStream, TlsSessions};
pub use pinning::PinSet;
pub use proxy::Proxy;
