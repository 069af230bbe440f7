//! Session configuration and per-session state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cookie::CookieJar;
use crate::error::{Error, Result};
use crate::fingerprint::{ClientProfile, CustomClient, FingerprintProfile};
use crate::headers::OrderedHeaders;
use crate::pool::ConnectionPool;
use crate::transport::{PinSet, Proxy, TlsSessions};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 90;

/// Everything a session is created from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Requested id; one is generated when absent.
    pub session_id: Option<String>,
    pub tls_client_identifier: Option<String>,
    pub custom_tls_client: Option<CustomClient>,
    #[serde(rename = "withRandomTLSExtensionOrder")]
    pub with_random_tls_extension_order: bool,
    pub force_http1: bool,
    /// Default headers; order of first appearance is kept.
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub header_order: Vec<String>,
    pub proxy_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub follow_redirects: bool,
    pub insecure_skip_verify: bool,
    pub certificate_pinning_hosts: HashMap<String, Vec<String>>,
    pub with_debug: bool,
    pub catch_panics: bool,
    pub idle_timeout_seconds: Option<u64>,
}

/// Convert a JSON header map to overrides: a string sets, null or "" deletes.
pub fn header_overrides(
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(String, Option<String>)>> {
    map.iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) if s.is_empty() => None,
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::Bool(b) => Some(b.to_string()),
                other => {
                    return Err(Error::config(format!(
                        "header {} must be a string, got {}",
                        name, other
                    )))
                }
            };
            Ok((name.clone(), value))
        })
        .collect()
}

/// Parse an optional proxy URL; blank means none.
pub fn parse_proxy(raw: Option<&str>) -> Result<Option<Proxy>> {
    match raw.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => Proxy::parse(p).map(Some),
        None => Ok(None),
    }
}

/// Live state of one session. Only touched under the session's lock.
pub struct Session {
    id: String,
    pub(crate) profile: Arc<FingerprintProfile>,
    pub(crate) force_http1: bool,
    pub(crate) headers: OrderedHeaders,
    pub(crate) header_order: Vec<String>,
    pub(crate) jar: CookieJar,
    pub(crate) proxy: Option<Proxy>,
    pub(crate) timeout: Duration,
    pub(crate) follow_redirects: bool,
    pub(crate) insecure_skip_verify: bool,
    pub(crate) pins: Arc<PinSet>,
    pub(crate) debug: bool,
    pub(crate) catch_panics: bool,
    pub(crate) pool: ConnectionPool,
    pub(crate) tls_sessions: TlsSessions,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("profile", &self.profile.name)
            .field("proxy", &self.proxy)
            .field("cookies", &self.jar.len())
            .field("pool", &self.pool.stats())
            .finish()
    }
}

impl Session {
    /// Resolve the profile and defaults. Fails before any network I/O.
    pub fn new(id: impl Into<String>, config: &SessionConfig) -> Result<Self> {
        let id = id.into();
        let profile = ClientProfile::resolve(
            config.tls_client_identifier.as_deref(),
            config.custom_tls_client.as_ref(),
        )?
        .fingerprint(config.with_random_tls_extension_order)?;

        let headers = if config.headers.is_empty() {
            OrderedHeaders::session_defaults()
        } else {
            OrderedHeaders::new().merged_with(
                header_overrides(&config.headers)?
                    .iter()
                    .map(|(n, v)| (n.as_str(), v.as_deref())),
            )
        };

        let session = Self {
            profile: Arc::new(profile),
            force_http1: config.force_http1,
            headers,
            header_order: config.header_order.clone(),
            jar: CookieJar::new(),
            proxy: parse_proxy(config.proxy_url.as_deref())?,
            timeout: Duration::from_secs(config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            follow_redirects: config.follow_redirects,
            insecure_skip_verify: config.insecure_skip_verify,
            pins: Arc::new(PinSet::new(config.certificate_pinning_hosts.clone())),
            debug: config.with_debug,
            catch_panics: config.catch_panics,
            pool: ConnectionPool::new(Duration::from_secs(
                config
                    .idle_timeout_seconds
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            )),
            tls_sessions: TlsSessions::default(),
            id,
        };
        debug!(session = %session.id, profile = %session.profile.name, "Session created");
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &FingerprintProfile {
        &self.profile
    }

    pub fn headers(&self) -> &OrderedHeaders {
        &self.headers
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.jar
    }

    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.jar
    }

    pub fn catch_panics(&self) -> bool {
        self.catch_panics
    }

    /// Drop every pooled connection.
    pub fn close(&mut self) -> usize {
        self.tls_sessions.clear();
        let closed = self.pool.clear();
        debug!(session = %self.id, closed, "Session connections closed");
        closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> SessionConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn defaults_apply_without_configuration() {
        let s = Session::new("s1", &SessionConfig::default()).unwrap();
        assert_eq!(s.profile().name, "chrome_120");
        assert_eq!(s.timeout, Duration::from_secs(30));
        assert!(!s.follow_redirects);
        assert_eq!(s.headers().get("accept"), Some("*/*"));
        assert!(s.headers().get("user-agent").unwrap().starts_with("wraith/"));
    }

    #[test]
    fn configured_headers_replace_defaults_and_keep_order() {
        let cfg = config(json!({
            "tlsClientIdentifier": "firefox_120",
            "headers": {"User-Agent": "ua", "content-type": "a", "Content-Type": "b", "X-Drop": null},
            "timeoutSeconds": 5,
            "followRedirects": true,
        }));
        let s = Session::new("s2", &cfg).unwrap();
        let wire: Vec<_> = s.headers().iter().collect();
        assert_eq!(wire, vec![("User-Agent", "ua"), ("content-type", "b")]);
        assert_eq!(s.timeout, Duration::from_secs(5));
        assert!(s.follow_redirects);
        assert_eq!(s.profile().name, "firefox_120");
    }

    #[test]
    fn ambiguous_profile_is_rejected() {
        let cfg = config(json!({
            "tlsClientIdentifier": "chrome_120",
            "customTlsClient": {"ja3String": "771,4865,0,29,0"},
        }));
        let err = Session::new("s3", &cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn bad_proxy_is_a_configuration_error() {
        let cfg = config(json!({"proxyUrl": "gopher://x:1"}));
        assert!(matches!(Session::new("s4", &cfg), Err(Error::Configuration(_))));
        assert!(parse_proxy(Some("  ")).unwrap().is_none());
    }

    #[test]
    fn header_values_must_be_scalars() {
        let map = json!({"A": "1", "B": 2, "C": null, "D": ""});
        let overrides = header_overrides(map.as_object().unwrap()).unwrap();
        assert_eq!(
            overrides,
            vec![
                ("A".to_string(), Some("1".to_string())),
                ("B".to_string(), Some("2".to_string())),
                ("C".to_string(), None),
                ("D".to_string(), None),
            ]
        );
        let bad = json!({"A": ["x"]});
        assert!(header_overrides(bad.as_object().unwrap()).is_err());
    }
}
