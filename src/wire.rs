//! JSON wire contract between a caller and the engine.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::cookie::Cookie;
use crate::error::{Error, Result};
use crate::executor::{Executed, RequestOptions};
use crate::fingerprint::CustomClient;
use crate::session::{header_overrides, parse_proxy, SessionConfig};

/// Cookie as exchanged with callers. `expires` is unix seconds, 0 for a session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireCookie {
    pub domain: String,
    pub expires: i64,
    pub name: String,
    pub path: String,
    pub value: String,
}

impl WireCookie {
    /// Convert, scoping a cookie without domain to `url`'s host.
    pub fn to_cookie(&self, url: &Url) -> Result<Cookie> {
        if self.name.is_empty() {
            return Err(Error::config("cookie without a name"));
        }
        if self.value.contains('"') {
            return Err(Error::config(format!(
                "cookie {} value must not contain '\"'",
                self.name
            )));
        }
        let host_only = self.domain.is_empty();
        let domain = if host_only {
            url.host_str()
                .ok_or_else(|| Error::config(format!("URL has no host: {}", url)))?
                .to_string()
        } else {
            self.domain.clone()
        };
        let mut cookie = Cookie::new(&self.name, &self.value, domain);
        cookie.host_only = host_only;
        if !self.path.is_empty() {
            cookie.path = self.path.clone();
        }
        if self.expires > 0 {
            cookie.expires = Utc.timestamp_opt(self.expires, 0).single();
        }
        Ok(cookie)
    }
}

impl From<&Cookie> for WireCookie {
    fn from(cookie: &Cookie) -> Self {
        Self {
            domain: cookie.domain.clone(),
            expires: cookie.expires.map_or(0, |t| t.timestamp()),
            name: cookie.name.clone(),
            path: cookie.path.clone(),
            value: cookie.value.clone(),
        }
    }
}

/// A request as received over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestPayload {
    pub session_id: Option<String>,
    pub tls_client_identifier: Option<String>,
    pub custom_tls_client: Option<CustomClient>,
    #[serde(rename = "withRandomTLSExtensionOrder")]
    pub with_random_tls_extension_order: bool,
    pub force_http1: bool,
    pub with_debug: bool,
    pub catch_panics: bool,
    pub follow_redirects: Option<bool>,
    pub insecure_skip_verify: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub proxy_url: Option<String>,
    pub certificate_pinning_hosts: Option<HashMap<String, Vec<String>>>,
    /// `requestBody` is base64 and the response body comes back as a data URL.
    pub is_byte_request: bool,
    pub additional_decode: Option<String>,
    pub request_url: String,
    pub request_method: String,
    pub request_body: Option<String>,
    pub request_json: Option<Value>,
    /// Form fields; an array value repeats the key.
    pub request_form: Option<Map<String, Value>>,
    /// Query parameters; an array value repeats the key.
    pub query_params: Map<String, Value>,
    pub request_cookies: Vec<WireCookie>,
    pub headers: Map<String, Value>,
    pub header_order: Vec<String>,
}

impl RequestPayload {
    /// Session configuration for a session first seen in this request.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            session_id: self.session_id.clone(),
            tls_client_identifier: self.tls_client_identifier.clone(),
            custom_tls_client: self.custom_tls_client.clone(),
            with_random_tls_extension_order: self.with_random_tls_extension_order,
            force_http1: self.force_http1,
            headers: Map::new(),
            header_order: Vec::new(),
            proxy_url: self.proxy_url.clone(),
            timeout_seconds: self.timeout_seconds,
            follow_redirects: self.follow_redirects.unwrap_or(false),
            insecure_skip_verify: self.insecure_skip_verify.unwrap_or(false),
            certificate_pinning_hosts: self.certificate_pinning_hosts.clone().unwrap_or_default(),
            with_debug: self.with_debug,
            catch_panics: self.catch_panics,
            idle_timeout_seconds: None,
        }
    }

    /// Resolve the per-request half of the payload.
    pub fn to_request(&self) -> Result<RequestOptions> {
        if self.request_url.trim().is_empty() {
            return Err(Error::missing("requestUrl"));
        }
        let url = Url::parse(self.request_url.trim())?;

        let body = match &self.request_body {
            Some(b) if self.is_byte_request => Some(Bytes::from(STANDARD.decode(b.trim())?)),
            Some(b) => Some(Bytes::from(b.clone())),
            None => None,
        };
        let cookies = self
            .request_cookies
            .iter()
            .map(|c| c.to_cookie(&url))
            .collect::<Result<Vec<_>>>()?;

        Ok(RequestOptions {
            method: self.request_method.clone(),
            url: self.request_url.clone(),
            query: pairs(&self.query_params)?,
            body,
            json: self.request_json.clone(),
            form: self.request_form.as_ref().map(pairs).transpose()?,
            headers: header_overrides(&self.headers)?,
            header_order: Some(self.header_order.clone()).filter(|o| !o.is_empty()),
            cookies,
            follow_redirects: self.follow_redirects,
            insecure_skip_verify: self.insecure_skip_verify,
            timeout: self.timeout_seconds.map(std::time::Duration::from_secs),
            proxy: parse_proxy(self.proxy_url.as_deref())?,
            pins: self.certificate_pinning_hosts.clone(),
            additional_decode: self.additional_decode.clone().filter(|d| !d.is_empty()),
            debug: self.with_debug,
        })
    }
}

/// Flatten a JSON object into pairs; arrays repeat the key.
fn pairs(map: &Map<String, Value>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    out.push((key.clone(), scalar(key, item)?));
                }
            }
            Value::Null => {}
            other => out.push((key.clone(), scalar(key, other)?)),
        }
    }
    Ok(out)
}

fn scalar(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::config(format!("{} must be a scalar, got {}", key, other))),
    }
}

/// A response, or a failure with `status` 0, as sent back over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    /// Handle to release with `freeMemory`.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    pub status: u16,
    pub target: String,
    pub headers: Map<String, Value>,
    pub body: String,
    pub cookies: Map<String, Value>,
    pub used_protocol: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<String>,
}

impl WireResponse {
    pub fn from_executed(
        id: String,
        session_id: Option<String>,
        executed: &Executed,
        byte_response: bool,
    ) -> Self {
        let response = &executed.response;
        let headers = response
            .header_multimap()
            .into_iter()
            .map(|(name, values)| {
                (name, Value::Array(values.into_iter().map(Value::String).collect()))
            })
            .collect();
        let cookies = executed
            .cookies
            .iter()
            .map(|c| (c.name.clone(), Value::String(c.value.clone())))
            .collect();
        let body = if byte_response {
            data_url(response.content_type(), &executed.body)
        } else {
            String::from_utf8_lossy(&executed.body).into_owned()
        };
        Self {
            id,
            session_id,
            status: response.status,
            target: response.url.to_string(),
            headers,
            body,
            cookies,
            used_protocol: response.http_version().as_str().to_string(),
            error_kind: None,
        }
    }

    /// Failure report: `status` 0 and the message as body.
    pub fn from_error(id: String, session_id: Option<String>, target: &str, err: &Error) -> Self {
        Self {
            id,
            session_id,
            status: 0,
            target: target.to_string(),
            body: err.to_string(),
            error_kind: Some(err.kind().as_str().to_string()),
            ..Self::default()
        }
    }
}

/// `data:<mime>;base64,<payload>`; parameters of the content type are dropped.
pub fn data_url(content_type: Option<&str>, body: &[u8]) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream");
    format!("data:{};base64,{}", mime, STANDARD.encode(body))
}

/// One line of input to the binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    Request(Box<RequestPayload>),
    CreateSession(Box<SessionConfig>),
    #[serde(rename_all = "camelCase")]
    DestroySession { session_id: String },
    DestroyAll,
    #[serde(rename_all = "camelCase")]
    FreeMemory { id: String },
    #[serde(rename_all = "camelCase")]
    GetCookiesFromSession { session_id: String, url: String },
    #[serde(rename_all = "camelCase")]
    AddCookiesToSession {
        session_id: String,
        url: String,
        cookies: Vec<WireCookie>,
    },
}

impl Command {
    /// Parse a line; a document without `action` is a request.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("action").is_none() {
            return Ok(Self::Request(Box::new(serde_json::from_value(value)?)));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Reply to any command other than a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cookies: Option<Vec<WireCookie>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(err: &Error) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().as_str().to_string()),
            ..Self::default()
        }
    }
}
