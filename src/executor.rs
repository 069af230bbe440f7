//! Request execution.
//!
//! A request is resolved against its session (query, body, headers,
//! cookies), dispatched over a pooled or fresh connection, and redirects are
//! followed when enabled. The whole exchange, redirects included, runs under
//! one deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tracing::{debug, info};
use url::Url;

use crate::cookie::{Cookie, CookieJar};
use crate::error::{Error, Result};
use crate::headers::OrderedHeaders;
use crate::pool::{Connection, ConnectionPool, Outgoing, PoolKey};
use crate::redirect::RedirectChain;
use crate::response::Response;
use crate::session::Session;
use crate::transport::{h1, ConnectOptions, Connector, PinSet, Proxy};

/// One request, before it is resolved against a session.
///
/// `None` fields fall back to the session's defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: String,
    pub url: String,
    /// Appended to the URL's query; repeated keys are kept.
    pub query: Vec<(String, String)>,
    /// Raw body, sent untyped.
    pub body: Option<Bytes>,
    pub json: Option<serde_json::Value>,
    pub form: Option<Vec<(String, String)>>,
    /// `None` values delete the session default of that name.
    pub headers: Vec<(String, Option<String>)>,
    pub header_order: Option<Vec<String>>,
    pub cookies: Vec<Cookie>,
    pub follow_redirects: Option<bool>,
    pub insecure_skip_verify: Option<bool>,
    pub timeout: Option<Duration>,
    pub proxy: Option<Proxy>,
    pub pins: Option<HashMap<String, Vec<String>>>,
    /// Forced content decoding, overriding `Content-Encoding`.
    pub additional_decode: Option<String>,
    pub debug: bool,
}

impl RequestOptions {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Outcome of a request that produced a response.
#[derive(Debug, Clone)]
pub struct Executed {
    /// Final response; its URL is the last hop.
    pub response: Response,
    /// Body after content decoding.
    pub body: Bytes,
    /// Cookies accepted from the final response.
    pub cookies: Vec<Cookie>,
}

/// A body and the content type it implies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedBody {
    pub bytes: Option<Bytes>,
    pub content_type: Option<&'static str>,
}

/// Pick the body: raw bytes first, then JSON, then form fields.
pub fn resolve_body(req: &RequestOptions) -> Result<ResolvedBody> {
    if let Some(raw) = &req.body {
        return Ok(ResolvedBody {
            bytes: Some(raw.clone()),
            content_type: None,
        });
    }
    if let Some(json) = &req.json {
        let bytes = match json {
            serde_json::Value::String(s) => Bytes::from(s.clone()),
            other => Bytes::from(serde_json::to_vec(other)?),
        };
        return Ok(ResolvedBody {
            bytes: Some(bytes),
            content_type: Some("application/json"),
        });
    }
    if let Some(fields) = &req.form {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        return Ok(ResolvedBody {
            bytes: Some(Bytes::from(encoded)),
            content_type: Some("application/x-www-form-urlencoded"),
        });
    }
    Ok(ResolvedBody::default())
}

/// Append query pairs, keeping whatever the URL already carries.
pub fn merge_query(url: &mut Url, query: &[(String, String)]) {
    if query.is_empty() {
        return;
    }
    url.query_pairs_mut().extend_pairs(query);
}

/// Session defaults overlaid with the request's headers and payload headers.
pub fn prepare_headers(
    base: &OrderedHeaders,
    overrides: &[(String, Option<String>)],
    method: &str,
    body: &ResolvedBody,
) -> OrderedHeaders {
    let mut headers =
        base.merged_with(overrides.iter().map(|(n, v)| (n.as_str(), v.as_deref())));
    if let Some(content_type) = body.content_type {
        headers.insert_if_absent("Content-Type", content_type);
    }
    if h1::declares_length(method) {
        let len = body.bytes.as_ref().map_or(0, Bytes::len);
        headers.insert_if_absent("Content-Length", len.to_string());
    }
    headers
}

/// Caller-supplied cookie string followed by whatever the jar has for `url`.
fn cookie_header(explicit: Option<&str>, jar: &CookieJar, url: &Url) -> Option<String> {
    let from_jar = jar.cookie_header(url);
    match (explicit.filter(|c| !c.is_empty()), from_jar) {
        (Some(e), Some(j)) => Some(format!("{}; {}", e, j)),
        (Some(e), None) => Some(e.to_string()),
        (None, j) => j,
    }
}

fn normalize_method(method: &str) -> Result<String> {
    let method = method.trim();
    if method.is_empty() {
        return Ok(Method::GET.to_string());
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map(|m| m.to_string())
        .map_err(|_| Error::config(format!("Invalid request method: {:?}", method)))
}

fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(format!("Unsupported URL scheme: {}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::config(format!("URL has no host: {}", url)));
    }
    Ok(url)
}

/// Run `req` on `session` under the request's (or session's) deadline.
pub async fn execute(session: &mut Session, req: RequestOptions) -> Result<Executed> {
    let timeout = req.timeout.unwrap_or(session.timeout);
    match tokio::time::timeout(timeout, run(session, req)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(session = %session.id(), ?timeout, "Request timed out");
            Err(Error::Timeout(timeout))
        }
    }
}

async fn run(session: &mut Session, req: RequestOptions) -> Result<Executed> {
    let mut url = parse_target(&req.url)?;
    merge_query(&mut url, &req.query);
    let mut method = normalize_method(&req.method)?;

    let body = resolve_body(&req)?;
    let mut headers = prepare_headers(&session.headers, &req.headers, &method, &body);
    let mut payload = body.bytes;
    let mut explicit_cookie = headers.get("cookie").map(str::to_string);

    // Request cookies only live for this call
    let mut jar = session.jar.clone();
    for cookie in &req.cookies {
        jar.store(cookie.clone());
    }

    let order = match &req.header_order {
        Some(order) if !order.is_empty() => order.clone(),
        _ => session.header_order.clone(),
    };
    let follow = req.follow_redirects.unwrap_or(session.follow_redirects);
    let insecure = req.insecure_skip_verify.unwrap_or(session.insecure_skip_verify);
    let proxy = req.proxy.clone().or_else(|| session.proxy.clone());
    let pins = match &req.pins {
        Some(map) => Arc::new(PinSet::new(map.clone())),
        None => session.pins.clone(),
    };
    let debug_enabled = req.debug || session.debug;
    let connector = Connector::new(
        session.profile.clone(),
        ConnectOptions {
            force_http1: session.force_http1,
            insecure_skip_verify: insecure,
            pins: pins.clone(),
            debug: debug_enabled,
            sessions: session.tls_sessions.clone(),
        },
    );

    session.pool.cleanup();
    let mut chain = RedirectChain::new(&url, &method);
    loop {
        match cookie_header(explicit_cookie.as_deref(), &jar, &url) {
            Some(value) => headers.insert("Cookie", value),
            None => {
                headers.remove("cookie");
            }
        }
        let wire_headers = headers.ordered(&order);

        if debug_enabled {
            let names: Vec<&str> = wire_headers.iter().map(|(n, _)| n.as_str()).collect();
            info!(
                target: "wraith::debug",
                session = %session.id(),
                profile = %session.profile.name,
                %method,
                %url,
                headers = ?names,
                body_len = payload.as_ref().map_or(0, Bytes::len),
                "Sending request"
            );
        }

        let key = PoolKey::new(&url, proxy.as_ref(), insecure)?;
        let outgoing = Outgoing {
            method: &method,
            url: &url,
            headers: &wire_headers,
            body: payload.clone(),
        };
        let response = dispatch(
            &mut session.pool,
            &connector,
            key,
            proxy.as_ref(),
            &pins,
            session.profile.http2.clone(),
            outgoing,
        )
        .await?;

        let accepted = session
            .jar
            .store_set_cookies(response.header_all("set-cookie"), &url);
        for cookie in &accepted {
            jar.store(cookie.clone());
        }

        if debug_enabled {
            info!(
                target: "wraith::debug",
                status = response.status,
                version = %response.http_version(),
                url = %response.url,
                "Received response"
            );
        }

        let hop = if follow {
            chain.next(&url, &method, &response)?
        } else {
            None
        };
        let Some(hop) = hop else {
            let body = response.decoded_body(req.additional_decode.as_deref())?;
            return Ok(Executed {
                response,
                body,
                cookies: accepted,
            });
        };

        debug!(
            status = response.status,
            from = %url,
            to = %hop.url,
            method = %hop.method,
            "Following redirect"
        );
        hop.rewrite_headers(&mut headers);
        if hop.cross_origin {
            explicit_cookie = None;
        }
        if !hop.keep_body {
            payload = None;
        }
        method = hop.method;
        url = hop.url;
    }
}

/// Send over a pooled connection, or a fresh one.
///
/// A reused connection the server already closed is retried once on a new
/// connection.
async fn dispatch(
    pool: &mut ConnectionPool,
    connector: &Connector,
    key: PoolKey,
    proxy: Option<&Proxy>,
    pins: &PinSet,
    http2: crate::fingerprint::Http2Fingerprint,
    req: Outgoing<'_>,
) -> Result<Response> {
    if let Some(mut conn) = pool.take(&key, pins)? {
        let retry = Outgoing {
            method: req.method,
            url: req.url,
            headers: req.headers,
            body: req.body.clone(),
        };
        match conn.send(req).await {
            Ok(response) => {
                pool.put(key, conn);
                return Ok(response);
            }
            Err(e) if matches!(e, Error::Io(_) | Error::Connection(_)) => {
                debug!(?key, error = %e, "Pooled connection failed, redialing");
                return send_fresh(pool, connector, key, proxy, &http2, retry).await;
            }
            Err(e) => return Err(e),
        }
    }
    send_fresh(pool, connector, key, proxy, &http2, req).await
}

async fn send_fresh(
    pool: &mut ConnectionPool,
    connector: &Connector,
    key: PoolKey,
    proxy: Option<&Proxy>,
    http2: &crate::fingerprint::Http2Fingerprint,
    req: Outgoing<'_>,
) -> Result<Response> {
    let mut conn = Connection::open(connector, req.url, proxy, http2).await?;
    debug!(?key, version = %conn.version(), "Opened connection");
    let response = conn.send(req).await?;
    pool.put(key, conn);
    Ok(response)
}
