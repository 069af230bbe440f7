//! Redirect following: method rewriting, header scrubbing, limits and loops.

use url::Url;

use crate::error::{Error, Result};
use crate::headers::OrderedHeaders;
use crate::response::Response;

/// Most hops followed before giving up.
pub const MAX_REDIRECTS: u32 = 10;

/// Payload headers that go away when a redirect drops the body.
const PAYLOAD_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "transfer-encoding",
];

/// Credentials that must not follow a redirect to another origin.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "cookie2",
    "proxy-authorization",
    "www-authenticate",
];

/// The next request in a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub url: Url,
    pub method: String,
    /// False when the redirect turned the request into a bodyless GET.
    pub keep_body: bool,
    pub cross_origin: bool,
}

impl Hop {
    /// Adjust headers for this hop.
    pub fn rewrite_headers(&self, headers: &mut OrderedHeaders) {
        if !self.keep_body {
            for name in PAYLOAD_HEADERS {
                headers.remove(name);
            }
        }
        if self.cross_origin {
            for name in SENSITIVE_HEADERS {
                headers.remove(name);
            }
        }
    }
}

/// Tracks one redirect chain.
#[derive(Debug)]
pub struct RedirectChain {
    max: u32,
    /// (method, url) pairs already requested.
    visited: Vec<(String, Url)>,
}

impl RedirectChain {
    pub fn new(start: &Url, method: &str) -> Self {
        Self::with_limit(start, method, MAX_REDIRECTS)
    }

    pub fn with_limit(start: &Url, method: &str, max: u32) -> Self {
        Self {
            max,
            visited: vec![(method.to_string(), start.clone())],
        }
    }

    /// Number of hops followed so far.
    pub fn hops(&self) -> u32 {
        (self.visited.len() - 1) as u32
    }

    /// Decide what follows `response`, which answered `method current`.
    ///
    /// `Ok(None)` means the response is final: not a redirect, or a redirect
    /// without a usable Location.
    pub fn next(&mut self, current: &Url, method: &str, response: &Response) -> Result<Option<Hop>> {
        if !response.is_redirect() {
            return Ok(None);
        }
        let Some(location) = response.location().map(str::trim).filter(|l| !l.is_empty()) else {
            return Ok(None);
        };
        let mut url = current
            .join(location)
            .map_err(|e| Error::InvalidRedirectUrl(format!("{}: {}", location, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidRedirectUrl(url.to_string()));
        }
        // A Location without a fragment inherits the current one (RFC 9110 10.2.2)
        if url.fragment().is_none() {
            url.set_fragment(current.fragment());
        }

        let (method, keep_body) = rewrite_method(response.status, method);

        if self.hops() >= self.max {
            return Err(Error::RedirectLimit { count: self.max });
        }
        if self
            .visited
            .iter()
            .any(|(m, u)| *m == method && same_resource(u, &url))
        {
            return Err(Error::RedirectLoop(url.to_string()));
        }
        self.visited.push((method.clone(), url.clone()));

        let cross_origin = url.scheme() != current.scheme()
            || url.host_str() != current.host_str()
            || url.port_or_known_default() != current.port_or_known_default();
        Ok(Some(Hop {
            url,
            method,
            keep_body,
            cross_origin,
        }))
    }
}

/// 301/302 turn POST into GET; 303 turns everything but HEAD into GET;
/// 307/308 keep method and body.
fn rewrite_method(status: u16, method: &str) -> (String, bool) {
    match status {
        301 | 302 if method.eq_ignore_ascii_case("POST") => ("GET".to_string(), false),
        303 if !method.eq_ignore_ascii_case("HEAD") => ("GET".to_string(), false),
        303 => (method.to_string(), false),
        _ => (method.to_string(), true),
    }
}

fn same_resource(a: &Url, b: &Url) -> bool {
    a.as_str().split('#').next() == b.as_str().split('#').next()
}
