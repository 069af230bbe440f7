//! RFC 6265 cookie handling.
//!
//! The jar is a plain value: the executor clones it into a working copy per
//! request, and only response cookies are written back to the session.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use url::Url;

use crate::error::{Error, Result};

/// RFC 6265 cookie representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Set when the cookie had no Domain attribute; only the exact host matches.
    pub host_only: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            host_only: false,
            expires: None,
        }
    }

    /// Parse a Set-Cookie value received from `request_url`.
    pub fn from_set_cookie_header(header: &str, request_url: &Url) -> Result<Self> {
        let request_host = request_url
            .host_str()
            .ok_or_else(|| Error::CookieParse("No host in URL".to_string()))?
            .to_ascii_lowercase();

        let mut parts = header.split(';').map(str::trim);
        let pair = parts
            .next()
            .ok_or_else(|| Error::CookieParse("Empty cookie header".to_string()))?;
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::CookieParse("No = in cookie".to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::CookieParse("Empty cookie name".to_string()));
        }

        let mut cookie = Cookie::new(name, value.trim(), request_host.clone());
        cookie.host_only = true;
        cookie.path = default_path(request_url.path());
        let mut max_age: Option<i64> = None;

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
                None => (attr.to_ascii_lowercase(), ""),
            };
            match key.as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "domain" if !val.is_empty() => {
                    let domain = normalize_domain(val);
                    if !domain_match(&request_host, &domain) {
                        return Err(Error::CookieParse(format!(
                            "Domain {} does not cover {}",
                            domain, request_host
                        )));
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => {
                    if let Some(dt) = parse_cookie_date(val) {
                        cookie.expires = Some(dt);
                    }
                }
                "max-age" => max_age = val.parse().ok(),
                _ => {}
            }
        }

        // Max-Age wins over Expires
        if let Some(secs) = max_age {
            cookie.expires = Some(if secs <= 0 {
                Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
            } else {
                Utc::now() + ChronoDuration::seconds(secs)
            });
        }
        Ok(cookie)
    }

    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|e| e <= Utc::now())
    }

    /// Domain, path and secure matching against a request URL.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        if self.secure && url.scheme() != "https" {
            return false;
        }
        if self.is_expired() {
            return false;
        }
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        };
        domain_ok && path_match(url.path(), &self.path)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Cookie store keyed by domain, then (path, name).
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: HashMap<String, HashMap<(String, String), Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cookie. An expired cookie evicts any stored cookie with the same key.
    pub fn store(&mut self, cookie: Cookie) {
        let key = (cookie.path.clone(), cookie.name.clone());
        if cookie.is_expired() {
            if let Some(bucket) = self.cookies.get_mut(&cookie.domain) {
                bucket.remove(&key);
                if bucket.is_empty() {
                    self.cookies.remove(&cookie.domain);
                }
            }
            return;
        }
        self.cookies
            .entry(cookie.domain.clone())
            .or_default()
            .insert(key, cookie);
    }

    /// Merge every cookie of `other` into this jar, `other` winning on conflicts.
    pub fn merge(&mut self, other: &CookieJar) {
        for cookie in other.cookies() {
            self.store(cookie.clone());
        }
    }

    pub fn cookies(&self) -> Vec<&Cookie> {
        self.cookies.values().flat_map(|m| m.values()).collect()
    }

    /// Cookies to send to `url`, longest path first (RFC 6265 section 5.4).
    pub fn cookies_for_url(&self, url: &Url) -> Vec<&Cookie> {
        let mut matched: Vec<&Cookie> = self
            .cookies
            .values()
            .flat_map(|m| m.values())
            .filter(|c| c.matches(url))
            .collect();
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.name.cmp(&b.name)));
        matched
    }

    /// Value for the outgoing `Cookie` header, if any cookie matches.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies_for_url(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Store every parsable Set-Cookie value, returning what was accepted.
    pub fn store_set_cookies<'a, I>(&mut self, values: I, request_url: &Url) -> Vec<Cookie>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut accepted = Vec::new();
        for value in values {
            match Cookie::from_set_cookie_header(value, request_url) {
                Ok(cookie) => {
                    accepted.push(cookie.clone());
                    self.store(cookie);
                }
                Err(e) => tracing::warn!("Ignoring Set-Cookie from {}: {}", request_url, e),
            }
        }
        accepted
    }

    pub fn get(&self, domain: &str, name: &str) -> Option<&Cookie> {
        self.cookies
            .get(&normalize_domain(domain))?
            .values()
            .find(|c| c.name == name)
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim_start_matches('.').to_ascii_lowercase()
}

fn domain_match(host: &str, domain: &str) -> bool {
    host == domain
        || (host.ends_with(domain)
            && host.as_bytes().get(host.len() - domain.len() - 1) == Some(&b'.')
            && host.parse::<std::net::IpAddr>().is_err())
}

fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

fn parse_cookie_date(date_str: &str) -> Option<DateTime<Utc>> {
    for fmt in [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(dt.and_utc());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.with_timezone(&Utc));
    }
    date_str
        .parse::<i64>()
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn set_cookie_round_trip_same_host() {
        let mut jar = CookieJar::new();
        let origin = url("https://shop.example.com/login");
        jar.store_set_cookies(["sid=abc; Path=/; HttpOnly"], &origin);

        assert_eq!(
            jar.cookie_header(&url("https://shop.example.com/cart")).as_deref(),
            Some("sid=abc")
        );
        // host-only: sibling and parent hosts excluded
        assert!(jar.cookie_header(&url("https://api.example.com/")).is_none());
        assert!(jar.cookie_header(&url("https://other.org/")).is_none());
    }

    #[test]
    fn domain_cookie_covers_subdomains() {
        let mut jar = CookieJar::new();
        jar.store_set_cookies(
            ["pref=1; Domain=.example.com; Path=/"],
            &url("https://www.example.com/"),
        );
        assert!(jar.cookie_header(&url("https://api.example.com/x")).is_some());
        assert!(jar.cookie_header(&url("https://badexample.com/")).is_none());
    }

    #[test]
    fn foreign_domain_attribute_rejected() {
        let err = Cookie::from_set_cookie_header(
            "a=b; Domain=evil.com",
            &url("https://example.com/"),
        );
        assert!(err.is_err());
    }

    #[test]
    fn malformed_set_cookie_is_skipped() {
        let mut jar = CookieJar::new();
        let origin = url("https://example.com/");
        let accepted = jar.store_set_cookies(
            ["=novalue", "broken", "a=b; Domain=evil.com", "ok=1"],
            &origin,
        );
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].name, "ok");
        assert_eq!(jar.cookie_header(&origin).as_deref(), Some("ok=1"));
    }

    #[test]
    fn secure_and_path_rules() {
        let mut jar = CookieJar::new();
        let origin = url("https://example.com/account/settings");
        jar.store_set_cookies(["tok=1; Secure", "scoped=2; Path=/account"], &origin);

        let plain = url("http://example.com/account/x");
        assert_eq!(jar.cookie_header(&plain).as_deref(), Some("scoped=2"));
        let outside = url("https://example.com/accounting");
        assert!(jar
            .cookies_for_url(&outside)
            .iter()
            .all(|c| c.name != "scoped"));
    }

    #[test]
    fn max_age_zero_evicts() {
        let mut jar = CookieJar::new();
        let origin = url("https://example.com/");
        jar.store_set_cookies(["a=1"], &origin);
        assert_eq!(jar.len(), 1);
        jar.store_set_cookies(["a=gone; Max-Age=0"], &origin);
        assert!(jar.is_empty());
    }

    #[test]
    fn expires_attribute_parsed() {
        let cookie = Cookie::from_set_cookie_header(
            "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
            &url("https://example.com/"),
        )
        .unwrap();
        assert!(cookie.is_expired());
        assert_eq!(cookie.expires.unwrap().timestamp(), 1445412480);
    }

    #[test]
    fn merge_prefers_other() {
        let mut session = CookieJar::new();
        session.store(Cookie::new("a", "old", "example.com"));
        let mut request = CookieJar::new();
        request.store(Cookie::new("a", "new", "example.com"));
        request.store(Cookie::new("b", "2", "example.com"));

        let mut working = session.clone();
        working.merge(&request);
        assert_eq!(working.get("example.com", "a").unwrap().value, "new");
        assert_eq!(working.len(), 2);
        assert_eq!(session.get("example.com", "a").unwrap().value, "old");
    }

    #[test]
    fn longer_paths_first() {
        let mut jar = CookieJar::new();
        let mut deep = Cookie::new("deep", "1", "example.com");
        deep.path = "/a/b".into();
        jar.store(Cookie::new("root", "1", "example.com"));
        jar.store(deep);
        assert_eq!(
            jar.cookie_header(&url("http://example.com/a/b/c")).as_deref(),
            Some("deep=1; root=1")
        );
    }
}
