//! Case-insensitive, insertion-ordered header map.
//!
//! Lookups fold ASCII case, but the spelling used on the first insert of a
//! name is what goes on the wire, and distinct names keep the order in which
//! they were first seen.

use std::collections::HashMap;

/// Header map that preserves first-seen order and first-seen casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedHeaders {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl OrderedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults sent by a session that was configured without headers.
    pub fn session_defaults() -> Self {
        let mut headers = Self::new();
        headers.insert(
            "User-Agent",
            concat!("wraith/", env!("CARGO_PKG_VERSION")),
        );
        headers.insert("Accept-Encoding", "gzip, deflate, br");
        headers.insert("Accept", "*/*");
        headers.insert("Connection", "keep-alive");
        headers
    }

    /// Insert or overwrite. An existing key keeps its position and casing.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let key = name.to_ascii_lowercase();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    /// Insert only when the name is absent.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.contains(&name) {
            self.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.index.remove(&name.to_ascii_lowercase())?;
        let (_, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Apply per-request overrides on top of these headers.
    ///
    /// `None` values delete the key from the result instead of sending it.
    pub fn merged_with<'a, I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut merged = self.clone();
        for (name, value) in overrides {
            match value {
                Some(v) => merged.insert(name, v),
                None => {
                    merged.remove(name);
                }
            }
        }
        merged
    }

    /// Headers in wire order.
    ///
    /// Names listed in `order` come first, in that order; the rest follow in
    /// insertion order. Matching is case-insensitive and unknown names in
    /// `order` are skipped.
    pub fn ordered(&self, order: &[String]) -> Vec<(String, String)> {
        if order.is_empty() {
            return self.entries.clone();
        }
        let mut used = vec![false; self.entries.len()];
        let mut out = Vec::with_capacity(self.entries.len());
        for name in order {
            if let Some(&pos) = self.index.get(&name.to_ascii_lowercase()) {
                if !used[pos] {
                    used[pos] = true;
                    out.push(self.entries[pos].clone());
                }
            }
        }
        for (pos, entry) in self.entries.iter().enumerate() {
            if !used[pos] {
                out.push(entry.clone());
            }
        }
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OrderedHeaders {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Check a header name is a valid RFC 9110 token.
pub fn validate_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_tchar)
}

/// Header values may not carry CR, LF or NUL.
pub fn validate_header_value(value: &str) -> bool {
    !value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0)
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z')
}
