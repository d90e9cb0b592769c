//! Request headers supplied by the caller (auth, user agent, accept).
//!
//! The engine attaches whatever the provider returns to every outbound
//! request and never inspects or caches the values.

use std::collections::HashMap;

/// Default `User-Agent` when the provider does not set one.
pub const DEFAULT_USER_AGENT: &str = concat!("tplfetch/", env!("CARGO_PKG_VERSION"));

/// Source of headers for outbound requests. Called once per request, so
/// implementations may rotate credentials between calls.
pub trait HeaderProvider: Send + Sync {
    fn headers(&self) -> HashMap<String, String>;
}

/// Fixed set of headers.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: HashMap<String, String>,
}

impl StaticHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn bearer(token: &str) -> Self {
        Self::new().with("Authorization", format!("Bearer {token}"))
    }
}

impl From<HashMap<String, String>> for StaticHeaders {
    fn from(headers: HashMap<String, String>) -> Self {
        Self { headers }
    }
}

impl HeaderProvider for StaticHeaders {
    fn headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }
}

/// "Name: value" lines for curl, sorted by name. Entries containing CR or
/// LF are dropped.
pub(crate) fn header_lines(provider: Option<&dyn HeaderProvider>) -> Vec<String> {
    let mut map = provider.map(|p| p.headers()).unwrap_or_default();
    if !map.keys().any(|k| k.trim().eq_ignore_ascii_case("user-agent")) {
        map.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
    }
    let mut lines: Vec<String> = map
        .iter()
        .filter(|(k, v)| {
            let ok = !k.trim().is_empty() && !format!("{k}{v}").contains(['\r', '\n']);
            if !ok {
                tracing::warn!(header = %k.trim(), "dropping malformed request header");
            }
            ok
        })
        .map(|(k, v)| format!("{}: {}", k.trim(), v.trim()))
        .collect();
    lines.sort();
    lines
}

/// Build a curl header list from `lines` plus `extra`.
pub(crate) fn curl_list(lines: &[String], extra: &[&str]) -> Result<curl::easy::List, curl::Error> {
    let mut list = curl::easy::List::new();
    for line in lines.iter().map(String::as_str).chain(extra.iter().copied()) {
        list.append(line)?;
    }
    Ok(list)
}
