use anyhow::{Context, Result};

/// Origin of a URL, used to key pooled transports and label statistics.
///
/// URLs are normalised down to `(scheme, host, port)` so that different paths
/// on the same origin share one transport and one set of counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HostKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl HostKey {
    /// Transport key form: "scheme:host:port".
    pub fn to_string_key(&self) -> String {
        format!("{}:{}:{}", self.scheme, self.host, self.port)
    }

    /// Parse from a transport key.
    pub fn from_string_key(s: &str) -> Option<Self> {
        let mut parts = s.rsplitn(2, ':');
        let port: u16 = parts.next()?.parse().ok()?;
        let (scheme, host) = parts.next()?.split_once(':')?;
        Some(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Construct a host key from a URL string.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;

        let scheme = parsed.scheme().to_string();
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("URL missing host: {url}"))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("URL missing port and unknown default: {url}"))?;

        Ok(Self { scheme, host, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_parses_scheme_host_port() {
        let key = HostKey::from_url("https://example.com:8443/path").unwrap();
        assert_eq!(key.scheme, "https");
        assert_eq!(key.host, "example.com");
        assert_eq!(key.port, 8443);
    }

    #[test]
    fn from_url_uses_default_port() {
        let key = HostKey::from_url("http://example.com/path").unwrap();
        assert_eq!(key.port, 80);
        let key = HostKey::from_url("https://codeload.github.com/o/r/zip/main").unwrap();
        assert_eq!(key.port, 443);
    }

    #[test]
    fn string_key_roundtrip_with_ipv6_host() {
        let key = HostKey::from_url("http://[::1]:8080/").unwrap();
        let s = key.to_string_key();
        assert_eq!(s, "http:[::1]:8080");
        assert_eq!(HostKey::from_string_key(&s), Some(key));
    }

    #[test]
    fn from_url_rejects_garbage() {
        assert!(HostKey::from_url("not a url").is_err());
        assert!(HostKey::from_string_key("nope").is_none());
    }
}
