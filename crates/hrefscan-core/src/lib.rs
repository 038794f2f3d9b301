use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Method {0} is not supported.")]
    UnsupportedMethod(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
    #[error("request failed: {0}")]
    Network(String),
    #[error("browser driver failed: {0}")]
    Driver(String),
    #[error("interrupted by user")]
    Interrupted,
}

impl Error {
    /// Stable machine-readable name (used by the JSON report).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnsupportedMethod(_) => "unsupported_method",
            Error::InvalidUrl(_) => "invalid_url",
            Error::InvalidBaseUrl(_) => "invalid_base_url",
            Error::Network(_) => "network",
            Error::Driver(_) => "driver",
            Error::Interrupted => "interrupted",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of request methods the tool will send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Options,
    Put,
    Delete,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Options,
        Method::Put,
        Method::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Options => "OPTIONS",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Case-insensitive; the error keeps the caller's spelling.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| Error::UnsupportedMethod(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    /// Fetch through a scripted browser instead of the plain HTTP client.
    pub use_browser_driver: bool,
}

impl FetchRequest {
    /// Validates `method` against the allowed set. No IO happens here, so an
    /// unsupported method is rejected before anything touches the network.
    pub fn new(method: &str, url: impl Into<String>, use_browser_driver: bool) -> Result<Self> {
        Ok(Self {
            method: method.parse()?,
            url: url.into(),
            use_browser_driver,
        })
    }

    pub fn target(&self) -> Result<url::Url> {
        url::Url::parse(self.url.trim())
            .map_err(|e| Error::InvalidUrl(format!("{:?}: {e}", self.url)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchSource {
    Http,
    Browser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    /// The URL that was asked for.
    pub url: String,
    /// Post-redirect URL with trailing slashes stripped; this is the base for link resolution.
    pub final_url: String,
    pub status: u16,
    /// Response headers in the order the server sent them.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: FetchSource,
}

impl FetchResult {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// `https://example.com/dir/` -> `https://example.com/dir`.
pub fn strip_trailing_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub unique_links: BTreeSet<String>,
    pub total_links_found: usize,
    pub duplicate_count: usize,
}

impl ExtractionResult {
    /// Build from the resolved candidate list (duplicates included).
    pub fn from_resolved(links: Vec<String>) -> Self {
        let total_links_found = links.len();
        let unique_links: BTreeSet<String> = links.into_iter().collect();
        let duplicate_count = total_links_found - unique_links.len();
        Self {
            unique_links,
            total_links_found,
            duplicate_count,
        }
    }
}

pub fn env_truthy(k: &str) -> bool {
    matches!(
        std::env::var(k)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Trust self-signed/expired/mismatched certificates. On by default: the
    /// tool is aimed at reconnaissance of hosts whose TLS is often broken.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
    /// No timeout unless explicitly configured.
    pub timeout_ms: Option<u64>,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            user_agent: format!("hrefscan/{}", env!("CARGO_PKG_VERSION")),
            timeout_ms: None,
            max_redirects: 10,
        }
    }
}

impl FetchConfig {
    /// Defaults overlaid with `HREFSCAN_USER_AGENT` / `HREFSCAN_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(ua) = std::env::var("HREFSCAN_USER_AGENT") {
            let ua = ua.trim();
            if !ua.is_empty() {
                cfg.user_agent = ua.to_string();
            }
        }
        cfg.timeout_ms = std::env::var("HREFSCAN_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0);
        cfg
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("Delete".parse::<Method>().unwrap(), Method::Delete);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Options);
    }

    #[test]
    fn method_parse_does_not_trim() {
        for raw in [" OPTIONS ", "GET\n", "\tpost"] {
            let err = raw.parse::<Method>().unwrap_err();
            assert!(matches!(err, Error::UnsupportedMethod(ref m) if m == raw));
        }
        assert!(FetchRequest::new(" GET", "http://127.0.0.1:1/", false).is_err());
    }

    #[test]
    fn unsupported_method_is_rejected_at_construction() {
        let err = FetchRequest::new("PATCH", "http://127.0.0.1:1/", false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod(ref m) if m == "PATCH"));
        assert_eq!(err.to_string(), "Method PATCH is not supported.");
        assert_eq!(err.kind(), "unsupported_method");
    }

    #[test]
    fn target_rejects_unparseable_urls() {
        let req = FetchRequest::new("GET", "not a url", false).unwrap();
        assert!(matches!(req.target(), Err(Error::InvalidUrl(_))));
        let req = FetchRequest::new("GET", "https://example.com/x", true).unwrap();
        assert_eq!(req.target().unwrap().host_str(), Some("example.com"));
    }

    #[test]
    fn strips_every_trailing_slash() {
        assert_eq!(strip_trailing_slash("http://example.com/"), "http://example.com");
        assert_eq!(strip_trailing_slash("http://example.com/a//"), "http://example.com/a");
        assert_eq!(strip_trailing_slash("http://example.com/a"), "http://example.com/a");
    }

    #[test]
    fn extraction_result_counts_duplicates() {
        let r = ExtractionResult::from_resolved(vec![
            "http://a/1".to_string(),
            "http://a/2".to_string(),
            "http://a/1".to_string(),
        ]);
        assert_eq!(r.total_links_found, 3);
        assert_eq!(r.unique_links.len(), 2);
        assert_eq!(r.duplicate_count, 1);
        assert_eq!(ExtractionResult::default().duplicate_count, 0);
    }

    #[test]
    fn fetch_config_defaults_trust_invalid_certs_without_timeout() {
        let cfg = FetchConfig::default();
        assert!(cfg.accept_invalid_certs);
        assert!(cfg.timeout().is_none());
        assert_eq!(cfg.max_redirects, 10);
        assert!(cfg.user_agent.starts_with("hrefscan/"));
    }
}
