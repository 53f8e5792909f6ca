//! Request classification and URL canonicalization
//!
//! Everything here is a pure function of the request; the strategy and the
//! cache partition are both derived from the [`ResourceClass`].

use crate::{NetworkError, Result};
use foresight_cache::Partition;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const STATIC_EXTENSIONS: &[&str] = &["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot"];
const MEDIA_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "mp4", "webm", "mp3", "ogg", "wav",
];
const DOCUMENT_EXTENSIONS: &[&str] = &["html", "htm"];

/// Content class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    /// Scripts, stylesheets and fonts
    Static,
    /// Images, audio and video
    Media,
    /// HTML documents
    Document,
    /// Anything else served by the origin
    Dynamic,
    /// API calls
    Api,
    /// Speculative fetches
    Prefetch,
}

impl ResourceClass {
    /// Fetch strategy for this class
    pub fn strategy(&self) -> FetchStrategy {
        match self {
            ResourceClass::Static | ResourceClass::Media => FetchStrategy::CacheFirst,
            ResourceClass::Document | ResourceClass::Dynamic | ResourceClass::Api => {
                FetchStrategy::NetworkFirst
            }
            ResourceClass::Prefetch => FetchStrategy::StaleWhileRevalidate,
        }
    }

    /// Cache partition that stores this class
    pub fn partition(&self) -> Partition {
        match self {
            ResourceClass::Static | ResourceClass::Media => Partition::Static,
            ResourceClass::Document | ResourceClass::Dynamic => Partition::Dynamic,
            ResourceClass::Api => Partition::Api,
            ResourceClass::Prefetch => Partition::Prefetch,
        }
    }
}

/// How a request is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Serve from cache, refresh stale hits in the background
    CacheFirst,
    /// Try the network, fall back to cache
    NetworkFirst,
    /// Serve from cache while refreshing it
    StaleWhileRevalidate,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchStrategy::CacheFirst => "cache-first",
            FetchStrategy::NetworkFirst => "network-first",
            FetchStrategy::StaleWhileRevalidate => "stale-while-revalidate",
        };
        f.write_str(name)
    }
}

/// What is known about a request before it is fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Canonical URL
    pub url: Url,
    /// Request destination (`script`, `image`, `document`, ...)
    pub destination: Option<String>,
    /// Accept header
    pub accept: Option<String>,
    /// Issued speculatively
    pub prefetch: bool,
    /// Admission priority, recorded on the cached entry
    pub priority: u32,
}

impl RequestDescriptor {
    /// Create a descriptor for an already canonical URL
    pub fn new(url: Url) -> Self {
        Self {
            url,
            destination: None,
            accept: None,
            prefetch: false,
            priority: 0,
        }
    }

    /// Canonicalize `raw` against `origin` and describe it
    pub fn parse(raw: &str, origin: &Url) -> Result<Self> {
        Ok(Self::new(canonicalize(raw, origin)?))
    }

    /// With destination
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// With accept header
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Mark as a speculative fetch
    pub fn prefetch(mut self) -> Self {
        self.prefetch = true;
        self
    }

    /// With priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Cache key
    pub fn key(&self) -> &str {
        self.url.as_str()
    }

    /// Classify the request
    pub fn class(&self) -> ResourceClass {
        classify(self)
    }
}

/// Map a request to its content class
pub fn classify(request: &RequestDescriptor) -> ResourceClass {
    if request.prefetch {
        return ResourceClass::Prefetch;
    }

    let path = request.url.path();
    if path == "/api" || path.starts_with("/api/") {
        return ResourceClass::Api;
    }

    match request.destination.as_deref() {
        Some("script") | Some("style") | Some("font") => return ResourceClass::Static,
        Some("image") | Some("audio") | Some("video") => return ResourceClass::Media,
        Some("document") => return ResourceClass::Document,
        _ => {}
    }

    if let Some(ext) = extension(path) {
        if STATIC_EXTENSIONS.contains(&ext.as_str()) {
            return ResourceClass::Static;
        }
        if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
            return ResourceClass::Media;
        }
        if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            return ResourceClass::Document;
        }
    }

    if request
        .accept
        .as_deref()
        .is_some_and(|accept| accept.contains("text/html"))
    {
        return ResourceClass::Document;
    }

    ResourceClass::Dynamic
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Resolve `raw` against `origin` into an admissible URL.
///
/// Only http(s) URLs on the same origin are accepted; the fragment is
/// dropped since it never reaches the server.
pub fn canonicalize(raw: &str, origin: &Url) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(NetworkError::InvalidRequest("empty url".into()));
    }

    let mut url = origin.join(raw)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(NetworkError::InvalidRequest(format!(
            "disallowed scheme: {}",
            url.scheme()
        )));
    }
    if url.origin() != origin.origin() {
        return Err(NetworkError::InvalidRequest(format!(
            "cross-origin url: {}",
            url
        )));
    }

    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://shop.test/").unwrap()
    }

    fn describe(raw: &str) -> RequestDescriptor {
        RequestDescriptor::parse(raw, &origin()).unwrap()
    }

    #[test]
    fn test_canonicalize_resolves_and_strips_fragment() {
        let url = canonicalize("/products/1?x=2#reviews", &origin()).unwrap();
        assert_eq!(url.as_str(), "https://shop.test/products/1?x=2");
    }

    #[test]
    fn test_canonicalize_rejects_foreign_and_unsafe() {
        for raw in [
            "https://evil.test/",
            "http://shop.test/",
            "javascript:alert(1)",
            "data:text/html,hi",
            "mailto:a@shop.test",
            "",
        ] {
            let err = canonicalize(raw, &origin()).unwrap_err();
            assert!(matches!(err, NetworkError::InvalidRequest(_)), "{}", raw);
        }
    }

    #[test]
    fn test_classify_by_path_and_extension() {
        assert_eq!(describe("/app.js").class(), ResourceClass::Static);
        assert_eq!(describe("/fonts/a.WOFF2").class(), ResourceClass::Static);
        assert_eq!(describe("/img/hero.webp").class(), ResourceClass::Media);
        assert_eq!(describe("/about.html").class(), ResourceClass::Document);
        assert_eq!(describe("/api/cart").class(), ResourceClass::Api);
        assert_eq!(describe("/products").class(), ResourceClass::Dynamic);
    }

    #[test]
    fn test_classify_by_destination_and_accept() {
        assert_eq!(
            describe("/thumb").with_destination("image").class(),
            ResourceClass::Media
        );
        assert_eq!(
            describe("/products").with_accept("text/html,*/*").class(),
            ResourceClass::Document
        );
    }

    #[test]
    fn test_prefetch_tag_wins() {
        let request = describe("/api/public/menu").prefetch();
        assert_eq!(request.class(), ResourceClass::Prefetch);
        assert_eq!(
            request.class().strategy(),
            FetchStrategy::StaleWhileRevalidate
        );
    }

    #[test]
    fn test_strategy_and_partition_mapping() {
        assert_eq!(ResourceClass::Media.strategy(), FetchStrategy::CacheFirst);
        assert_eq!(ResourceClass::Media.partition(), Partition::Static);
        assert_eq!(ResourceClass::Document.strategy(), FetchStrategy::NetworkFirst);
        assert_eq!(ResourceClass::Api.partition(), Partition::Api);
        assert_eq!(ResourceClass::Prefetch.partition(), Partition::Prefetch);
    }
}
