//! Request classification for strategy selection.

use url::Url;
use wayfarer_net::Request;

/// Serving class assigned to an intercepted request. Computed per request,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// App-shell asset, served cache-first from the precache.
    StaticAsset,
    /// Allow-listed external origin, served stale-while-revalidate.
    ExternalResource,
    /// Everything else, served network-first.
    Dynamic,
}

/// Decision for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// Send to the network untouched; the worker takes no part.
    PassThrough,
    /// Serve through the strategy for this class.
    Handle(RequestClass),
}

/// File extensions treated as static assets.
const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "woff", "woff2", "ttf",
    "eot", "json", "webmanifest",
];

/// Pure classifier: the decision is derived from the method and URL alone,
/// with no I/O, so classification is assertable in tests without a network.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    external_origins: Vec<String>,
}

impl Classifier {
    /// Create a classifier with an external-origin allow-list (URL prefixes).
    pub fn new(external_origins: Vec<String>) -> Self {
        Self { external_origins }
    }

    /// Classify a request. First match wins: mutating requests and
    /// non-http(s) schemes are never intercepted, then static-asset
    /// extensions, then allow-listed external origins, then dynamic.
    pub fn decide(&self, request: &Request) -> FetchDecision {
        if !request.is_get() {
            return FetchDecision::PassThrough;
        }
        if !request.is_http() {
            return FetchDecision::PassThrough;
        }
        if has_static_extension(&request.url) {
            return FetchDecision::Handle(RequestClass::StaticAsset);
        }
        if self.is_external(&request.url) {
            return FetchDecision::Handle(RequestClass::ExternalResource);
        }
        FetchDecision::Handle(RequestClass::Dynamic)
    }

    fn is_external(&self, url: &Url) -> bool {
        self.external_origins
            .iter()
            .any(|prefix| url.as_str().starts_with(prefix.as_str()))
    }
}

fn has_static_extension(url: &Url) -> bool {
    match url.path().rsplit_once('.') {
        Some((_, ext)) => STATIC_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)),
        None => false,
    }
}
