//! Request classification for the offline cache.

use serde::{Deserialize, Serialize};
use url::Url;

/// How a single request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePolicy {
    /// Live audio. Not intercepted at all.
    Bypass,
    /// API and backend traffic. Always fetched, never cached.
    NetworkOnly,
    /// Static assets. Served from cache, refreshed in the background.
    CacheFirst,
    /// Everything else (navigations). Fetched, cached copy as fallback.
    NetworkFirst,
}

/// URL patterns that drive [`RoutePolicy`] selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteRules {
    /// Substrings of the full URL that mark a live stream
    pub stream_markers: Vec<String>,
    pub api_prefix: String,
    /// Substrings of the host that mark the backend
    pub backend_hosts: Vec<String>,
    /// File extensions (without dot) served cache-first
    pub static_extensions: Vec<String>,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self {
            stream_markers: ["stream", "zeno.fm", ".mp3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            api_prefix: "/api".to_string(),
            backend_hosts: vec!["supabase".to_string()],
            static_extensions: [
                "css", "js", "png", "jpg", "jpeg", "gif", "svg", "woff", "woff2", "ttf", "eot",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl RouteRules {
    /// Pick the policy for a URL. Rules are checked in precedence order, so
    /// a stream URL bypasses even when it also looks like a static asset.
    pub fn classify(&self, url: &Url) -> RoutePolicy {
        let href = url.as_str();
        if self.stream_markers.iter().any(|m| href.contains(m.as_str())) {
            return RoutePolicy::Bypass;
        }

        let host = url.host_str().unwrap_or_default();
        if url.path().starts_with(&self.api_prefix)
            || self.backend_hosts.iter().any(|h| host.contains(h.as_str()))
        {
            return RoutePolicy::NetworkOnly;
        }

        if self.is_static_asset(url.path()) {
            return RoutePolicy::CacheFirst;
        }

        RoutePolicy::NetworkFirst
    }

    fn is_static_asset(&self, path: &str) -> bool {
        let Some((_, ext)) = path.rsplit_once('.') else {
            return false;
        };
        // A dot in a directory name is not an extension
        if ext.contains('/') {
            return false;
        }
        self.static_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }
}
