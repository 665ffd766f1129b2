//! Request and response values exchanged with the cache and the network.
//!
//! These mirror the parts of the Fetch API the offline policies look at:
//! method, URL, destination and mode on the request side; status, headers,
//! body and response type on the response side.

use std::fmt;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// What kind of resource a request is fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    Other,
}

impl Destination {
    /// Guess the destination from a path's file extension.
    /// Paths ending in `/` or without an extension are treated as documents.
    pub fn from_path(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or_default();
        let ext = match file.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return Destination::Document,
        };
        match ext.as_str() {
            "html" | "htm" => Destination::Document,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "avif" => Destination::Image,
            "js" | "mjs" => Destination::Script,
            "css" => Destination::Style,
            "woff" | "woff2" | "ttf" | "otf" => Destination::Font,
            "json" | "webmanifest" => Destination::Manifest,
            _ => Destination::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

/// How the response crossed the origin boundary.
///
/// Cache-first and stale-while-revalidate only store `Basic` (same-origin)
/// responses; `Opaque` responses hide their real status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseType {
    Basic,
    Cors,
    Opaque,
    Default,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub mode: RequestMode,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: Destination::Other,
            mode: RequestMode::Cors,
            headers: Vec::new(),
        }
    }

    /// A plain GET, the kind the precache issues.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A top-level page navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// HTML navigations count as documents even when the destination was not set.
    pub fn is_document(&self) -> bool {
        self.destination == Destination::Document || self.mode == RequestMode::Navigate
    }

    pub fn is_image(&self) -> bool {
        self.destination == Destination::Image
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }
}

/// Identity of a cached entry: method plus URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        CacheKey(format!("{} {}", method.as_str(), url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URL half of the key.
    pub fn url(&self) -> &str {
        self.0.split_once(' ').map(|(_, url)| url).unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
    pub response_type: ResponseType,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_text,
            headers: Vec::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
        }
    }

    /// Empty placeholder served for images that cannot be fetched.
    pub fn no_content() -> Self {
        Self::new(204, Vec::<u8>::new()).with_type(ResponseType::Default)
    }

    /// Plain-text page served for documents that are neither reachable nor cached.
    pub fn service_unavailable() -> Self {
        Self::new(503, "Offline")
            .with_header("Content-Type", "text/plain")
            .with_type(ResponseType::Default)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 2xx status, the bar a precached asset has to clear.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A full 200 from our own origin.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.response_type == ResponseType::Basic
    }
}

/// Bodies are stored as base64 strings rather than arrays of numbers.
mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
