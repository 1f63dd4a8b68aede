//! Live-fetch collaborator contract.
//!
//! Used for pass-through (excluded paths) and for `fallback` pre-fetches.
//! The byte-pumping reverse proxy itself is external; this core only shapes
//! the request context and post-edits response headers on the fallback path.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProxyError {
    pub message: String,
}

impl ProxyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Context the proxy forwards alongside the target URL.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    pub user_agent: Option<String>,
    pub follow_redirect: bool,
}

/// A proxied origin response. Header names are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: u16, body: Bytes) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    /// Header edits applied to fallback answers: a short cache lifetime, a
    /// `Vary` hint so downstream caches key on profile/fallback, and no
    /// origin `Expires` contradicting the short max-age.
    pub fn mark_fallback(&mut self) {
        self.set_header("Cache-Control", "max-age=10");
        self.set_header("Vary", "Kasha-Profile, Kasha-Fallback");
        self.remove_header("Expires");
    }
}

#[async_trait]
pub trait ProxyFetcher: Send + Sync {
    /// Fetch the target URL on behalf of the request.
    async fn fetch(&self, target: &str, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_header_edits() {
        let mut response = ProxyResponse::new(200, Bytes::from_static(b"<html></html>"));
        response.set_header("expires", "Wed, 01 Jan 2025 00:00:00 GMT");
        response.set_header("Cache-Control", "max-age=86400");

        response.mark_fallback();

        assert_eq!(response.header("cache-control"), Some("max-age=10"));
        assert_eq!(
            response.header("vary"),
            Some("Kasha-Profile, Kasha-Fallback")
        );
        assert!(response.header("Expires").is_none());
    }
}
