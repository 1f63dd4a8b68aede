//! Incoming render request model and fail-fast validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Cache keys are persisted in an index with a hard size bound; the encoded
/// target URL must leave room for structural overhead.
pub const MAX_URL_BYTES: usize = 896;

/// Output shape requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenderType {
    #[default]
    Html,
    Static,
    Json,
}

/// One incoming call, as received from the transport layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderRequest {
    pub url: String,
    #[serde(rename = "callbackURL")]
    pub callback_url: Option<String>,
    #[serde(rename = "type")]
    pub render_type: RenderType,
    pub profile: Option<String>,
    pub no_wait: bool,
    pub follow_redirect: bool,
    pub meta_only: bool,
    pub refresh: bool,
    pub fallback: bool,
}

/// A request that passed parameter validation.
///
/// `render_type` is already coerced to `json` when a callback URL or
/// `meta_only` is requested, since neither delivery path can carry raw
/// html/static payloads.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub url: Url,
    pub callback_url: Option<Url>,
    pub render_type: RenderType,
    pub profile: Option<String>,
    pub no_wait: bool,
    pub follow_redirect: bool,
    pub meta_only: bool,
    pub refresh: bool,
    pub fallback: bool,
}

#[derive(Debug, Error)]
pub enum RequestValidationError {
    #[error("target URL is missing, oversized, or not an http(s) URL")]
    InvalidUrl,
    #[error("callback URL is not an http(s) URL")]
    InvalidCallbackUrl,
}

impl RenderRequest {
    /// Validate all parameters before any I/O happens.
    pub fn validate(self) -> Result<ValidatedRequest, RequestValidationError> {
        if self.url.len() > MAX_URL_BYTES {
            return Err(RequestValidationError::InvalidUrl);
        }

        let url = Url::parse(&self.url).map_err(|_| RequestValidationError::InvalidUrl)?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestValidationError::InvalidUrl);
        }

        let callback_url = match self.callback_url {
            Some(raw) => {
                let parsed =
                    Url::parse(&raw).map_err(|_| RequestValidationError::InvalidCallbackUrl)?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(RequestValidationError::InvalidCallbackUrl);
                }
                Some(parsed)
            }
            None => None,
        };

        let render_type = if callback_url.is_some() || self.meta_only {
            RenderType::Json
        } else {
            self.render_type
        };

        Ok(ValidatedRequest {
            url,
            callback_url,
            render_type,
            profile: self.profile,
            no_wait: self.no_wait,
            follow_redirect: self.follow_redirect,
            meta_only: self.meta_only,
            refresh: self.refresh,
            fallback: self.fallback,
        })
    }
}
