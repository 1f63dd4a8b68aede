//! Client-facing coded errors.
//!
//! Every error carries a machine-readable code and a message safe to render
//! to callers. Unexpected internal failures (store or broker unreachable)
//! are logged server-side under a freshly minted incident id; only the id
//! crosses the boundary.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::request::RequestValidationError;
use crate::domain::site::SiteError;

#[derive(Debug, Clone, Error)]
pub enum RestError {
    #[error("invalid parameter: {field}")]
    InvalidParam { field: &'static str },
    #[error("failed to rewrite URL: {url}")]
    UrlRewrite { url: String },
    #[error("not found")]
    NotFound,
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
    /// Internal signal only; always converted into a stale serve or a
    /// re-classification before reaching a caller.
    #[error("cache lock wait timed out")]
    CacheLockTimeout,
    #[error("internal error (incident {incident_id})")]
    Internal { incident_id: Uuid },
    /// A render failure code propagated from the stored document.
    #[error("render failed: {code}")]
    Render { code: String },
}

impl RestError {
    /// Mint an incident id, log the real error under it, and return the
    /// opaque error the caller sees.
    pub fn internal(err: &dyn std::error::Error) -> Self {
        let incident_id = Uuid::new_v4();
        tracing::error!(
            target = "application::error",
            error = %err,
            incident_id = %incident_id,
            "internal failure"
        );
        RestError::Internal { incident_id }
    }

    pub fn render(code: impl Into<String>) -> Self {
        RestError::Render { code: code.into() }
    }

    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        RestError::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            RestError::InvalidParam { .. } => "INVALID_PARAM",
            RestError::UrlRewrite { .. } => "URL_REWRITE_ERROR",
            RestError::NotFound => "NOT_FOUND",
            RestError::Fetch { .. } => "FETCH_ERROR",
            RestError::CacheLockTimeout => "CACHE_LOCK_TIMEOUT",
            RestError::Internal { .. } => "INTERNAL_ERROR",
            RestError::Render { code } => code,
        }
    }

    /// HTTP status the embedding server should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            RestError::InvalidParam { .. } => 400,
            RestError::UrlRewrite { .. } => 500,
            RestError::NotFound => 404,
            RestError::Fetch { .. } => 502,
            RestError::CacheLockTimeout => 503,
            RestError::Internal { .. } => 500,
            RestError::Render { .. } => 500,
        }
    }

    /// JSON body for replies and webhook callbacks.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<RequestValidationError> for RestError {
    fn from(err: RequestValidationError) -> Self {
        match err {
            RequestValidationError::InvalidUrl => RestError::InvalidParam { field: "url" },
            RequestValidationError::InvalidCallbackUrl => RestError::InvalidParam {
                field: "callbackURL",
            },
        }
    }
}

impl From<SiteError> for RestError {
    fn from(err: SiteError) -> Self {
        match err {
            SiteError::UnknownProfile(_) => RestError::InvalidParam { field: "profile" },
        }
    }
}
