//! Webhook callback delivery.
//!
//! Best-effort: a bounded number of POST attempts with a per-attempt
//! timeout, then give up. Delivery failure never affects the triggering
//! request's own outcome; it is only logged.

use once_cell::sync::Lazy;
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::application::error::RestError;
use crate::config::CallbackSettings;
use crate::domain::snapshot::NormalizedSnapshot;
use crate::domain::status::CacheStatus;

static CLIENT: Lazy<Client> = Lazy::new(Client::new);

const HEADER_CODE: &str = "Kasha-Code";
const HEADER_CACHE_STATUS: &str = "Kasha-Cache-Status";

#[derive(Clone)]
pub struct CallbackNotifier {
    settings: CallbackSettings,
    user_agent: String,
}

impl CallbackNotifier {
    pub fn new(settings: CallbackSettings, user_agent: impl Into<String>) -> Self {
        Self {
            settings,
            user_agent: user_agent.into(),
        }
    }

    /// POST a successful result to the callback URL.
    pub async fn notify_success(
        &self,
        callback_url: &Url,
        doc: &NormalizedSnapshot,
        cache_status: CacheStatus,
    ) {
        let body = match serde_json::to_value(doc) {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    target = "application::callback",
                    error = %err,
                    "failed to encode callback body"
                );
                return;
            }
        };
        self.post(callback_url, body, "OK", Some(cache_status)).await;
    }

    /// POST an error result to the callback URL.
    pub async fn notify_error(
        &self,
        callback_url: &Url,
        error: &RestError,
        cache_status: Option<CacheStatus>,
    ) {
        self.post(callback_url, error.to_body(), error.code(), cache_status)
            .await;
    }

    async fn post(
        &self,
        callback_url: &Url,
        body: serde_json::Value,
        code: &str,
        cache_status: Option<CacheStatus>,
    ) {
        let mut tried = 0u32;

        loop {
            tried += 1;
            metrics::counter!("kasha_callback_attempt_total").increment(1);

            let mut request = CLIENT
                .post(callback_url.clone())
                .timeout(self.settings.timeout())
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .header(HEADER_CODE, code)
                .json(&body);

            if let Some(status) = cache_status {
                request = request.header(HEADER_CACHE_STATUS, status.as_str());
            }

            match request.send().await {
                Ok(response) => {
                    info!(
                        target = "application::callback",
                        callback = %callback_url,
                        code,
                        response_status = response.status().as_u16(),
                        tried,
                        "callback delivered"
                    );
                    return;
                }
                Err(err) => {
                    if tried >= self.settings.retries {
                        metrics::counter!("kasha_callback_gave_up_total").increment(1);
                        warn!(
                            target = "application::callback",
                            callback = %callback_url,
                            code,
                            error = %err,
                            tried,
                            "callback delivery abandoned"
                        );
                        return;
                    }
                }
            }
        }
    }
}
