//! Result notifier: turns a snapshot plus cache status into the final
//! delivery — a direct reply, a webhook callback, or nothing for
//! fire-and-forget requests.

use url::Url;

use crate::application::callback::CallbackNotifier;
use crate::application::error::RestError;
use crate::domain::request::RenderType;
use crate::domain::snapshot::{SnapshotDoc, normalize};
use crate::domain::status::CacheStatus;

/// How the requester wants the result shaped and delivered.
#[derive(Debug, Clone)]
pub struct DeliveryShape {
    pub render_type: RenderType,
    pub follow_redirect: bool,
    pub meta_only: bool,
    pub callback_url: Option<Url>,
    pub no_wait: bool,
}

/// Body of a direct reply, shaped by the requested render type.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Json(serde_json::Value),
    Html(String),
    Static(String),
    /// 3xx snapshot surfaced as a redirect because the caller did not ask to
    /// follow it.
    Redirect(String),
}

/// A direct reply to the synchronous caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPayload {
    pub status: u16,
    pub cache_status: CacheStatus,
    pub body: ReplyBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Reply(ReplyPayload),
    /// Nothing to send: a callback carried the result, or the request was
    /// fire-and-forget.
    Silent,
}

/// Deliver a resolved snapshot.
///
/// A doc without a usable `status`, or one whose `error` coexists with a
/// `BYPASS` resolution (the forced render itself failed and must not be
/// masked by the stale success), is reported as a failure carrying the
/// stored error code.
pub async fn deliver(
    doc: &SnapshotDoc,
    cache_status: CacheStatus,
    shape: &DeliveryShape,
    callbacks: &CallbackNotifier,
) -> Result<Delivery, RestError> {
    if !doc.has_rendered() || (doc.error.is_some() && cache_status == CacheStatus::Bypass) {
        let code = doc
            .error
            .clone()
            .unwrap_or_else(|| "RENDER_ERROR".to_string());
        return Err(RestError::render(code));
    }

    metrics::counter!("kasha_cache_status_total", "status" => cache_status.as_str()).increment(1);

    let normalized = normalize(doc, shape.meta_only);

    if let Some(callback_url) = &shape.callback_url {
        callbacks
            .notify_success(callback_url, &normalized, cache_status)
            .await;
        return Ok(Delivery::Silent);
    }

    if shape.no_wait {
        return Ok(Delivery::Silent);
    }

    let status = doc.status.unwrap_or(200);

    let body = if !shape.follow_redirect
        && matches!(status, 301 | 302 | 303 | 307 | 308)
        && doc.redirect.is_some()
    {
        ReplyBody::Redirect(doc.redirect.clone().unwrap_or_default())
    } else {
        match shape.render_type {
            RenderType::Json => ReplyBody::Json(
                serde_json::to_value(&normalized).map_err(|err| RestError::internal(&err))?,
            ),
            RenderType::Html => ReplyBody::Html(doc.html.clone().unwrap_or_default()),
            RenderType::Static => ReplyBody::Static(doc.static_html.clone().unwrap_or_default()),
        }
    };

    Ok(Delivery::Reply(ReplyPayload {
        status,
        cache_status,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallbackSettings;

    fn callbacks() -> CallbackNotifier {
        CallbackNotifier::new(CallbackSettings::default(), "kasha")
    }

    fn shape() -> DeliveryShape {
        DeliveryShape {
            render_type: RenderType::Json,
            follow_redirect: false,
            meta_only: false,
            callback_url: None,
            no_wait: false,
        }
    }

    fn rendered_doc() -> SnapshotDoc {
        SnapshotDoc {
            site: "https://example.com".to_string(),
            path: "/".to_string(),
            status: Some(200),
            html: Some("<html>ok</html>".to_string()),
            ..SnapshotDoc::default()
        }
    }

    #[tokio::test]
    async fn unrendered_doc_is_a_failure() {
        let doc = SnapshotDoc {
            error: Some("RENDER_TIMEOUT".to_string()),
            ..SnapshotDoc::default()
        };
        let err = deliver(&doc, CacheStatus::Miss, &shape(), &callbacks())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RENDER_TIMEOUT");
    }

    #[tokio::test]
    async fn bypass_does_not_mask_a_failed_refresh() {
        let mut doc = rendered_doc();
        doc.error = Some("RENDER_CRASH".to_string());

        // BYPASS means the caller forced this render; its failure surfaces.
        let err = deliver(&doc, CacheStatus::Bypass, &shape(), &callbacks())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RENDER_CRASH");

        // A non-forced resolution still serves the stale success.
        let delivery = deliver(&doc, CacheStatus::Stale, &shape(), &callbacks())
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::Reply(_)));
    }

    #[tokio::test]
    async fn json_reply_carries_the_normalized_doc() {
        let delivery = deliver(&rendered_doc(), CacheStatus::Hit, &shape(), &callbacks())
            .await
            .unwrap();
        let Delivery::Reply(payload) = delivery else {
            panic!("expected a reply");
        };
        assert_eq!(payload.status, 200);
        assert_eq!(payload.cache_status, CacheStatus::Hit);
        let ReplyBody::Json(body) = payload.body else {
            panic!("expected json body");
        };
        assert_eq!(body["url"], "https://example.com/");
    }

    #[tokio::test]
    async fn html_reply_carries_the_raw_payload() {
        let mut request_shape = shape();
        request_shape.render_type = RenderType::Html;
        let delivery = deliver(
            &rendered_doc(),
            CacheStatus::Hit,
            &request_shape,
            &callbacks(),
        )
        .await
        .unwrap();
        let Delivery::Reply(payload) = delivery else {
            panic!("expected a reply");
        };
        assert_eq!(payload.body, ReplyBody::Html("<html>ok</html>".to_string()));
    }

    #[tokio::test]
    async fn redirect_surfaces_unless_followed() {
        let mut doc = rendered_doc();
        doc.status = Some(301);
        doc.redirect = Some("https://example.com/new".to_string());

        let delivery = deliver(&doc, CacheStatus::Hit, &shape(), &callbacks())
            .await
            .unwrap();
        let Delivery::Reply(payload) = delivery else {
            panic!("expected a reply");
        };
        assert_eq!(payload.status, 301);
        assert_eq!(
            payload.body,
            ReplyBody::Redirect("https://example.com/new".to_string())
        );

        let mut follow = shape();
        follow.follow_redirect = true;
        let delivery = deliver(&doc, CacheStatus::Hit, &follow, &callbacks())
            .await
            .unwrap();
        let Delivery::Reply(payload) = delivery else {
            panic!("expected a reply");
        };
        assert!(matches!(payload.body, ReplyBody::Json(_)));
    }

    #[tokio::test]
    async fn no_wait_without_callback_is_silent() {
        let mut request_shape = shape();
        request_shape.no_wait = true;
        let delivery = deliver(
            &rendered_doc(),
            CacheStatus::Hit,
            &request_shape,
            &callbacks(),
        )
        .await
        .unwrap();
        assert_eq!(delivery, Delivery::Silent);
    }
}
