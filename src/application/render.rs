//! Render orchestration.
//!
//! Binds the policy resolver, canonicalizer, state machine, lock
//! coordinator, dispatcher, and notifier into one request flow. Requests
//! with `noWait` or a callback URL are acknowledged immediately and continue
//! in a detached task whose failures are forwarded to the callback.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

use crate::application::callback::CallbackNotifier;
use crate::application::canonical::{canonicalize, is_excluded};
use crate::application::classify::{Decision, FreshnessPolicy, classify, status_after_wait};
use crate::application::deliver::{Delivery, DeliveryShape, ReplyPayload, deliver};
use crate::application::dispatch::{DispatchMessage, Dispatcher};
use crate::application::error::RestError;
use crate::application::poll::await_release;
use crate::application::responder::WorkerResponder;
use crate::config::Settings;
use crate::domain::request::{RenderRequest, ValidatedRequest};
use crate::domain::site::{EffectiveSettings, SiteConfig, resolve};
use crate::domain::snapshot::{CacheKey, SnapshotDoc, is_valid_http_status};
use crate::domain::status::CacheStatus;
use crate::infra::broker::Broker;
use crate::infra::proxy::{ProxyFetcher, ProxyRequest, ProxyResponse};
use crate::infra::store::DocumentStore;

/// What the embedding server turns into an HTTP response.
#[derive(Debug)]
pub enum RenderOutcome {
    /// Accepted for asynchronous processing; reply `{"queued": true}`.
    Queued,
    /// A resolved snapshot, shaped for the requested type.
    Reply(ReplyPayload),
    /// A live origin response (pass-through or fallback).
    Proxied(ProxyResponse),
}

/// Everything one request's remaining pipeline needs once the URL has been
/// canonicalized and policy resolved.
#[derive(Clone)]
struct RequestPlan {
    key: CacheKey,
    now: OffsetDateTime,
    refresh: bool,
    service_unavailable: bool,
    shape: DeliveryShape,
    message: DispatchMessage,
}

pub struct RenderService<S, B, P> {
    store: Arc<S>,
    proxy: Arc<P>,
    dispatcher: Arc<Dispatcher<B>>,
    callbacks: CallbackNotifier,
    settings: Arc<Settings>,
}

impl<S, B, P> Clone for RenderService<S, B, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            proxy: Arc::clone(&self.proxy),
            dispatcher: Arc::clone(&self.dispatcher),
            callbacks: self.callbacks.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<S, B, P> RenderService<S, B, P>
where
    S: DocumentStore + 'static,
    B: Broker + 'static,
    P: ProxyFetcher + 'static,
{
    pub fn new(
        store: Arc<S>,
        broker: Arc<B>,
        proxy: Arc<P>,
        responder: Arc<WorkerResponder>,
        settings: Settings,
    ) -> Self {
        let callbacks =
            CallbackNotifier::new(settings.callback.clone(), settings.service.user_agent.clone());
        let dispatcher = Arc::new(Dispatcher::new(broker, responder, settings.broker.clone()));

        Self {
            store,
            proxy,
            dispatcher,
            callbacks,
            settings: Arc::new(settings),
        }
    }

    /// Resolve one render request.
    pub async fn render(
        &self,
        request: RenderRequest,
        site: &SiteConfig,
    ) -> Result<RenderOutcome, RestError> {
        let now = OffsetDateTime::now_utc();
        let request = request.validate()?;
        let settings = resolve(
            site,
            request.profile.as_deref(),
            now,
            self.settings.freshness.unavailable_window(),
        )?;

        if request.no_wait || request.callback_url.is_some() {
            // Acknowledge now; the pipeline continues detached, with its
            // failures forwarded to the callback when one exists.
            let service = self.clone();
            let callback_url = request.callback_url.clone();
            self.detach(callback_url, async move {
                service.handle(request, settings, now).await
            });
            return Ok(RenderOutcome::Queued);
        }

        self.handle(request, settings, now).await
    }

    async fn handle(
        &self,
        request: ValidatedRequest,
        settings: EffectiveSettings,
        now: OffsetDateTime,
    ) -> Result<RenderOutcome, RestError> {
        // An unavailable origin must not be fetched live.
        let fallback = request.fallback && !settings.service_unavailable;

        let canonical = canonicalize(&request.url, &settings)?;

        debug!(
            target = "application::render",
            site = %request.url.origin().ascii_serialization(),
            path = %canonical.path,
            profile = ?settings.profile,
            refresh = request.refresh,
            fallback,
            no_wait = request.no_wait,
            "handling render request"
        );

        let proxy_request = ProxyRequest {
            user_agent: settings.user_agent.clone(),
            follow_redirect: request.follow_redirect,
        };

        if is_excluded(&settings, request.url.path()) {
            metrics::counter!("kasha_passthrough_total").increment(1);
            let response = self
                .proxy
                .fetch(&canonical.target, &proxy_request)
                .await
                .map_err(|err| RestError::fetch(request.url.as_str(), err.to_string()))?;
            return Ok(RenderOutcome::Proxied(response));
        }

        let key = CacheKey {
            site: request.url.origin().ascii_serialization(),
            path: canonical.path.clone(),
            profile: settings.profile.clone(),
        };

        let doc = self
            .store
            .find_one(&key)
            .await
            .map_err(|err| RestError::internal(&err))?;

        let mut plan = RequestPlan {
            key: key.clone(),
            now,
            refresh: request.refresh,
            service_unavailable: settings.service_unavailable,
            shape: DeliveryShape {
                render_type: request.render_type,
                follow_redirect: request.follow_redirect,
                meta_only: request.meta_only,
                callback_url: request.callback_url.clone(),
                no_wait: request.no_wait,
            },
            message: DispatchMessage {
                site: key.site.clone(),
                path: key.path.clone(),
                profile: key.profile.clone(),
                user_agent: settings.user_agent.clone(),
                rewrites: settings.rewrites.clone(),
                callback_url: request.callback_url.as_ref().map(|u| u.to_string()),
                meta_only: request.meta_only,
                cache_status: None,
                reply_to: None,
                correlation_id: None,
            },
        };

        if fallback && fallback_needed(doc.as_ref(), now) {
            let mut response = self
                .proxy
                .fetch(&canonical.target, &proxy_request)
                .await
                .map_err(|err| RestError::fetch(request.url.as_str(), err.to_string()))?;
            response.mark_fallback();
            metrics::counter!("kasha_fallback_fetch_total").increment(1);

            // The live answer satisfies this request; classification still
            // runs to keep the stored cache current, but silently.
            plan.shape.no_wait = true;
            let service = self.clone();
            let callback_url = plan.shape.callback_url.clone();
            self.detach(callback_url, async move {
                service.resolve_cache(plan, doc).await
            });

            return Ok(RenderOutcome::Proxied(response));
        }

        self.resolve_cache(plan, doc).await
    }

    /// Classification and everything downstream of it.
    async fn resolve_cache(
        &self,
        plan: RequestPlan,
        doc: Option<SnapshotDoc>,
    ) -> Result<RenderOutcome, RestError> {
        let policy = FreshnessPolicy {
            lock_timeout: self.settings.lock.timeout(),
            refresh_ahead: self.settings.freshness.refresh_ahead(),
        };

        let Some(doc) = doc else {
            let cache_status = if plan.refresh {
                CacheStatus::Bypass
            } else {
                CacheStatus::Miss
            };
            return self.dispatch(&plan, cache_status).await;
        };

        match classify(
            Some(&doc),
            plan.now,
            plan.refresh,
            plan.service_unavailable,
            &policy,
        ) {
            Decision::Serve {
                cache_status,
                background_refresh,
            } => {
                if background_refresh {
                    self.spawn_background_refresh(&plan);
                }
                self.finish(&doc, cache_status, &plan.shape).await
            }
            Decision::Dispatch { cache_status } => self.dispatch(&plan, cache_status).await,
            Decision::AwaitLock { token } => {
                let had_status = doc.has_rendered();
                let waited = await_release(
                    self.store.as_ref(),
                    &plan.key,
                    &token,
                    self.settings.lock.timeout(),
                    self.settings.lock.poll_interval(),
                )
                .await;

                match waited {
                    Ok(fresh) => {
                        let cache_status = status_after_wait(plan.refresh, had_status);
                        match self.finish(&fresh, cache_status, &plan.shape).await {
                            Ok(outcome) => Ok(outcome),
                            // The awaited render itself failed; fall back to
                            // the refreshed doc if it is still usable.
                            Err(err) => self.degrade(&fresh, err, &plan).await,
                        }
                    }
                    Err(err) => self.degrade(&doc, err, &plan).await,
                }
            }
        }
    }

    /// Serve a stale doc instead of surfacing a lock-wait failure, unless
    /// the caller demanded a fresh render.
    async fn degrade(
        &self,
        doc: &SnapshotDoc,
        err: RestError,
        plan: &RequestPlan,
    ) -> Result<RenderOutcome, RestError> {
        if doc.has_rendered() && !plan.refresh {
            let cache_status = if doc.private_fresh(plan.now) {
                CacheStatus::Hit
            } else {
                CacheStatus::Stale
            };
            return self.finish(doc, cache_status, &plan.shape).await;
        }
        Err(err)
    }

    async fn dispatch(
        &self,
        plan: &RequestPlan,
        cache_status: CacheStatus,
    ) -> Result<RenderOutcome, RestError> {
        let mut message = plan.message.clone();
        message.cache_status = Some(cache_status);

        if plan.shape.no_wait || plan.shape.callback_url.is_some() {
            // The worker owns result delivery from here.
            self.dispatcher.dispatch_async(&message).await?;
            return Ok(RenderOutcome::Queued);
        }

        let reply = self.dispatcher.dispatch_sync(&message).await?;
        let cache_status = reply.cache_status.unwrap_or(cache_status);
        self.finish(&reply.doc, cache_status, &plan.shape).await
    }

    async fn finish(
        &self,
        doc: &SnapshotDoc,
        cache_status: CacheStatus,
        shape: &DeliveryShape,
    ) -> Result<RenderOutcome, RestError> {
        match deliver(doc, cache_status, shape, &self.callbacks).await? {
            Delivery::Reply(payload) => Ok(RenderOutcome::Reply(payload)),
            Delivery::Silent => Ok(RenderOutcome::Queued),
        }
    }

    /// Fire a non-blocking refresh dispatch: async delivery, no callback,
    /// no cache status (the worker records it as a refresh).
    fn spawn_background_refresh(&self, plan: &RequestPlan) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut message = plan.message.clone();
        message.callback_url = None;
        message.cache_status = None;
        let key = plan.key.clone();

        tokio::spawn(async move {
            debug!(
                target = "application::render",
                key = %key,
                "background refresh dispatch"
            );
            if let Err(err) = dispatcher.dispatch_async(&message).await {
                warn!(
                    target = "application::render",
                    key = %key,
                    error = %err,
                    "background refresh dispatch failed"
                );
            }
        });
    }

    /// Run a pipeline fragment detached from the response path, forwarding
    /// failures to the callback when one exists.
    fn detach<F>(&self, callback_url: Option<Url>, fut: F)
    where
        F: std::future::Future<Output = Result<RenderOutcome, RestError>> + Send + 'static,
    {
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                match callback_url {
                    Some(url) => callbacks.notify_error(&url, &err, None).await,
                    None => warn!(
                        target = "application::render",
                        error = %err,
                        "detached render pipeline failed"
                    ),
                }
            }
        });
    }
}

/// Whether the current request must be answered by a live fetch: no usable
/// snapshot exists, or the stored one is past private freshness.
fn fallback_needed(doc: Option<&SnapshotDoc>, now: OffsetDateTime) -> bool {
    match doc {
        None => true,
        Some(doc) => !is_valid_http_status(doc.status) || doc.private_expired(now),
    }
}
