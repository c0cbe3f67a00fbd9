// src/middleware.rs

//! Per-request entry point a web framework integration calls.

use http::{Request, Response};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::{ControlOverride, LimiterConfig, RateLimitControl};
use crate::decision::{Decision, Outcome};
use crate::error::Result;
use crate::keys::{CounterKeys, RequestContext};
use crate::limiter::RateLimiter;
use crate::rate_limit_event;
use crate::storage::{CounterSnapshot, CounterStore};

/// Rate limiting for one application.
///
/// Holds the global control and the per-endpoint controls registered at
/// startup. The counter store is injected and may be shared with other
/// middleware instances.
#[derive(Debug)]
pub struct RateLimitMiddleware<S>
where
    S: CounterStore,
{
    limiter: RateLimiter<S>,
    key_prefix: String,
    control: ControlOverride,
    resources: HashMap<String, ControlOverride>,
}

impl<S> RateLimitMiddleware<S>
where
    S: CounterStore,
{
    /// Validates `config` and builds the middleware over `store`
    pub fn new(store: S, config: LimiterConfig) -> Result<Self> {
        config.validate()?;

        let limiter = RateLimiter::new(store, &config);
        info!(
            key_prefix = %config.key_prefix,
            failure_policy = ?config.failure_policy,
            resources = config.resources.len(),
            "Rate limit middleware ready"
        );

        Ok(Self {
            limiter,
            key_prefix: config.key_prefix,
            control: config.control,
            resources: config.resources,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.limiter = self.limiter.with_clock(clock);
        self
    }

    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    /// Effective control for `endpoint`.
    ///
    /// An explicit `resource` control wins over one registered for the
    /// endpoint in the configuration.
    pub fn control_for(
        &self,
        endpoint: &str,
        resource: Option<&ControlOverride>,
    ) -> RateLimitControl {
        let resource = resource.or_else(|| self.resources.get(endpoint));
        RateLimitControl::resolve(&self.control, resource)
    }

    /// Count the request and decide whether it may reach `endpoint`
    pub async fn process(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        resource: Option<&ControlOverride>,
    ) -> Decision {
        let control = self.control_for(endpoint, resource);
        if !control.is_active() {
            return Decision::PassThrough;
        }

        let now = self.limiter.now();
        let keys = CounterKeys::derive(&self.key_prefix, ctx, endpoint, &control, now);
        let decision = self
            .limiter
            .evaluate(&control, &keys, ctx.is_authenticated(), now)
            .await;

        let quota = decision.quota();
        rate_limit_event!(
            ctx.client_key.as_str(),
            endpoint,
            decision.label(),
            quota.map(|quota| quota.limit),
            quota.map(|quota| quota.remaining)
        );

        decision
    }

    /// Run `handler` behind the rate limit.
    ///
    /// A denied request gets the 429 response and `handler` is never
    /// called. Otherwise the handler's response is returned with the rate
    /// limit headers attached.
    pub async fn handle<B, R, F, Fut>(
        &self,
        request: Request<B>,
        peer_addr: Option<SocketAddr>,
        endpoint: &str,
        handler: F,
    ) -> Response<R>
    where
        R: From<String>,
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Response<R>>,
    {
        let ctx = RequestContext::from_request(&request, peer_addr);
        let decision = self.process(&ctx, endpoint, None).await;

        match decision.outcome() {
            Outcome::Reject(response) => response.map(R::from),
            Outcome::Proceed(headers) => {
                let mut response = handler(request).await;
                response.headers_mut().extend(headers);
                response
            }
        }
    }

    /// Current window counter for a caller, without counting a request
    pub async fn peek(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
    ) -> Result<Option<CounterSnapshot>> {
        let control = self.control_for(endpoint, None);
        let keys = CounterKeys::derive(
            &self.key_prefix,
            ctx,
            endpoint,
            &control,
            self.limiter.now(),
        );
        self.limiter.store().peek(&keys.client).await
    }
}
