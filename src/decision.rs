// src/decision.rs

//! Rate limit decisions and how they are written back onto HTTP responses.

use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Response, StatusCode};
use std::fmt;
use std::time::Duration;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Telemetry for the limit a request was counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    /// When the counter expires and the window starts over
    pub reset_at: DateTime<Utc>,
}

/// Why a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Too many requests within one second
    DosCeiling,
    /// The authenticated or unauthenticated tier is used up for this window
    WindowLimit { window_minutes: u32 },
    /// The store could not answer and the policy is fail-closed
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub quota: Quota,
    pub reason: DenyReason,
    /// Whole seconds until retrying can succeed, at least 1
    pub retry_after: Duration,
}

impl Denial {
    pub fn description(&self) -> String {
        match self.reason {
            DenyReason::DosCeiling => format!(
                "Client exceeded rate limit of {} requests per second.",
                self.quota.limit
            ),
            DenyReason::WindowLimit { window_minutes } => format!(
                "Client exceeded rate limit of {} requests per {} minutes.",
                self.quota.limit, window_minutes
            ),
            DenyReason::StoreUnavailable => {
                "Rate limit could not be verified, retry shortly.".to_string()
            }
        }
    }
}

/// Result of evaluating one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Limiting is off or unbounded for this caller; no headers are written
    PassThrough,
    Allowed(Quota),
    Denied(Denial),
}

/// What the framework integration should do next
#[derive(Debug)]
pub enum Outcome {
    /// Run the wrapped handler, then attach these headers to its response
    Proceed(HeaderMap),
    /// Return this response without running the handler
    Reject(Response<String>),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied(_))
    }

    pub fn quota(&self) -> Option<&Quota> {
        match self {
            Decision::PassThrough => None,
            Decision::Allowed(quota) => Some(quota),
            Decision::Denied(denial) => Some(&denial.quota),
        }
    }

    /// Short label used in logs and tooling
    pub fn label(&self) -> &'static str {
        match self {
            Decision::PassThrough => "pass_through",
            Decision::Allowed(_) => "allowed",
            Decision::Denied(Denial {
                reason: DenyReason::DosCeiling,
                ..
            }) => "denied_dos",
            Decision::Denied(Denial {
                reason: DenyReason::WindowLimit { .. },
                ..
            }) => "denied_limit",
            Decision::Denied(Denial {
                reason: DenyReason::StoreUnavailable,
                ..
            }) => "denied_store_unavailable",
        }
    }

    /// Rate limit headers for this decision; empty for pass-through
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.write_headers(&mut headers);
        headers
    }

    /// Insert the rate limit headers, plus `Retry-After` when denied
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let Some(quota) = self.quota() else {
            return;
        };

        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(quota.reset_at.timestamp()));

        if let Decision::Denied(denial) = self {
            headers.insert(RETRY_AFTER, HeaderValue::from(denial.retry_after.as_secs()));
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Decision::Denied(denial) => Outcome::Reject(self.rejection(denial)),
            _ => Outcome::Proceed(self.headers()),
        }
    }

    /// Decorate a response produced by the wrapped handler.
    ///
    /// A denied decision also turns the status into 429, for integrations
    /// that build their own error body.
    pub fn apply<B>(&self, response: &mut Response<B>) {
        self.write_headers(response.headers_mut());
        if !self.is_allowed() {
            *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        }
    }

    fn rejection(&self, denial: &Denial) -> Response<String> {
        let body = serde_json::json!({
            "title": "Too Many Requests",
            "description": denial.description(),
        })
        .to_string();

        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.write_headers(response.headers_mut());
        response
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quota() {
            Some(quota) => write!(
                f,
                "{} (limit={}, remaining={}, reset={})",
                self.label(),
                quota.limit,
                quota.remaining,
                quota.reset_at.timestamp()
            ),
            None => f.write_str(self.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(remaining: u64) -> Quota {
        Quota {
            limit: 3,
            remaining,
            reset_at: DateTime::from_timestamp(1_700_000_060, 0).unwrap(),
        }
    }

    fn header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
        headers.get(name).and_then(|value| value.to_str().ok())
    }

    #[test]
    fn test_pass_through_writes_nothing() {
        let decision = Decision::PassThrough;
        assert!(decision.is_allowed());
        assert!(decision.headers().is_empty());

        match decision.outcome() {
            Outcome::Proceed(headers) => assert!(headers.is_empty()),
            Outcome::Reject(_) => panic!("pass-through must proceed"),
        }
    }

    #[test]
    fn test_allowed_sets_three_headers() {
        let headers = Decision::Allowed(quota(2)).headers();

        assert_eq!(header(&headers, &X_RATELIMIT_LIMIT), Some("3"));
        assert_eq!(header(&headers, &X_RATELIMIT_REMAINING), Some("2"));
        assert_eq!(header(&headers, &X_RATELIMIT_RESET), Some("1700000060"));
        assert!(headers.get(RETRY_AFTER).is_none());
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_denied_outcome_is_429_with_headers_and_body() {
        let decision = Decision::Denied(Denial {
            quota: quota(0),
            reason: DenyReason::WindowLimit { window_minutes: 1 },
            retry_after: Duration::from_secs(42),
        });

        let Outcome::Reject(response) = decision.outcome() else {
            panic!("denied must reject");
        };

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(header(headers, &X_RATELIMIT_LIMIT), Some("3"));
        assert_eq!(header(headers, &X_RATELIMIT_REMAINING), Some("0"));
        assert_eq!(header(headers, &X_RATELIMIT_RESET), Some("1700000060"));
        assert_eq!(header(headers, &RETRY_AFTER), Some("42"));
        assert_eq!(header(headers, &CONTENT_TYPE), Some("application/json"));

        let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(body["title"], "Too Many Requests");
        assert_eq!(
            body["description"],
            "Client exceeded rate limit of 3 requests per 1 minutes."
        );
    }

    #[test]
    fn test_dos_description() {
        let denial = Denial {
            quota: quota(0),
            reason: DenyReason::DosCeiling,
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(
            denial.description(),
            "Client exceeded rate limit of 3 requests per second."
        );
    }

    #[test]
    fn test_apply_onto_handler_response() {
        let mut response = Response::new(());
        Decision::Allowed(quota(1)).apply(&mut response);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(response.headers(), &X_RATELIMIT_REMAINING), Some("1"));

        let mut response = Response::new(());
        Decision::Denied(Denial {
            quota: quota(0),
            reason: DenyReason::DosCeiling,
            retry_after: Duration::from_secs(1),
        })
        .apply(&mut response);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(response.headers(), &RETRY_AFTER), Some("1"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Decision::PassThrough.to_string(), "pass_through");
        assert_eq!(
            Decision::Allowed(quota(2)).to_string(),
            "allowed (limit=3, remaining=2, reset=1700000060)"
        );
    }
}
