// src/keys.rs

//! Caller identity and counter key derivation.

use chrono::{DateTime, Utc};
use http::header::HeaderMap;
use http::Request;
use std::fmt;
use std::net::SocketAddr;

use crate::config::RateLimitControl;

/// Header carrying the proxy chain, client first
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity fields of one request, supplied by the integration layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Identity counters are kept against
    pub client_key: String,
    /// Presence of a non-empty value marks the caller as authenticated
    pub auth_key: Option<String>,
}

/// Request extension an upstream layer can insert to pin the client identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

/// Request extension an upstream authentication layer inserts for signed-in callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthKey(pub String);

impl RequestContext {
    pub fn new(client_key: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            auth_key: None,
        }
    }

    pub fn with_auth_key(mut self, auth_key: impl Into<String>) -> Self {
        self.auth_key = Some(auth_key.into());
        self
    }

    /// Pick the client identity: explicit key, then the first forwarded-for
    /// hop, then the peer address.
    ///
    /// Falls back to `"unknown"` when none is available so that anonymous
    /// callers still share a counter instead of bypassing the limit.
    pub fn from_parts(
        client_key: Option<&str>,
        headers: &HeaderMap,
        peer_addr: Option<SocketAddr>,
        auth_key: Option<&str>,
    ) -> Self {
        let client_key = client_key
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or_else(|| forwarded_client(headers))
            .or_else(|| peer_addr.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            client_key,
            auth_key: auth_key.map(str::to_string),
        }
    }

    /// Build the context from an `http::Request`, reading [`ClientKey`] and
    /// [`AuthKey`] extensions when an upstream layer set them
    pub fn from_request<B>(request: &Request<B>, peer_addr: Option<SocketAddr>) -> Self {
        let extensions = request.extensions();
        Self::from_parts(
            extensions.get::<ClientKey>().map(|key| key.0.as_str()),
            request.headers(),
            peer_addr,
            extensions.get::<AuthKey>().map(|key| key.0.as_str()),
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string)
}

/// Store keys a request counts against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKeys {
    /// Window counter for the client (and endpoint, unless limits are global)
    pub client: String,
    /// One-second bucket, present only when a DoS ceiling is configured
    pub dos: Option<String>,
}

impl CounterKeys {
    pub fn derive(
        namespace: &str,
        ctx: &RequestContext,
        endpoint_id: &str,
        control: &RateLimitControl,
        now: DateTime<Utc>,
    ) -> Self {
        let client = if control.global_limit {
            format!("{}:{}", namespace, ctx.client_key)
        } else {
            format!("{}:{}:{}", namespace, ctx.client_key, endpoint_id)
        };

        // bucket on the UTC epoch second so every instance picks the same key
        let dos = control.dos_limit.map(|_| {
            format!("{}:dos:{}:{}", namespace, ctx.client_key, now.timestamp())
        });

        Self { client, dos }
    }
}

impl fmt::Display for CounterKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dos {
            Some(dos) => write!(f, "{} (dos: {})", self.client, dos),
            None => write!(f, "{}", self.client),
        }
    }
}
