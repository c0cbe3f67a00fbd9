// src/config/control.rs

//! Rate limit control: the serde shape operators write, and the effective
//! per-request control the evaluator reads.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::Result;

/// Window length used when neither the global nor the resource control sets one
pub const DEFAULT_LIMIT_WINDOW_MINUTES: u32 = 30;

/// A partially specified control.
///
/// Every field is optional: a field that is absent (or `null`) leaves the
/// value underneath it untouched when controls are layered. Negative limits
/// and a zero window cannot be represented and are rejected while
/// deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Requests per window for authenticated callers; `0` means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated_limit: Option<u64>,

    /// Requests per window for unauthenticated callers; `0` means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unauthenticated_limit: Option<u64>,

    /// Requests per second regardless of authentication; `0` means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dos_limit: Option<u64>,

    /// Share one counter across all endpoints for a client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_limit: Option<bool>,

    /// Window length in minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_window: Option<NonZeroU32>,
}

impl ControlOverride {
    /// Parse a control from a JSON object
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn authenticated_limit(mut self, limit: u64) -> Self {
        self.authenticated_limit = Some(limit);
        self
    }

    pub fn unauthenticated_limit(mut self, limit: u64) -> Self {
        self.unauthenticated_limit = Some(limit);
        self
    }

    pub fn dos_limit(mut self, limit: u64) -> Self {
        self.dos_limit = Some(limit);
        self
    }

    pub fn global_limit(mut self, global: bool) -> Self {
        self.global_limit = Some(global);
        self
    }

    pub fn limit_window(mut self, minutes: NonZeroU32) -> Self {
        self.limit_window = Some(minutes);
        self
    }
}

/// The effective control for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitControl {
    pub enabled: bool,
    pub authenticated_limit: Option<u64>,
    pub unauthenticated_limit: Option<u64>,
    pub dos_limit: Option<u64>,
    pub global_limit: bool,
    /// Window length in minutes
    pub limit_window: NonZeroU32,
}

impl Default for RateLimitControl {
    fn default() -> Self {
        Self {
            enabled: false,
            authenticated_limit: None,
            unauthenticated_limit: None,
            dos_limit: None,
            global_limit: true,
            limit_window: NonZeroU32::new(DEFAULT_LIMIT_WINDOW_MINUTES)
                .unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl RateLimitControl {
    /// Layer defaults, then the global control, then the resource control.
    ///
    /// Resource values win over global values, which win over defaults, and
    /// only fields that are actually present take part.
    pub fn resolve(global: &ControlOverride, resource: Option<&ControlOverride>) -> Self {
        let control = Self::default().overlay(global);
        match resource {
            Some(resource) => control.overlay(resource),
            None => control,
        }
    }

    /// Copy every field present in `layer` over this control
    pub fn overlay(mut self, layer: &ControlOverride) -> Self {
        if let Some(enabled) = layer.enabled {
            self.enabled = enabled;
        }
        if let Some(limit) = layer.authenticated_limit {
            self.authenticated_limit = non_zero(limit);
        }
        if let Some(limit) = layer.unauthenticated_limit {
            self.unauthenticated_limit = non_zero(limit);
        }
        if let Some(limit) = layer.dos_limit {
            self.dos_limit = non_zero(limit);
        }
        if let Some(global) = layer.global_limit {
            self.global_limit = global;
        }
        if let Some(window) = layer.limit_window {
            self.limit_window = window;
        }
        self
    }

    /// Enabled with at least one limit to enforce
    pub fn is_active(&self) -> bool {
        self.enabled
            && (self.authenticated_limit.is_some()
                || self.unauthenticated_limit.is_some()
                || self.dos_limit.is_some())
    }

    /// The tier ceiling for a caller in the given authentication state
    pub fn tier_limit(&self, authenticated: bool) -> Option<u64> {
        if authenticated {
            self.authenticated_limit
        } else {
            self.unauthenticated_limit
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.limit_window.get()) * 60)
    }
}

/// Free-function form of [`RateLimitControl::resolve`]
pub fn resolve(global: &ControlOverride, resource: Option<&ControlOverride>) -> RateLimitControl {
    RateLimitControl::resolve(global, resource)
}

// a configured limit of zero behaves like no limit at all
fn non_zero(limit: u64) -> Option<u64> {
    (limit > 0).then_some(limit)
}
