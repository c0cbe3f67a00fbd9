// src/resilience/tests/mod.rs
//! Tests for resilience features

mod circuit_breaker_tests;
mod resilient_storage_tests;
