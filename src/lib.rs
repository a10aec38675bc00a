//! # Screenshot Tool
//!
//! A concurrency- and resource-management substrate for taking website
//! screenshots at scale with a pooled headless Chrome backend. Single and
//! batch capture share the same admission, browser-pool, and capture-pipeline
//! components; the HTTP surface and CLI are two front ends onto them.
//!
//! ## Components
//!
//! - [`url_rewrite`] — C1, request-time host/scheme rewriting
//! - [`resource_cache`] — C2, on-disk sub-resource cache
//! - [`interceptor`] — C3, per-page CDP Fetch-domain interception
//! - [`browser_pool`] — C4, pooled Chrome instances
//! - [`tab_pool`] — C5, tab/context acquisition scoped to a browser
//! - [`capture`] — C6, navigate + screenshot with strategy fallback
//! - [`admission`] — C7, load shedding, queueing, circuit breaking
//! - [`result_cache`] — C8, in-memory TTL+LRU cache of finished artifacts
//! - [`batch`] — C9, batch job store and scheduler
//! - [`health`] — C10, periodic synthetic capture health probe
//! - [`watchdog`] — C11, stuck-resource sweep
//! - [`metrics`] — C12, metrics and state snapshot

/// Browser-launch-facing configuration plus the C1-C12 tunable `Settings`.
pub mod config;

/// Error types shared across the capture pipeline and HTTP boundary.
pub mod error;

/// URL rewriter (C1).
pub mod url_rewrite;

/// On-disk resource cache (C2).
pub mod resource_cache;

/// Per-page CDP request interception (C3).
pub mod interceptor;

/// Browser pool management for concurrent Chrome instances (C4).
pub mod browser_pool;

/// Tab/context acquirer (C5).
pub mod tab_pool;

/// Capture pipeline: navigation + screenshot with retry (C6).
pub mod capture;

/// Admission controller: load shedding, queueing, circuit breaker (C7).
pub mod admission;

/// In-memory result cache (C8).
pub mod result_cache;

/// Batch job store and scheduler (C9).
pub mod batch;

/// Health prober (C10).
pub mod health;

/// Background watchdog sweep (C11).
pub mod watchdog;

/// Metrics collection and state snapshot (C12).
pub mod metrics;

/// Artifact storage boundary.
pub mod storage;

/// HTTP boundary: axum router and handlers (§6).
pub mod http;

/// Command-line interface implementation.
pub mod cli;

/// Utility functions and helpers.
pub mod utils;

#[cfg(test)]
mod tests;

pub use config::*;
pub use error::*;
