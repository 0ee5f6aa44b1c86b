//! Shared library for the chart Lambda functions.
//!
//! This crate provides the prompt contract, generation clients, quota rules,
//! chart storage and HTTP helpers used by both endpoints.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod http;
pub mod models;
pub mod prompt;
pub mod quota;
pub mod render;
pub mod secrets;
pub mod service;
pub mod share;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{caller, resolve_user_id, AuthenticatedUser};
pub use client::{AutoSavePolicy, ChartApiClient, GenerationOutcome};
pub use config::{GenerationConfig, StoreBackend, StoreConfig};
pub use error::{Error, Result};
pub use generation::{ChartGenerator, RetryPolicy, TextGenerator};
pub use models::{AiResponse, ChartData, ChartLookup, ChartRequest, ChartType, Owner, QuotaState, StoredChart};
pub use render::{ChartSummary, ExportPlan};
pub use service::{ChartService, DeleteCaller};
pub use store::{ChartStore, LocalChartStore, PgChartStore};
