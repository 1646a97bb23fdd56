//! # Centralized Error Handling
//!
//! Typed per-domain error enums; the composition root aggregates them behind
//! `eyre::Result`, everything below stays precise.
//!
//! Gate rejections are deliberately NOT errors: a market failing a safety
//! check is a policy outcome recorded on the watchlist entry, not a fault.

use thiserror::Error;

/// Failures talking to a chain node: read calls, code lookups, subscriptions.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Contract call {what} failed: {reason}")]
    Call { what: String, reason: String },
    #[error("Subscription failed: {0}")]
    Subscription(String),
    #[error("No client configured for chain {0}")]
    UnknownChain(String),
}

impl ChainError {
    pub fn call(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ChainError::Call { what: what.into(), reason: reason.to_string() }
    }
}

/// Failures of the external market-aggregator HTTP API.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("HTTP status {0}: {1}")]
    Status(u16, String),
    #[error("Response parse error: {0}")]
    Parse(String),
    #[error("Retries exhausted after {0} attempts: {1}")]
    Exhausted(u32, String),
}

/// Failures deriving a USD price.
#[derive(Error, Debug)]
pub enum PriceError {
    #[error("Price not available: {0}")]
    NotAvailable(String),
    #[error("Price calculation invalid: {0}")]
    Calculation(String),
}
