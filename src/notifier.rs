//! Outbound alert sink.
//!
//! The evaluator delivers alerts synchronously through this trait; message
//! formatting beyond headline/body and any transport (chat webhook, queue)
//! are the implementation's concern, not the pipeline's.

use std::fmt;

use tracing::{info, warn};

use crate::types::{Alert, AlertLevel};

pub trait Notifier: Send + Sync + fmt::Debug {
    fn notify(&self, alert: &Alert);
}

/// Default sink: structured log lines.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: &Alert) {
        match alert.level {
            AlertLevel::Strong => warn!(
                target: "alert",
                chain = %alert.chain,
                market_type = %alert.market_type,
                address = ?alert.address,
                target_token = ?alert.target,
                headline = %alert.headline,
                body = %alert.body,
                "STRONG alert"
            ),
            AlertLevel::Normal => info!(
                target: "alert",
                chain = %alert.chain,
                market_type = %alert.market_type,
                address = ?alert.address,
                target_token = ?alert.target,
                headline = %alert.headline,
                body = %alert.body,
                "alert"
            ),
        }
    }
}
