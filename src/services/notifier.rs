// src/services/notifier.rs

//! Result notification.
//!
//! Delivers the fixed run-result payload to an external webhook. Delivery
//! failure is logged and swallowed: the sync already succeeded or failed
//! before notification was attempted, and that outcome must stand.

use crate::error::Result;
use crate::models::{NotifyConfig, SyncResult};
use crate::utils::http;

/// Webhook notifier for run results.
pub struct Notifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            client: http::create_client(config.timeout_secs)?,
        })
    }

    /// Deliver the result payload. Never fails the caller.
    pub async fn notify(&self, result: &SyncResult) {
        let Some(url) = &self.webhook_url else {
            log::debug!("No webhook configured; skipping result notification");
            return;
        };

        let payload = result.payload();
        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("Delivered {:?} notification", payload.status);
            }
            Ok(response) => {
                log::warn!(
                    "Result notification returned HTTP {}; continuing",
                    response.status()
                );
            }
            Err(e) => {
                log::warn!("Result notification failed: {e}; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotifyConfig, SyncMode};

    #[tokio::test]
    async fn missing_webhook_is_a_quiet_no_op() {
        let notifier = Notifier::new(&NotifyConfig::default()).unwrap();
        // Must return without attempting any network call.
        notifier
            .notify(&SyncResult::no_updates(SyncMode::Incremental))
            .await;
    }
}
