// src/services/target.rs

//! Target sync client.
//!
//! Delivers assembled records to the messaging platform's batch upsert
//! endpoint. Transport, auth, throttling and 5xx failures reject the whole
//! batch as `TargetUnavailable` (the orchestrator retries those);
//! per-record rejections are data-level validation failures, reported back
//! but never retried.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Batch, Config, RecordRejection};
use crate::utils::http;
use crate::utils::rate_limit::RateLimiter;

/// Per-record outcome of one delivered batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// SKUs the platform accepted
    pub accepted: Vec<String>,
    /// Records the platform rejected, with reasons
    pub rejected: Vec<RecordRejection>,
}

impl BatchOutcome {
    /// A batch where every record was rejected failed as a whole.
    pub fn all_rejected(&self) -> bool {
        self.accepted.is_empty() && !self.rejected.is_empty()
    }
}

/// Seam for the orchestrator: anything that can deliver a batch.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn send_batch(&self, batch: &Batch) -> Result<BatchOutcome>;
}

/// One record's result line in the platform's batch response.
#[derive(Debug, Deserialize)]
struct RecordResult {
    sku: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Response body of the batch upsert endpoint.
#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default = "Vec::new")]
    results: Vec<RecordResult>,
}

/// Client for the messaging platform's product API.
pub struct TargetClient {
    config: Arc<Config>,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl TargetClient {
    /// Create a new target client sharing the given rate limiter.
    pub fn new(config: Arc<Config>, limiter: Arc<RateLimiter>) -> Result<Self> {
        let target = &config.target;
        let accept = format!("application/json; version={}", target.accept_version);
        let client = http::create_client_with_headers(
            target.timeout_secs,
            &[
                ("X-Openapi-Client-Id", &target.client_id),
                ("X-Openapi-Client-Secret", &target.client_secret),
                ("Accept", &accept),
            ],
        )?;

        Ok(Self {
            config,
            client,
            limiter,
        })
    }

    /// Fold the platform's result lines into an outcome for the batch.
    ///
    /// Records the response does not mention are taken as accepted; the
    /// platform only echoes problems.
    fn outcome_from_results(batch: &Batch, results: Vec<RecordResult>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for record in &batch.records {
            match results.iter().find(|r| r.sku == record.sku) {
                Some(result) if result.status == "rejected" => {
                    outcome.rejected.push(RecordRejection {
                        batch_index: batch.index,
                        sku: record.sku.clone(),
                        reason: result
                            .reason
                            .clone()
                            .unwrap_or_else(|| "rejected by target".to_string()),
                    });
                }
                _ => outcome.accepted.push(record.sku.clone()),
            }
        }
        outcome
    }
}

#[async_trait]
impl BatchSink for TargetClient {
    async fn send_batch(&self, batch: &Batch) -> Result<BatchOutcome> {
        self.limiter.acquire().await;

        let response = self
            .client
            .post(&self.config.target.api_url)
            .json(&json!({ "products": batch.records }))
            .send()
            .await
            .map_err(|e| AppError::target(format!("batch {}: {e}", batch.index)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::target(format!(
                "batch {}: HTTP {status}",
                batch.index
            )));
        }

        let body: BatchResponse = response.json().await.map_err(|e| {
            AppError::target(format!("batch {}: unreadable response: {e}", batch.index))
        })?;

        let outcome = Self::outcome_from_results(batch, body.results);
        if !outcome.rejected.is_empty() {
            log::warn!(
                "Batch {}: {} of {} records rejected by target",
                batch.index,
                outcome.rejected.len(),
                batch.len()
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductRecord, Visibility};

    fn make_batch(index: usize, skus: &[&str]) -> Batch {
        let records = skus
            .iter()
            .enumerate()
            .map(|(i, sku)| ProductRecord {
                id: i as u64,
                sku: sku.to_string(),
                title: format!("Product {sku}"),
                description: String::new(),
                status: Visibility::Visible,
                price: Some(1.0),
                currency: Some("GBP".into()),
                brand: None,
                url: None,
                image_url: None,
                categories: vec![],
                features: Default::default(),
                updated_at: "2026-08-01T09:00:00Z".into(),
            })
            .collect();
        Batch::new(index, records)
    }

    fn result(sku: &str, status: &str, reason: Option<&str>) -> RecordResult {
        RecordResult {
            sku: sku.into(),
            status: status.into(),
            reason: reason.map(String::from),
        }
    }

    #[test]
    fn unmentioned_records_count_as_accepted() {
        let batch = make_batch(0, &["A", "B", "C"]);
        let outcome = TargetClient::outcome_from_results(&batch, vec![]);
        assert_eq!(outcome.accepted, vec!["A", "B", "C"]);
        assert!(outcome.rejected.is_empty());
        assert!(!outcome.all_rejected());
    }

    #[test]
    fn mixed_outcome_records_rejections_with_reasons() {
        let batch = make_batch(2, &["A", "B", "C"]);
        let outcome = TargetClient::outcome_from_results(
            &batch,
            vec![
                result("B", "rejected", Some("description too long")),
                result("C", "accepted", None),
            ],
        );
        assert_eq!(outcome.accepted, vec!["A", "C"]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].sku, "B");
        assert_eq!(outcome.rejected[0].batch_index, 2);
        assert_eq!(outcome.rejected[0].reason, "description too long");
        assert!(!outcome.all_rejected());
    }

    #[test]
    fn every_record_rejected_fails_the_batch() {
        let batch = make_batch(1, &["A", "B"]);
        let outcome = TargetClient::outcome_from_results(
            &batch,
            vec![
                result("A", "rejected", None),
                result("B", "rejected", Some("bad sku")),
            ],
        );
        assert!(outcome.all_rejected());
        assert_eq!(outcome.rejected[0].reason, "rejected by target");
    }
}
