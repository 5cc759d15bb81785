//! Manifest interrogation.
//!
//! Operator tooling over the persisted checkpoint: batch summary table,
//! per-batch detail, SKU lookup, and an integrity scan. Read-only; a sync
//! run is never affected by inspection.

use crate::error::{AppError, Result};
use crate::models::{BatchStatus, Manifest, SyncMode};
use crate::storage::CheckpointStore;
use crate::utils::{log, truncate};

/// What to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectMode {
    /// Batch summary table
    Summary,
    /// Record identifiers of one batch
    Batch { index: usize },
    /// Find a record by SKU across all batches
    Sku { sku: String },
    /// Scan the manifest for inconsistencies
    Check,
}

/// Load the manifest for a mode and render the requested view.
pub async fn run_inspect(
    store: &dyn CheckpointStore,
    mode: SyncMode,
    request: &InspectMode,
) -> Result<()> {
    let manifest = store.load_manifest(mode).await?.ok_or_else(|| {
        AppError::validation(format!("no {mode} manifest found; run a sync first"))
    })?;

    match request {
        InspectMode::Summary => show_summary(&manifest),
        InspectMode::Batch { index } => show_batch(&manifest, *index)?,
        InspectMode::Sku { sku } => show_sku(&manifest, sku),
        InspectMode::Check => show_check(&manifest),
    }
    Ok(())
}

fn status_label(status: BatchStatus) -> &'static str {
    match status {
        BatchStatus::Pending => "pending",
        BatchStatus::Sent => "sent",
        BatchStatus::Failed => "failed",
    }
}

fn show_summary(manifest: &Manifest) {
    log::header(&format!("{} sync manifest", manifest.mode));
    log::sub_item(&format!("Created     : {}", manifest.created_at));
    log::sub_item(&format!("Updated     : {}", manifest.updated_at));
    if let Some(cutoff) = manifest.cutoff {
        log::sub_item(&format!("Cutoff      : {cutoff}"));
    }
    log::sub_item(&format!("Products    : {}", manifest.total_products));
    log::sub_item(&format!("Batches     : {}", manifest.total_batches));
    log::sub_item(&format!(
        "Highest sent: {}",
        manifest
            .highest_sent_index
            .map_or_else(|| "-".to_string(), |i| i.to_string())
    ));
    log::separator();

    log::info(&format!("{:<8} {:<10} {:<6} {}", "Batch", "Status", "Size", "Sent at"));
    for batch in &manifest.batches {
        log::info(&format!(
            "{:<8} {:<10} {:<6} {}",
            batch.index,
            status_label(batch.status),
            batch.size,
            batch
                .sent_at
                .map_or_else(|| "-".to_string(), |t| t.to_string()),
        ));
    }
}

fn show_batch(manifest: &Manifest, index: usize) -> Result<()> {
    let batch = manifest
        .batches
        .iter()
        .find(|b| b.index == index)
        .ok_or_else(|| {
            AppError::validation(format!(
                "batch {index} does not exist (0–{})",
                manifest.total_batches.saturating_sub(1)
            ))
        })?;

    log::header(&format!(
        "Batch {} — {} ({} records)",
        batch.index,
        status_label(batch.status),
        batch.size
    ));
    for (position, sku) in batch.record_ids.iter().enumerate() {
        log::sub_item(&format!("{:<6} {}", position, truncate(sku, 48)));
    }
    Ok(())
}

/// (batch index, position) of every occurrence of a SKU.
fn find_sku(manifest: &Manifest, sku: &str) -> Vec<(usize, usize)> {
    manifest
        .batches
        .iter()
        .flat_map(|batch| {
            batch
                .record_ids
                .iter()
                .enumerate()
                .filter(|(_, id)| id.as_str() == sku)
                .map(|(position, _)| (batch.index, position))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn show_sku(manifest: &Manifest, sku: &str) {
    let hits = find_sku(manifest, sku);
    if hits.is_empty() {
        log::warn(&format!("SKU '{sku}' not found in any batch"));
        return;
    }
    for (batch_index, position) in hits {
        let status = manifest
            .batches
            .iter()
            .find(|b| b.index == batch_index)
            .map(|b| status_label(b.status))
            .unwrap_or("?");
        log::info(&format!(
            "Found '{sku}' in batch {batch_index} at position {position} (batch {status})"
        ));
    }
}

/// Inconsistencies that would make a resume unsafe or a report wrong.
fn integrity_findings(manifest: &Manifest) -> Vec<String> {
    let mut findings = Vec::new();

    let mut seen = std::collections::HashMap::new();
    for batch in &manifest.batches {
        if batch.record_ids.is_empty() {
            findings.push(format!("batch {} is empty", batch.index));
        }
        if batch.record_ids.len() != batch.size {
            findings.push(format!(
                "batch {} size field says {} but holds {} record ids",
                batch.index,
                batch.size,
                batch.record_ids.len()
            ));
        }
        if batch.status == BatchStatus::Sent && batch.sent_at.is_none() {
            findings.push(format!("batch {} is sent but has no sent_at", batch.index));
        }
        for sku in &batch.record_ids {
            if let Some(previous) = seen.insert(sku.clone(), batch.index) {
                findings.push(format!(
                    "SKU '{}' appears in batch {} and batch {}",
                    truncate(sku, 48),
                    previous,
                    batch.index
                ));
            }
        }
    }

    if let Some(highest) = manifest.highest_sent_index {
        let max_sent = manifest
            .batches
            .iter()
            .filter(|b| b.status == BatchStatus::Sent)
            .map(|b| b.index)
            .max();
        if max_sent != Some(highest) {
            findings.push(format!(
                "highest_sent_index is {} but the highest sent batch is {:?}",
                highest, max_sent
            ));
        }
    }

    findings
}

fn show_check(manifest: &Manifest) {
    let findings = integrity_findings(manifest);
    if findings.is_empty() {
        log::success("Manifest is consistent");
        return;
    }
    log::warn(&format!("{} problem(s) found:", findings.len()));
    for finding in findings {
        log::sub_item(&finding);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::BatchDescriptor;

    fn make_manifest() -> Manifest {
        Manifest {
            mode: SyncMode::Incremental,
            cutoff: None,
            fingerprint: "abc".into(),
            total_products: 5,
            total_batches: 2,
            batches: vec![
                BatchDescriptor {
                    index: 0,
                    status: BatchStatus::Sent,
                    size: 3,
                    record_ids: vec!["A".into(), "B".into(), "C".into()],
                    sent_at: Some(Utc::now()),
                },
                BatchDescriptor {
                    index: 1,
                    status: BatchStatus::Failed,
                    size: 2,
                    record_ids: vec!["D".into(), "E".into()],
                    sent_at: None,
                },
            ],
            highest_sent_index: Some(0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn find_sku_reports_batch_and_position() {
        let manifest = make_manifest();
        assert_eq!(find_sku(&manifest, "D"), vec![(1, 0)]);
        assert_eq!(find_sku(&manifest, "C"), vec![(0, 2)]);
        assert!(find_sku(&manifest, "ZZZ").is_empty());
    }

    #[test]
    fn consistent_manifest_has_no_findings() {
        assert!(integrity_findings(&make_manifest()).is_empty());
    }

    #[test]
    fn check_flags_duplicates_and_size_mismatches() {
        let mut manifest = make_manifest();
        manifest.batches[1].record_ids = vec!["A".into()];

        let findings = integrity_findings(&manifest);
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().any(|f| f.contains("size field")));
        assert!(findings.iter().any(|f| f.contains("appears in batch 0 and batch 1")));
    }

    #[test]
    fn check_flags_sent_without_timestamp() {
        let mut manifest = make_manifest();
        manifest.batches[0].sent_at = None;

        let findings = integrity_findings(&manifest);
        assert!(findings.iter().any(|f| f.contains("no sent_at")));
    }

    #[test]
    fn check_flags_stale_highest_sent_index() {
        let mut manifest = make_manifest();
        manifest.highest_sent_index = Some(1);

        let findings = integrity_findings(&manifest);
        assert!(findings.iter().any(|f| f.contains("highest_sent_index")));
    }
}
