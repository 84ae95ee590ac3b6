// 🔄 Pipeline - Raw exports in, audited settlement batch out
//
// Stages run in a fixed order and only pass values forward:
//   scan raw → dedup → normalize → audit → reconcile → build settlement
//
// Same dataset + same run timestamp → byte-identical outputs. The fingerprint
// ignores the run timestamp, so a re-run of the same data matches.

use crate::config::PipelineConfig;
use crate::data_quality::{
    assign_issue_ids, DataQualityEngine, Issue, IssueCategory, IssueSummary, RawScan, Severity,
};
use crate::deduplication::{DeduplicationEngine, DuplicateGroup};
use crate::error::RecordFailure;
use crate::incentives::IncentiveTable;
use crate::models::{CanonicalOrder, RawDataset, SettlementRecord};
use crate::normalizer::Normalizer;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::settlement::{SettlementBuilder, SettlementSummary};
use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

// ============================================================================
// PIPELINE OUTPUT
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_at: DateTime<Utc>,

    /// Raw input sizes, before any cleaning
    pub raw_order_count: usize,
    pub raw_customer_count: usize,
    pub raw_settlement_count: usize,

    pub raw_scan: RawScan,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub duplicates_removed: usize,

    /// Records whose SKU text changed under normalization
    pub sku_changed_count: usize,

    pub canonical_orders: Vec<CanonicalOrder>,
    pub failures: Vec<RecordFailure>,
    pub reconciliation: ReconciliationReport,
    pub settlement_records: Vec<SettlementRecord>,
    pub settlement_summary: SettlementSummary,

    /// Append-only, in stage order
    pub issues: Vec<Issue>,

    /// SHA-256 over orders, issues and settlement records; independent of run_at
    pub fingerprint: String,
}

impl PipelineOutput {
    pub fn issue_summary(&self) -> IssueSummary {
        IssueSummary::from_issues(&self.issues)
    }

    pub fn eligible_count(&self) -> usize {
        self.canonical_orders.iter().filter(|o| o.eligible).count()
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: Normalizer,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, incentives: IncentiveTable) -> Self {
        Pipeline {
            config,
            normalizer: Normalizer::new(incentives),
        }
    }

    /// Loads the incentive table named by the config
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let incentives = config
            .load_incentives()
            .context("Failed to load incentive programs")?;
        Ok(Pipeline::new(config, incentives))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, dataset: &RawDataset, run_at: DateTime<Utc>) -> Result<PipelineOutput> {
        info!(
            orders = dataset.orders.len(),
            customers = dataset.customers.len(),
            settlements = dataset.settlements.len(),
            "Starting pipeline run"
        );

        let quality =
            DataQualityEngine::with_tolerance(run_at, self.config.grand_total_tolerance);

        // 1. Audit the raw export as-is
        let raw_scan = quality.scan_raw(&dataset.orders);
        let mut issues = raw_scan.issues.clone();
        info!(issues = raw_scan.issues.len(), "Raw scan complete");

        // Repeated ledger rows are logged here and counted once downstream
        let repeated_transactions = quality.check_duplicate_transactions(&dataset.settlements);
        if !repeated_transactions.is_empty() {
            warn!(count = repeated_transactions.len(), "Processor ledger repeats transaction ids");
        }
        issues.extend(repeated_transactions);

        // 2. One record per order_id
        let dedup = DeduplicationEngine::new().deduplicate(&dataset.orders);
        for group in &dedup.groups {
            debug!(order_id = %group.order_id, reason = %group.reason, "Collapsed duplicate");
        }
        info!(
            kept = dedup.kept.len(),
            removed = dedup.removed_count(),
            "Deduplication complete"
        );

        // 3. Normalize; malformed records are quarantined unless strict
        let mut canonical_orders = Vec::with_capacity(dedup.kept.len());
        let mut failures = Vec::new();
        for raw in &dedup.kept {
            match self.normalizer.normalize(raw) {
                Ok(order) => canonical_orders.push(order),
                Err(e) if self.config.strict => {
                    return Err(anyhow::Error::new(e)
                        .context("Strict mode: aborting on malformed record"));
                }
                Err(e) => {
                    warn!(order_id = %raw.order_id, error = %e, "Quarantined record");
                    failures.push(RecordFailure::new(e));
                }
            }
        }
        issues.extend(quality.quarantine_issues(&failures));

        let sku_changed_count = canonical_orders
            .iter()
            .filter(|o| o.sku_raw != o.sku)
            .count();
        info!(
            normalized = canonical_orders.len(),
            quarantined = failures.len(),
            sku_changed = sku_changed_count,
            "Normalization complete"
        );

        // 4. Post-normalization audit
        issues.extend(quality.audit_canonical(&canonical_orders));

        // 5. Reconcile against the processor ledger
        let reconciliation = ReconciliationEngine::with_tolerance(self.config.amount_tolerance)
            .reconcile(&canonical_orders, &dataset.settlements);
        if !reconciliation.orphans.is_empty() {
            warn!(
                count = reconciliation.orphans.len(),
                total = %reconciliation.orphan_total(),
                "Settled transactions without an order"
            );
        }
        info!("{}", reconciliation.summary());
        issues.extend(quality.reconciliation_issues(&reconciliation));

        // 6. Settlement-ready batch
        let settlement_records = SettlementBuilder::new().build(
            &canonical_orders,
            &dataset.settlements,
            &dataset.customers,
        );
        let settlement_summary = SettlementSummary::from_records(&settlement_records);
        info!("{}", settlement_summary.summary());

        assign_issue_ids(&mut issues);
        let fingerprint = fingerprint(&canonical_orders, &issues, &settlement_records)?;
        info!(issues = issues.len(), fingerprint = %fingerprint, "Pipeline run complete");

        Ok(PipelineOutput {
            run_at,
            raw_order_count: dataset.orders.len(),
            raw_customer_count: dataset.customers.len(),
            raw_settlement_count: dataset.settlements.len(),
            raw_scan,
            duplicates_removed: dedup.removed_count(),
            duplicate_groups: dedup.groups,
            sku_changed_count,
            canonical_orders,
            failures,
            reconciliation,
            settlement_records,
            settlement_summary,
            issues,
            fingerprint,
        })
    }
}

/// Issue content without `detected_at`, so the run clock never changes the hash
#[derive(Serialize)]
struct FingerprintIssue<'a> {
    issue_id: &'a str,
    category: IssueCategory,
    severity: Severity,
    order_id: Option<&'a str>,
    transaction_id: Option<&'a str>,
    detail: &'a str,
}

impl<'a> From<&'a Issue> for FingerprintIssue<'a> {
    fn from(issue: &'a Issue) -> Self {
        FingerprintIssue {
            issue_id: &issue.issue_id,
            category: issue.category,
            severity: issue.severity,
            order_id: issue.order_id.as_deref(),
            transaction_id: issue.transaction_id.as_deref(),
            detail: &issue.detail,
        }
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    orders: &'a [CanonicalOrder],
    issues: Vec<FingerprintIssue<'a>>,
    settlement: &'a [SettlementRecord],
}

/// Hex SHA-256 of the serialized outputs
pub fn fingerprint(
    orders: &[CanonicalOrder],
    issues: &[Issue],
    settlement: &[SettlementRecord],
) -> Result<String> {
    let bytes = serde_json::to_vec(&FingerprintInput {
        orders,
        issues: issues.iter().map(FingerprintIssue::from).collect(),
        settlement,
    })
    .context("Failed to serialize outputs for fingerprint")?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, RawOrder, SettlementStatus, SettlementTransaction};
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn money(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 30, 8, 0, 0).unwrap()
    }

    fn create_test_order(id: &str, subtotal: &str, grand_total: &str) -> RawOrder {
        RawOrder {
            order_id: id.to_string(),
            customer_id: "CUST-0001".to_string(),
            order_date: "06/22/2024 12:00".to_string(),
            sku: "SKU-LED-001".to_string(),
            qty: 1,
            subtotal: subtotal.to_string(),
            state_tax: None,
            county_tax: None,
            combined_tax: Some(Decimal::ZERO),
            shipping: Decimal::ZERO,
            discount: Decimal::ZERO,
            grand_total: money(grand_total),
            status: "complete".to_string(),
            payment_method: "paypal".to_string(),
            invoice_number: Some(format!("INV-{}", id)),
        }
    }

    fn create_test_settlement(txn: &str, order_id: &str, gross: &str) -> SettlementTransaction {
        SettlementTransaction {
            transaction_id: txn.to_string(),
            order_id: order_id.to_string(),
            settle_date: NaiveDate::from_ymd_opt(2024, 6, 24).unwrap(),
            gross_amount: money(gross),
            processor_fee: money("1.00"),
            net_amount: money(gross) - money("1.00"),
            status: SettlementStatus::Settled,
            auth_code: "AUTH1".to_string(),
        }
    }

    fn create_test_dataset() -> RawDataset {
        RawDataset {
            orders: vec![
                create_test_order("ORD-00001", "$180.00", "180.00"),
                create_test_order("ORD-00001", "$215.08", "215.08"),
                create_test_order("ORD-00002", "$50.00", "50.00"),
            ],
            customers: vec![Customer {
                customer_id: "CUST-0001".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                state: "TX".to_string(),
                created_at: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                loyalty_tier: "gold".to_string(),
            }],
            settlements: vec![
                create_test_settlement("TXN-1", "ORD-00001", "215.08"),
                create_test_settlement("TXN-2", "ORD-00002", "50.00"),
            ],
        }
    }

    fn pipeline(strict: bool) -> Pipeline {
        let config = PipelineConfig {
            strict,
            ..Default::default()
        };
        Pipeline::from_config(config).unwrap()
    }

    #[test]
    fn test_clean_run() {
        let output = pipeline(false).run(&create_test_dataset(), run_at()).unwrap();

        assert_eq!(output.raw_order_count, 3);
        assert_eq!(output.duplicates_removed, 1);
        assert_eq!(output.canonical_orders.len(), 2);
        assert_eq!(output.canonical_orders[0].grand_total, money("215.08"));
        assert_eq!(output.settlement_records.len(), 2);
        assert!(output.failures.is_empty());
        assert!(output.reconciliation.is_balanced());

        let summary = output.issue_summary();
        assert_eq!(summary.count(IssueCategory::DuplicateOrder), 1);
        assert_eq!(summary.count(IssueCategory::OrphanTransaction), 0);
    }

    #[test]
    fn test_runs_are_idempotent() {
        let dataset = create_test_dataset();
        let first = pipeline(false).run(&dataset, run_at()).unwrap();
        let second = pipeline(false).run(&dataset, run_at()).unwrap();

        assert_eq!(first.canonical_orders, second.canonical_orders);
        assert_eq!(first.issues, second.issues);
        assert_eq!(first.settlement_records, second.settlement_records);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.fingerprint.len(), 64);
    }

    #[test]
    fn test_malformed_record_quarantined() {
        let mut dataset = create_test_dataset();
        dataset.orders.push(create_test_order("ORD-00003", "$12.3.4", "12.00"));

        let output = pipeline(false).run(&dataset, run_at()).unwrap();

        assert_eq!(output.canonical_orders.len(), 2);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].order_id, "ORD-00003");
        assert_eq!(output.failures[0].error.field(), "subtotal");
        assert_eq!(output.issue_summary().count(IssueCategory::QuarantinedRecord), 1);
    }

    #[test]
    fn test_strict_mode_aborts() {
        let mut dataset = create_test_dataset();
        dataset.orders[2].order_date = "2024-06-22".to_string();

        assert!(pipeline(true).run(&dataset, run_at()).is_err());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dataset = create_test_dataset();
        let a = pipeline(false).run(&dataset, run_at()).unwrap();

        let mut changed = dataset.clone();
        changed.settlements[1].gross_amount = money("49.00");
        let b = pipeline(false).run(&changed, run_at()).unwrap();

        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(b.issue_summary().count(IssueCategory::AmountMismatch), 1);
    }

    #[test]
    fn test_fingerprint_ignores_run_timestamp() {
        let dataset = create_test_dataset();
        let a = pipeline(false).run(&dataset, run_at()).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 10, 1, 17, 45, 12).unwrap();
        let b = pipeline(false).run(&dataset, later).unwrap();

        assert_ne!(a.issues[0].detected_at, b.issues[0].detected_at);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_repeated_ledger_row_logged_and_counted_once() {
        let mut dataset = create_test_dataset();
        dataset.settlements.push(create_test_settlement("TXN-1", "ORD-00001", "215.08"));

        let output = pipeline(false).run(&dataset, run_at()).unwrap();

        assert_eq!(output.raw_settlement_count, 3);
        assert_eq!(output.settlement_records.len(), 2);
        assert_eq!(output.settlement_summary.total_gross_revenue, money("265.08"));
        assert!(output.reconciliation.is_balanced());

        let repeated: Vec<_> = output
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::DuplicateTransaction)
            .collect();
        assert_eq!(repeated.len(), 1);
        assert_eq!(repeated[0].transaction_id.as_deref(), Some("TXN-1"));
    }

    #[test]
    fn test_issue_ids_unique_within_run() {
        let mut dataset = create_test_dataset();
        for order in dataset.orders.iter_mut() {
            order.invoice_number = None;
        }
        // Both copies of ORD-00001 are now identical rows
        dataset.orders[0].grand_total = money("215.08");
        dataset.orders[0].subtotal = "$215.08".to_string();

        let output = pipeline(false).run(&dataset, run_at()).unwrap();
        let ids: std::collections::HashSet<_> =
            output.issues.iter().map(|i| i.issue_id.as_str()).collect();

        assert_eq!(ids.len(), output.issues.len());
    }
}
