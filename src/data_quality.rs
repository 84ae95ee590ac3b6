// ✅ Data Quality Engine - Issue log for raw and canonical records
// Read-only scans. Every detected defect becomes one Issue; nothing here
// mutates or repairs data.

use crate::deduplication::DeduplicationEngine;
use crate::error::RecordFailure;
use crate::models::{format_money, CanonicalOrder, RawOrder, SettlementTransaction, TaxProvenance};
use crate::normalizer::{normalize_sku, parse_currency, parse_order_date};
use crate::incentives::UNMAPPED_PROGRAM;
use crate::reconciliation::{MismatchDirection, ReconciliationReport};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

// ============================================================================
// ISSUE CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCategory {
    DuplicateOrder,
    MissingInvoice,
    MissingTax,
    SkuVariant,
    UnconvertibleCurrency,
    UnconvertibleDate,
    QuarantinedRecord,
    UnmappedProduct,
    GrandTotalMismatch,
    OrphanTransaction,
    DuplicateTransaction,
    UnsettledOrder,
    AmountMismatch,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::DuplicateOrder => "DUPLICATE_ORDER",
            IssueCategory::MissingInvoice => "MISSING_INVOICE",
            IssueCategory::MissingTax => "MISSING_TAX",
            IssueCategory::SkuVariant => "SKU_VARIANT",
            IssueCategory::UnconvertibleCurrency => "UNCONVERTIBLE_CURRENCY",
            IssueCategory::UnconvertibleDate => "UNCONVERTIBLE_DATE",
            IssueCategory::QuarantinedRecord => "QUARANTINED_RECORD",
            IssueCategory::UnmappedProduct => "UNMAPPED_PRODUCT",
            IssueCategory::GrandTotalMismatch => "GRAND_TOTAL_MISMATCH",
            IssueCategory::OrphanTransaction => "ORPHAN_TRANSACTION",
            IssueCategory::DuplicateTransaction => "DUPLICATE_TRANSACTION",
            IssueCategory::UnsettledOrder => "UNSETTLED_ORDER",
            IssueCategory::AmountMismatch => "AMOUNT_MISMATCH",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IssueCategory::SkuVariant => Severity::Info,
            IssueCategory::DuplicateOrder
            | IssueCategory::MissingInvoice
            | IssueCategory::MissingTax
            | IssueCategory::UnmappedProduct
            | IssueCategory::DuplicateTransaction
            | IssueCategory::UnsettledOrder => Severity::Warning,
            IssueCategory::UnconvertibleCurrency
            | IssueCategory::UnconvertibleDate
            | IssueCategory::QuarantinedRecord
            | IssueCategory::GrandTotalMismatch
            | IssueCategory::OrphanTransaction
            | IssueCategory::AmountMismatch => Severity::Critical,
        }
    }

    /// Recommended action written into the issue log
    pub fn action(&self) -> &'static str {
        match self {
            IssueCategory::DuplicateOrder => "Retain one occurrence, discard the rest",
            IssueCategory::MissingInvoice => "Request invoice number from finance/billing team",
            IssueCategory::MissingTax => "Confirm tax amount against the storefront tax report",
            IssueCategory::SkuVariant => "None; variants are normalized automatically (audit only)",
            IssueCategory::UnconvertibleCurrency | IssueCategory::UnconvertibleDate => {
                "Correct the source export before settlement"
            }
            IssueCategory::QuarantinedRecord => "Fix the field in the source export and re-run",
            IssueCategory::UnmappedProduct => "Add the SKU to the incentive program table",
            IssueCategory::GrandTotalMismatch => {
                "Review order components; recorded total was left unchanged"
            }
            IssueCategory::OrphanTransaction => "Escalate to finance team for investigation",
            IssueCategory::DuplicateTransaction => {
                "Counted once; confirm the ledger export with the processor"
            }
            IssueCategory::UnsettledOrder => "Confirm payment status with the processor",
            IssueCategory::AmountMismatch => "Reconcile charged amount with the processor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Money or records may be wrong
    Warning,  // Needs follow-up before submission
    Info,     // Audit trail only
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

// ============================================================================
// ISSUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// UUIDv5 of the issue content plus its occurrence number among
    /// identical entries; stable across re-runs, unique within a log
    pub issue_id: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub order_id: Option<String>,
    pub transaction_id: Option<String>,
    pub detail: String,
    pub action: String,
    pub detected_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(
        category: IssueCategory,
        order_id: Option<&str>,
        transaction_id: Option<&str>,
        detail: String,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let key = content_key(category, order_id, transaction_id, &detail);

        Issue {
            issue_id: issue_id(&key, 0),
            category,
            severity: category.severity(),
            order_id: order_id.map(str::to_string),
            transaction_id: transaction_id.map(str::to_string),
            detail,
            action: category.action().to_string(),
            detected_at,
        }
    }
}

fn content_key(
    category: IssueCategory,
    order_id: Option<&str>,
    transaction_id: Option<&str>,
    detail: &str,
) -> String {
    format!(
        "{}|{}|{}|{}",
        category.as_str(),
        order_id.unwrap_or(""),
        transaction_id.unwrap_or(""),
        detail
    )
}

fn issue_id(key: &str, occurrence: usize) -> String {
    let key = match occurrence {
        0 => key.to_string(),
        n => format!("{}|#{}", key, n),
    };
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Re-key ids so identical entries (e.g. two copies of the same row, both
/// missing an invoice) stay distinct. The n-th repeat of a content key hashes
/// with `#n`; first occurrences keep their plain id.
pub fn assign_issue_ids(issues: &mut [Issue]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for issue in issues.iter_mut() {
        let key = content_key(
            issue.category,
            issue.order_id.as_deref(),
            issue.transaction_id.as_deref(),
            &issue.detail,
        );
        let occurrence = seen.entry(key.clone()).or_insert(0);
        issue.issue_id = issue_id(&key, *occurrence);
        *occurrence += 1;
    }
}

// ============================================================================
// AUDIT VIEWS
// ============================================================================

/// Informational count of raw tax representations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxFormatDistribution {
    pub combined: usize,
    pub itemized: usize,
    pub neither: usize,
}

impl TaxFormatDistribution {
    pub fn total(&self) -> usize {
        self.combined + self.itemized + self.neither
    }
}

/// Raw spellings that normalize to the same SKU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuVariantGroup {
    pub normalized_sku: String,
    pub raw_variants: Vec<String>,
    pub order_count: usize,
}

/// Output of the raw-data scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawScan {
    pub issues: Vec<Issue>,
    pub tax_distribution: TaxFormatDistribution,
    pub sku_variants: Vec<SkuVariantGroup>,
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    /// Stamped on every issue; injected so re-runs are reproducible
    detected_at: DateTime<Utc>,

    /// Allowed |grand_total - recomputed total| (default: $0.02)
    grand_total_tolerance: Decimal,
}

/// Default tolerance for the grand-total cross-check
pub const DEFAULT_GRAND_TOTAL_TOLERANCE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);

impl DataQualityEngine {
    pub fn new(detected_at: DateTime<Utc>) -> Self {
        DataQualityEngine {
            detected_at,
            grand_total_tolerance: DEFAULT_GRAND_TOTAL_TOLERANCE,
        }
    }

    pub fn with_tolerance(detected_at: DateTime<Utc>, grand_total_tolerance: Decimal) -> Self {
        DataQualityEngine {
            detected_at,
            grand_total_tolerance,
        }
    }

    fn issue(
        &self,
        category: IssueCategory,
        order_id: Option<&str>,
        transaction_id: Option<&str>,
        detail: String,
    ) -> Issue {
        Issue::new(category, order_id, transaction_id, detail, self.detected_at)
    }

    /// Run every raw-record check, in a fixed order
    pub fn scan_raw(&self, orders: &[RawOrder]) -> RawScan {
        let mut issues = Vec::new();

        issues.extend(self.check_duplicates(orders));
        issues.extend(self.check_missing_invoices(orders));

        let tax_distribution = self.tax_format_distribution(orders);
        if tax_distribution.neither > 0 {
            issues.extend(self.check_missing_tax(orders));
        }

        let sku_variants = self.sku_variants(orders);
        issues.extend(self.sku_variant_issues(&sku_variants));

        issues.extend(self.check_convertibility(orders));
        assign_issue_ids(&mut issues);

        RawScan {
            issues,
            tax_distribution,
            sku_variants,
        }
    }

    // ========================================================================
    // RAW CHECKS
    // ========================================================================

    /// One issue per order_id seen more than once
    pub fn check_duplicates(&self, orders: &[RawOrder]) -> Vec<Issue> {
        DeduplicationEngine::new()
            .duplicate_counts(orders)
            .into_iter()
            .map(|(order_id, count)| {
                self.issue(
                    IssueCategory::DuplicateOrder,
                    Some(&order_id),
                    None,
                    format!("order_id appears {} times in export", count),
                )
            })
            .collect()
    }

    /// One issue per record, not aggregated
    pub fn check_missing_invoices(&self, orders: &[RawOrder]) -> Vec<Issue> {
        orders
            .iter()
            .filter(|o| !o.has_invoice())
            .map(|o| {
                self.issue(
                    IssueCategory::MissingInvoice,
                    Some(&o.order_id),
                    None,
                    "invoice_number is empty - cannot submit for payment".to_string(),
                )
            })
            .collect()
    }

    pub fn tax_format_distribution(&self, orders: &[RawOrder]) -> TaxFormatDistribution {
        let mut dist = TaxFormatDistribution::default();
        for order in orders {
            match order.tax_format() {
                TaxProvenance::Combined => dist.combined += 1,
                TaxProvenance::Itemized => dist.itemized += 1,
                TaxProvenance::Missing => dist.neither += 1,
            }
        }
        dist
    }

    pub fn check_missing_tax(&self, orders: &[RawOrder]) -> Vec<Issue> {
        orders
            .iter()
            .filter(|o| o.tax_format() == TaxProvenance::Missing)
            .map(|o| {
                self.issue(
                    IssueCategory::MissingTax,
                    Some(&o.order_id),
                    None,
                    "neither combined_tax nor both itemized tax fields are present".to_string(),
                )
            })
            .collect()
    }

    /// Groups whose raw spellings are not all identical
    pub fn sku_variants(&self, orders: &[RawOrder]) -> Vec<SkuVariantGroup> {
        let mut groups: BTreeMap<String, (BTreeSet<String>, usize)> = BTreeMap::new();

        for order in orders {
            let entry = groups
                .entry(normalize_sku(&order.sku))
                .or_insert_with(|| (BTreeSet::new(), 0));
            entry.0.insert(order.sku.clone());
            entry.1 += 1;
        }

        groups
            .into_iter()
            .filter(|(_, (variants, _))| variants.len() > 1)
            .map(|(normalized_sku, (variants, order_count))| SkuVariantGroup {
                normalized_sku,
                raw_variants: variants.into_iter().collect(),
                order_count,
            })
            .collect()
    }

    pub fn sku_variant_issues(&self, groups: &[SkuVariantGroup]) -> Vec<Issue> {
        groups
            .iter()
            .map(|g| {
                self.issue(
                    IssueCategory::SkuVariant,
                    None,
                    None,
                    format!(
                        "{} raw spellings of {} across {} orders: {}",
                        g.raw_variants.len(),
                        g.normalized_sku,
                        g.order_count,
                        g.raw_variants.join(", ")
                    ),
                )
            })
            .collect()
    }

    /// Aggregate pre-check: attempt every parse, escalate if any fail
    pub fn check_convertibility(&self, orders: &[RawOrder]) -> Vec<Issue> {
        let bad_currency: Vec<&str> = orders
            .iter()
            .filter(|o| parse_currency("subtotal", &o.subtotal).is_err())
            .map(|o| o.order_id.as_str())
            .collect();

        let bad_dates: Vec<&str> = orders
            .iter()
            .filter(|o| parse_order_date("order_date", &o.order_date).is_err())
            .map(|o| o.order_id.as_str())
            .collect();

        let mut issues = Vec::new();

        if !bad_currency.is_empty() {
            issues.push(self.issue(
                IssueCategory::UnconvertibleCurrency,
                None,
                None,
                format!(
                    "{} of {} subtotal values failed currency conversion: {}",
                    bad_currency.len(),
                    orders.len(),
                    bad_currency.join(", ")
                ),
            ));
        }

        if !bad_dates.is_empty() {
            issues.push(self.issue(
                IssueCategory::UnconvertibleDate,
                None,
                None,
                format!(
                    "{} of {} order_date values failed date conversion: {}",
                    bad_dates.len(),
                    orders.len(),
                    bad_dates.join(", ")
                ),
            ));
        }

        issues
    }

    /// One issue per transaction_id the processor ledger repeats
    pub fn check_duplicate_transactions(
        &self,
        settlements: &[SettlementTransaction],
    ) -> Vec<Issue> {
        DeduplicationEngine::new()
            .duplicate_transaction_counts(settlements)
            .into_iter()
            .map(|(transaction_id, count)| {
                let order_id = settlements
                    .iter()
                    .find(|t| t.transaction_id == transaction_id)
                    .map(|t| t.order_id.as_str());
                self.issue(
                    IssueCategory::DuplicateTransaction,
                    order_id,
                    Some(&transaction_id),
                    format!("transaction_id appears {} times in ledger; counted once", count),
                )
            })
            .collect()
    }

    // ========================================================================
    // POST-NORMALIZATION CHECKS
    // ========================================================================

    pub fn quarantine_issues(&self, failures: &[RecordFailure]) -> Vec<Issue> {
        failures
            .iter()
            .map(|f| {
                self.issue(
                    IssueCategory::QuarantinedRecord,
                    Some(&f.order_id),
                    None,
                    f.error.to_string(),
                )
            })
            .collect()
    }

    /// Unmapped SKUs and grand-total cross-check violations
    pub fn audit_canonical(&self, orders: &[CanonicalOrder]) -> Vec<Issue> {
        let mut issues = Vec::new();

        for order in orders.iter().filter(|o| o.incentive_program == UNMAPPED_PROGRAM) {
            issues.push(self.issue(
                IssueCategory::UnmappedProduct,
                Some(&order.order_id),
                None,
                format!("SKU {} has no incentive program (rate 0 applied)", order.sku),
            ));
        }

        for order in orders {
            let discrepancy = order.total_discrepancy();
            if discrepancy.abs() > self.grand_total_tolerance {
                issues.push(self.issue(
                    IssueCategory::GrandTotalMismatch,
                    Some(&order.order_id),
                    None,
                    format!(
                        "recorded grand_total {} vs components {} (off by {})",
                        format_money(order.grand_total),
                        format_money(order.computed_total()),
                        format_money(discrepancy)
                    ),
                ));
            }
        }

        issues
    }

    /// Orphans, unsettled orders and amount mismatches as issue entries
    pub fn reconciliation_issues(&self, report: &ReconciliationReport) -> Vec<Issue> {
        let mut issues = Vec::new();

        for orphan in &report.orphans {
            issues.push(self.issue(
                IssueCategory::OrphanTransaction,
                Some(&orphan.order_id),
                Some(&orphan.transaction_id),
                format!(
                    "{} settled on {} - no matching order",
                    format_money(orphan.gross_amount),
                    orphan.settle_date
                ),
            ));
        }

        for unsettled in &report.unsettled {
            issues.push(self.issue(
                IssueCategory::UnsettledOrder,
                Some(&unsettled.order_id),
                None,
                format!(
                    "{} order for {} ({}) has no settled transaction",
                    unsettled.status,
                    format_money(unsettled.grand_total),
                    unsettled.payment_method
                ),
            ));
        }

        for mismatch in &report.mismatches {
            let direction = match mismatch.direction {
                MismatchDirection::ProcessorChargedMore => "processor charged more",
                MismatchDirection::ProcessorChargedLess => "processor charged less",
            };
            issues.push(self.issue(
                IssueCategory::AmountMismatch,
                Some(&mismatch.order_id),
                Some(&mismatch.transaction_id),
                format!(
                    "order total {} vs processor {}: {} by {}",
                    format_money(mismatch.order_total),
                    format_money(mismatch.processor_total),
                    direction,
                    format_money(mismatch.difference)
                ),
            ));
        }

        issues
    }
}

// ============================================================================
// ISSUE SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueSummary {
    pub total: usize,
    pub critical: usize,
    pub by_category: BTreeMap<IssueCategory, usize>,
}

impl IssueSummary {
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut summary = IssueSummary::default();
        for issue in issues {
            summary.total += 1;
            if issue.severity == Severity::Critical {
                summary.critical += 1;
            }
            *summary.by_category.entry(issue.category).or_insert(0) += 1;
        }
        summary
    }

    pub fn count(&self, category: IssueCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        format!("{} issues logged ({} critical)", self.total, self.critical)
    }
}

// ============================================================================
// TESTS
// ============================================================================
