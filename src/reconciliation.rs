// ⚖️ Reconciliation Engine - Orders vs payment processor settlements
//
// Four independent views over the same two ledgers:
//   1. Aggregate gap        eligible orders vs settled transactions (sums only)
//   2. Orphan settlements   settled money with no recorded order
//   3. Unsettled orders     eligible orders with no settled transaction
//   4. Amount mismatches    matched pairs whose amounts differ by > tolerance
//
// No view feeds another; an order can show up in more than one.

use crate::deduplication::unique_transactions;
use crate::models::{CanonicalOrder, SettlementTransaction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Default tolerance for order vs processor amounts ($0.01)
pub const DEFAULT_AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

// ============================================================================
// VIEW 1: AGGREGATE GAP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateGap {
    pub eligible_order_count: usize,
    pub eligible_order_total: Decimal,

    /// Distinct order ids referenced by settled transactions
    pub settled_order_count: usize,
    pub settled_total: Decimal,

    /// orders - settlements
    pub count_gap: i64,
    pub amount_gap: Decimal,
}

// ============================================================================
// VIEW 2: ORPHAN SETTLEMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanSettlement {
    pub transaction_id: String,
    pub order_id: String,
    pub gross_amount: Decimal,
    pub settle_date: NaiveDate,
}

// ============================================================================
// VIEW 3: UNSETTLED ELIGIBLE ORDERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsettledOrder {
    pub order_id: String,
    pub status: String,
    pub grand_total: Decimal,
    pub payment_method: String,
}

// ============================================================================
// VIEW 4: AMOUNT MISMATCHES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchDirection {
    /// Processor gross is above the order total
    ProcessorChargedMore,
    /// Processor gross is below the order total
    ProcessorChargedLess,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountMismatch {
    pub order_id: String,
    pub transaction_id: String,
    pub order_total: Decimal,
    pub processor_total: Decimal,
    /// Absolute difference
    pub difference: Decimal,
    pub direction: MismatchDirection,
}

// ============================================================================
// PER-ORDER OUTCOME
// ============================================================================

/// Where an eligible order lands; exactly one applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationOutcome {
    Unsettled,
    Mismatched,
    Clean,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub aggregate: AggregateGap,
    pub orphans: Vec<OrphanSettlement>,
    pub unsettled: Vec<UnsettledOrder>,
    pub mismatches: Vec<AmountMismatch>,
    pub tolerance: Decimal,
}

impl ReconciliationReport {
    /// Nothing outstanding in any view
    pub fn is_balanced(&self) -> bool {
        self.orphans.is_empty()
            && self.unsettled.is_empty()
            && self.mismatches.is_empty()
            && self.aggregate.count_gap == 0
            && self.aggregate.amount_gap.abs() <= self.tolerance
    }

    /// None for ineligible orders
    pub fn outcome(&self, order: &CanonicalOrder) -> Option<ReconciliationOutcome> {
        if !order.eligible {
            return None;
        }

        if self.unsettled.iter().any(|u| u.order_id == order.order_id) {
            Some(ReconciliationOutcome::Unsettled)
        } else if self.mismatches.iter().any(|m| m.order_id == order.order_id) {
            Some(ReconciliationOutcome::Mismatched)
        } else {
            Some(ReconciliationOutcome::Clean)
        }
    }

    pub fn orphan_total(&self) -> Decimal {
        self.orphans.iter().map(|o| o.gross_amount).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciliation: {} eligible orders (${:.2}) vs {} settled (${:.2}), gap {} orders / ${:.2}; {} orphans, {} unsettled, {} mismatches",
            self.aggregate.eligible_order_count,
            self.aggregate.eligible_order_total,
            self.aggregate.settled_order_count,
            self.aggregate.settled_total,
            self.aggregate.count_gap,
            self.aggregate.amount_gap,
            self.orphans.len(),
            self.unsettled.len(),
            self.mismatches.len()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Max allowed |order total - processor gross| (default: $0.01)
    pub tolerance: Decimal,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: DEFAULT_AMOUNT_TOLERANCE,
        }
    }

    pub fn with_tolerance(tolerance: Decimal) -> Self {
        ReconciliationEngine { tolerance }
    }

    /// Build all four views. Orders are expected deduplicated.
    pub fn reconcile(
        &self,
        orders: &[CanonicalOrder],
        settlements: &[SettlementTransaction],
    ) -> ReconciliationReport {
        // A repeated ledger row is one payment, not two
        let settled: Vec<&SettlementTransaction> = unique_transactions(settlements)
            .into_iter()
            .filter(|t| t.is_settled())
            .collect();

        ReconciliationReport {
            aggregate: self.aggregate_gap(orders, &settled),
            orphans: self.find_orphans(orders, &settled),
            unsettled: self.find_unsettled(orders, &settled),
            mismatches: self.find_mismatches(orders, &settled),
            tolerance: self.tolerance,
        }
    }

    /// View 1: count and sum deltas, no per-record matching
    fn aggregate_gap(
        &self,
        orders: &[CanonicalOrder],
        settled: &[&SettlementTransaction],
    ) -> AggregateGap {
        let eligible_ids: BTreeSet<&str> = orders
            .iter()
            .filter(|o| o.eligible)
            .map(|o| o.order_id.as_str())
            .collect();
        let eligible_order_total: Decimal = orders
            .iter()
            .filter(|o| o.eligible)
            .map(|o| o.grand_total)
            .sum();

        let settled_ids: BTreeSet<&str> = settled.iter().map(|t| t.order_id.as_str()).collect();
        let settled_total: Decimal = settled.iter().map(|t| t.gross_amount).sum();

        AggregateGap {
            eligible_order_count: eligible_ids.len(),
            eligible_order_total,
            settled_order_count: settled_ids.len(),
            settled_total,
            count_gap: eligible_ids.len() as i64 - settled_ids.len() as i64,
            amount_gap: eligible_order_total - settled_total,
        }
    }

    /// View 2: settled transactions whose order_id is unknown
    fn find_orphans(
        &self,
        orders: &[CanonicalOrder],
        settled: &[&SettlementTransaction],
    ) -> Vec<OrphanSettlement> {
        let known: HashSet<&str> = orders.iter().map(|o| o.order_id.as_str()).collect();

        settled
            .iter()
            .filter(|t| !known.contains(t.order_id.as_str()))
            .map(|t| OrphanSettlement {
                transaction_id: t.transaction_id.clone(),
                order_id: t.order_id.clone(),
                gross_amount: t.gross_amount,
                settle_date: t.settle_date,
            })
            .collect()
    }

    /// View 3: eligible orders nobody settled
    fn find_unsettled(
        &self,
        orders: &[CanonicalOrder],
        settled: &[&SettlementTransaction],
    ) -> Vec<UnsettledOrder> {
        let settled_ids: HashSet<&str> = settled.iter().map(|t| t.order_id.as_str()).collect();

        orders
            .iter()
            .filter(|o| o.eligible && !settled_ids.contains(o.order_id.as_str()))
            .map(|o| UnsettledOrder {
                order_id: o.order_id.clone(),
                status: o.status.clone(),
                grand_total: o.grand_total,
                payment_method: o.payment_method.clone(),
            })
            .collect()
    }

    /// View 4: order ⋈ settled transaction, difference above tolerance.
    /// Largest discrepancy first.
    fn find_mismatches(
        &self,
        orders: &[CanonicalOrder],
        settled: &[&SettlementTransaction],
    ) -> Vec<AmountMismatch> {
        let by_id: HashMap<&str, &CanonicalOrder> =
            orders.iter().map(|o| (o.order_id.as_str(), o)).collect();

        let mut mismatches: Vec<AmountMismatch> = settled
            .iter()
            .filter_map(|t| {
                let order = by_id.get(t.order_id.as_str())?;
                let delta = t.gross_amount - order.grand_total;
                if delta.abs() <= self.tolerance {
                    return None;
                }

                Some(AmountMismatch {
                    order_id: order.order_id.clone(),
                    transaction_id: t.transaction_id.clone(),
                    order_total: order.grand_total,
                    processor_total: t.gross_amount,
                    difference: delta.abs(),
                    direction: if delta > Decimal::ZERO {
                        MismatchDirection::ProcessorChargedMore
                    } else {
                        MismatchDirection::ProcessorChargedLess
                    },
                })
            })
            .collect();

        mismatches.sort_by(|a, b| {
            b.difference
                .cmp(&a.difference)
                .then_with(|| a.order_id.cmp(&b.order_id))
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        mismatches
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SettlementStatus, TaxProvenance};
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn money(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn create_test_order(id: &str, grand_total: &str, eligible: bool) -> CanonicalOrder {
        CanonicalOrder {
            order_id: id.to_string(),
            customer_id: "CUST-0001".to_string(),
            order_timestamp: Utc.with_ymd_and_hms(2024, 6, 22, 12, 0, 0).unwrap(),
            sku_raw: "SKU-LED-001".to_string(),
            sku: "SKU-LED-001".to_string(),
            qty: 1,
            subtotal: money(grand_total),
            tax: Decimal::ZERO,
            tax_source: TaxProvenance::Missing,
            shipping: Decimal::ZERO,
            discount: Decimal::ZERO,
            grand_total: money(grand_total),
            status: if eligible { "complete" } else { "pending" }.to_string(),
            status_code: if eligible { 110 } else { 50 },
            status_label: if eligible { "INVOICED" } else { "PENDING" }.to_string(),
            eligible,
            payment_method: "authorizenet".to_string(),
            invoice_number: None,
            incentive_program: "ENERGY_EFF_LIGHTING".to_string(),
            incentive_rate: money("0.15"),
            incentive_amount: Decimal::ZERO,
        }
    }

    fn create_test_settlement(
        txn: &str,
        order_id: &str,
        gross: &str,
        status: SettlementStatus,
    ) -> SettlementTransaction {
        SettlementTransaction {
            transaction_id: txn.to_string(),
            order_id: order_id.to_string(),
            settle_date: NaiveDate::from_ymd_opt(2024, 6, 24).unwrap(),
            gross_amount: money(gross),
            processor_fee: money("0.30"),
            net_amount: money(gross) - money("0.30"),
            status,
            auth_code: "AUTH10001".to_string(),
        }
    }

    #[test]
    fn test_balanced_ledgers() {
        let engine = ReconciliationEngine::new();
        let orders = vec![create_test_order("ORD-00001", "100.00", true)];
        let settlements = vec![create_test_settlement(
            "TXN-1",
            "ORD-00001",
            "100.00",
            SettlementStatus::Settled,
        )];

        let report = engine.reconcile(&orders, &settlements);

        assert!(report.is_balanced());
        assert_eq!(report.aggregate.count_gap, 0);
        assert_eq!(report.outcome(&orders[0]), Some(ReconciliationOutcome::Clean));
    }

    #[test]
    fn test_aggregate_gap_ignores_unsettled_statuses() {
        let engine = ReconciliationEngine::new();
        let orders = vec![
            create_test_order("ORD-00001", "100.00", true),
            create_test_order("ORD-00002", "50.00", true),
            create_test_order("ORD-00003", "999.00", false),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", "100.00", SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", "50.00", SettlementStatus::Voided),
        ];

        let gap = engine.reconcile(&orders, &settlements).aggregate;

        assert_eq!(gap.eligible_order_count, 2);
        assert_eq!(gap.eligible_order_total, money("150.00"));
        assert_eq!(gap.settled_order_count, 1);
        assert_eq!(gap.settled_total, money("100.00"));
        assert_eq!(gap.count_gap, 1);
        assert_eq!(gap.amount_gap, money("50.00"));
    }

    #[test]
    fn test_orphan_settlement_detected() {
        let engine = ReconciliationEngine::new();
        let orders = vec![create_test_order("ORD-00001", "100.00", true)];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", "100.00", SettlementStatus::Settled),
            create_test_settlement("TXN-ORPHAN-0", "ORD-GHOST-0", "75.25", SettlementStatus::Settled),
            create_test_settlement("TXN-ORPHAN-1", "ORD-GHOST-1", "10.00", SettlementStatus::Refunded),
        ];

        let report = engine.reconcile(&orders, &settlements);

        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].transaction_id, "TXN-ORPHAN-0");
        assert_eq!(report.orphan_total(), money("75.25"));
        assert!(!report.is_balanced());
    }

    #[test]
    fn test_unsettled_eligible_orders() {
        let engine = ReconciliationEngine::new();
        let orders = vec![
            create_test_order("ORD-00001", "100.00", true),
            create_test_order("ORD-00002", "60.00", true),
            create_test_order("ORD-00003", "70.00", false),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", "100.00", SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", "60.00", SettlementStatus::Refunded),
        ];

        let report = engine.reconcile(&orders, &settlements);

        assert_eq!(report.unsettled.len(), 1);
        assert_eq!(report.unsettled[0].order_id, "ORD-00002");
        assert_eq!(report.outcome(&orders[1]), Some(ReconciliationOutcome::Unsettled));
        assert_eq!(report.outcome(&orders[2]), None);
    }

    #[test]
    fn test_amount_mismatch_direction() {
        let engine = ReconciliationEngine::new();
        let orders = vec![
            create_test_order("ORD-00001", "100.00", true),
            create_test_order("ORD-00002", "100.00", true),
            create_test_order("ORD-00003", "100.00", true),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", "105.00", SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", "99.00", SettlementStatus::Settled),
            create_test_settlement("TXN-3", "ORD-00003", "100.01", SettlementStatus::Settled),
        ];

        let report = engine.reconcile(&orders, &settlements);

        assert_eq!(report.mismatches.len(), 2);
        assert_eq!(report.mismatches[0].order_id, "ORD-00001");
        assert_eq!(report.mismatches[0].direction, MismatchDirection::ProcessorChargedMore);
        assert_eq!(report.mismatches[0].difference, money("5.00"));
        assert_eq!(report.mismatches[1].order_id, "ORD-00002");
        assert_eq!(report.mismatches[1].direction, MismatchDirection::ProcessorChargedLess);

        // exactly one cent is within tolerance
        assert_eq!(report.outcome(&orders[2]), Some(ReconciliationOutcome::Clean));
    }

    #[test]
    fn test_eligible_orders_partition() {
        let engine = ReconciliationEngine::new();
        let orders = vec![
            create_test_order("ORD-00001", "100.00", true),
            create_test_order("ORD-00002", "100.00", true),
            create_test_order("ORD-00003", "100.00", true),
            create_test_order("ORD-00004", "100.00", false),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", "100.00", SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", "120.00", SettlementStatus::Settled),
            create_test_settlement("TXN-3", "ORD-00003", "300.00", SettlementStatus::Voided),
            create_test_settlement("TXN-4", "ORD-00004", "80.00", SettlementStatus::Settled),
        ];

        let report = engine.reconcile(&orders, &settlements);

        for order in orders.iter().filter(|o| o.eligible) {
            let in_unsettled = report.unsettled.iter().any(|u| u.order_id == order.order_id);
            let in_mismatch = report.mismatches.iter().any(|m| m.order_id == order.order_id);
            assert!(!(in_unsettled && in_mismatch), "{}", order.order_id);
        }

        assert_eq!(report.outcome(&orders[0]), Some(ReconciliationOutcome::Clean));
        assert_eq!(report.outcome(&orders[1]), Some(ReconciliationOutcome::Mismatched));
        assert_eq!(report.outcome(&orders[2]), Some(ReconciliationOutcome::Unsettled));

        // ineligible but settled: still compared for amounts
        assert!(report.mismatches.iter().any(|m| m.order_id == "ORD-00004"));
    }

    #[test]
    fn test_custom_tolerance() {
        let engine = ReconciliationEngine::with_tolerance(money("1.00"));
        let orders = vec![create_test_order("ORD-00001", "100.00", true)];
        let settlements = vec![create_test_settlement(
            "TXN-1",
            "ORD-00001",
            "100.75",
            SettlementStatus::Settled,
        )];

        assert!(engine.reconcile(&orders, &settlements).mismatches.is_empty());
    }

    #[test]
    fn test_repeated_ledger_row_counted_once() {
        let engine = ReconciliationEngine::new();
        let orders = vec![create_test_order("ORD-00001", "100.00", true)];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", "100.00", SettlementStatus::Settled),
            create_test_settlement("TXN-1", "ORD-00001", "100.00", SettlementStatus::Settled),
        ];

        let report = engine.reconcile(&orders, &settlements);

        assert_eq!(report.aggregate.settled_total, money("100.00"));
        assert_eq!(report.aggregate.amount_gap, Decimal::ZERO);
        assert!(report.mismatches.is_empty());
        assert!(report.is_balanced());
    }
}
