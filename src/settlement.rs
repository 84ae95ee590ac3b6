// 🧾 Settlement Builder - Final rows for the financial system
// Eligible orders ⋈ settled transactions, left-joined with customers.

use crate::deduplication::unique_transactions;
use crate::models::{CanonicalOrder, Customer, SettlementRecord, SettlementTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// SETTLEMENT BUILDER
// ============================================================================

#[derive(Debug, Default)]
pub struct SettlementBuilder;

impl SettlementBuilder {
    pub fn new() -> Self {
        SettlementBuilder
    }

    /// One record per (eligible order, settled transaction) pair; a repeated
    /// transaction_id contributes once.
    /// Ordered by settlement date, then order id.
    pub fn build(
        &self,
        orders: &[CanonicalOrder],
        settlements: &[SettlementTransaction],
        customers: &[Customer],
    ) -> Vec<SettlementRecord> {
        let eligible: HashMap<&str, &CanonicalOrder> = orders
            .iter()
            .filter(|o| o.eligible)
            .map(|o| (o.order_id.as_str(), o))
            .collect();

        // Last row wins if the customer export repeats an id
        let customers: HashMap<&str, &Customer> = customers
            .iter()
            .map(|c| (c.customer_id.as_str(), c))
            .collect();

        let mut records: Vec<SettlementRecord> = unique_transactions(settlements)
            .into_iter()
            .filter(|t| t.is_settled())
            .filter_map(|t| {
                let order = eligible.get(t.order_id.as_str())?;
                let customer = customers.get(order.customer_id.as_str());
                Some(Self::record(order, t, customer.copied()))
            })
            .collect();

        records.sort_by(|a, b| {
            a.settlement_date
                .cmp(&b.settlement_date)
                .then_with(|| a.order_id.cmp(&b.order_id))
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        records
    }

    fn record(
        order: &CanonicalOrder,
        txn: &SettlementTransaction,
        customer: Option<&Customer>,
    ) -> SettlementRecord {
        SettlementRecord {
            order_id: order.order_id.clone(),
            invoice_number: order.invoice_number.clone(),
            order_timestamp: order.order_timestamp,
            settlement_date: txn.settle_date,
            customer_id: order.customer_id.clone(),
            first_name: customer.map(|c| c.first_name.clone()),
            last_name: customer.map(|c| c.last_name.clone()),
            email: customer.map(|c| c.email.clone()),
            state: customer.map(|c| c.state.clone()),
            sku: order.sku.clone(),
            incentive_program: order.incentive_program.clone(),
            qty: order.qty,
            subtotal: order.subtotal,
            tax: order.tax,
            tax_source: order.tax_source,
            shipping: order.shipping,
            discount: order.discount,
            grand_total: order.grand_total,
            incentive_rate: order.incentive_rate,
            incentive_amount: order.incentive_amount,
            processing_fee: txn.processor_fee,
            net_settled_amount: txn.net_amount,
            status_code: order.status_code,
            status_label: order.status_label.clone(),
            transaction_id: txn.transaction_id.clone(),
        }
    }
}

// ============================================================================
// SETTLEMENT SUMMARY (payload header)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub record_count: usize,
    pub total_gross_revenue: Decimal,
    pub total_incentive_payable: Decimal,
    pub total_processing_fees: Decimal,
    pub net_to_client: Decimal,
}

impl SettlementSummary {
    pub fn from_records(records: &[SettlementRecord]) -> Self {
        let mut summary = SettlementSummary {
            record_count: records.len(),
            ..Default::default()
        };
        for r in records {
            summary.total_gross_revenue += r.grand_total;
            summary.total_incentive_payable += r.incentive_amount;
            summary.total_processing_fees += r.processing_fee;
            summary.net_to_client += r.net_settled_amount;
        }
        summary
    }

    pub fn summary(&self) -> String {
        format!(
            "{} settlement records: gross ${:.2}, incentive ${:.2}, fees ${:.2}, net ${:.2}",
            self.record_count,
            self.total_gross_revenue,
            self.total_incentive_payable,
            self.total_processing_fees,
            self.net_to_client
        )
    }
}

// ============================================================================
// PROGRAM SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSummary {
    pub incentive_program: String,
    pub order_count: usize,
    pub total_subtotal: Decimal,
    pub total_tax: Decimal,
    pub total_incentive: Decimal,
    pub net_revenue: Decimal,
}

/// Per incentive program, largest net revenue first
pub fn program_summary(records: &[SettlementRecord]) -> Vec<ProgramSummary> {
    let mut by_program: BTreeMap<&str, ProgramSummary> = BTreeMap::new();

    for r in records {
        let entry = by_program
            .entry(r.incentive_program.as_str())
            .or_insert_with(|| ProgramSummary {
                incentive_program: r.incentive_program.clone(),
                order_count: 0,
                total_subtotal: Decimal::ZERO,
                total_tax: Decimal::ZERO,
                total_incentive: Decimal::ZERO,
                net_revenue: Decimal::ZERO,
            });
        entry.order_count += 1;
        entry.total_subtotal += r.subtotal;
        entry.total_tax += r.tax;
        entry.total_incentive += r.incentive_amount;
        entry.net_revenue += r.net_settled_amount;
    }

    // BTreeMap order breaks net-revenue ties by program name
    let mut rows: Vec<ProgramSummary> = by_program.into_values().collect();
    rows.sort_by(|a, b| b.net_revenue.cmp(&a.net_revenue));
    rows
}

// ============================================================================
// MONTHLY SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    /// Settlement month, `YYYY-MM`
    pub month: String,
    pub transactions: usize,
    pub gross_revenue: Decimal,
    pub processing_fees: Decimal,
    pub incentive_payable: Decimal,
    pub net_to_client: Decimal,
}

/// Per settlement month, chronological
pub fn monthly_summary(records: &[SettlementRecord]) -> Vec<MonthlySummary> {
    let mut by_month: BTreeMap<String, MonthlySummary> = BTreeMap::new();

    for r in records {
        let month = r.settlement_date.format("%Y-%m").to_string();
        let entry = by_month
            .entry(month.clone())
            .or_insert_with(|| MonthlySummary {
                month,
                transactions: 0,
                gross_revenue: Decimal::ZERO,
                processing_fees: Decimal::ZERO,
                incentive_payable: Decimal::ZERO,
                net_to_client: Decimal::ZERO,
            });
        entry.transactions += 1;
        entry.gross_revenue += r.grand_total;
        entry.processing_fees += r.processing_fee;
        entry.incentive_payable += r.incentive_amount;
        entry.net_to_client += r.net_settled_amount;
    }

    by_month.into_values().collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SettlementStatus, TaxProvenance};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::str::FromStr;

    fn money(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn create_test_order(id: &str, customer: &str, program: &str, eligible: bool) -> CanonicalOrder {
        CanonicalOrder {
            order_id: id.to_string(),
            customer_id: customer.to_string(),
            order_timestamp: Utc.with_ymd_and_hms(2024, 6, 22, 12, 0, 0).unwrap(),
            sku_raw: "SKU-LED-001".to_string(),
            sku: "SKU-LED-001".to_string(),
            qty: 2,
            subtotal: money("100.00"),
            tax: money("7.00"),
            tax_source: TaxProvenance::Combined,
            shipping: money("5.00"),
            discount: Decimal::ZERO,
            grand_total: money("112.00"),
            status: "complete".to_string(),
            status_code: 110,
            status_label: "INVOICED".to_string(),
            eligible,
            payment_method: "paypal".to_string(),
            invoice_number: Some(format!("INV-{}", id)),
            incentive_program: program.to_string(),
            incentive_rate: money("0.15"),
            incentive_amount: money("15.00"),
        }
    }

    fn create_test_settlement(
        txn: &str,
        order_id: &str,
        date: (i32, u32, u32),
        status: SettlementStatus,
    ) -> SettlementTransaction {
        SettlementTransaction {
            transaction_id: txn.to_string(),
            order_id: order_id.to_string(),
            settle_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            gross_amount: money("112.00"),
            processor_fee: money("3.55"),
            net_amount: money("108.45"),
            status,
            auth_code: "AUTH1".to_string(),
        }
    }

    fn create_test_customer(id: &str) -> Customer {
        Customer {
            customer_id: id.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            state: "TX".to_string(),
            created_at: NaiveDate::from_ymd_opt(2023, 1, 5).unwrap(),
            loyalty_tier: "gold".to_string(),
        }
    }

    #[test]
    fn test_inner_join_eligible_and_settled() {
        let orders = vec![
            create_test_order("ORD-00001", "CUST-1", "ENERGY_EFF_LIGHTING", true),
            create_test_order("ORD-00002", "CUST-1", "ENERGY_EFF_LIGHTING", false),
            create_test_order("ORD-00003", "CUST-1", "ENERGY_EFF_LIGHTING", true),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", (2024, 6, 24), SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", (2024, 6, 24), SettlementStatus::Settled),
            create_test_settlement("TXN-3", "ORD-00003", (2024, 6, 24), SettlementStatus::Voided),
            create_test_settlement("TXN-4", "ORD-GHOST", (2024, 6, 24), SettlementStatus::Settled),
        ];

        let records = SettlementBuilder::new().build(&orders, &settlements, &[]);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].order_id, "ORD-00001");
        assert_eq!(records[0].transaction_id, "TXN-1");
        assert_eq!(records[0].processing_fee, money("3.55"));
        assert_eq!(records[0].net_settled_amount, money("108.45"));
    }

    #[test]
    fn test_missing_customer_leaves_fields_empty() {
        let orders = vec![
            create_test_order("ORD-00001", "CUST-1", "ENERGY_EFF_LIGHTING", true),
            create_test_order("ORD-00002", "CUST-404", "ENERGY_EFF_LIGHTING", true),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", (2024, 6, 24), SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", (2024, 6, 24), SettlementStatus::Settled),
        ];
        let customers = vec![create_test_customer("CUST-1")];

        let records = SettlementBuilder::new().build(&orders, &settlements, &customers);

        assert_eq!(records[0].first_name.as_deref(), Some("Ada"));
        assert_eq!(records[0].state.as_deref(), Some("TX"));
        assert_eq!(records[1].order_id, "ORD-00002");
        assert!(records[1].first_name.is_none());
        assert!(records[1].email.is_none());
    }

    #[test]
    fn test_ordered_by_settlement_date_then_order_id() {
        let orders = vec![
            create_test_order("ORD-00001", "CUST-1", "A", true),
            create_test_order("ORD-00002", "CUST-1", "A", true),
            create_test_order("ORD-00003", "CUST-1", "A", true),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00003", (2024, 6, 20), SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", (2024, 6, 25), SettlementStatus::Settled),
            create_test_settlement("TXN-3", "ORD-00001", (2024, 6, 25), SettlementStatus::Settled),
        ];

        let records = SettlementBuilder::new().build(&orders, &settlements, &[]);
        let ids: Vec<_> = records.iter().map(|r| r.order_id.as_str()).collect();

        assert_eq!(ids, vec!["ORD-00003", "ORD-00001", "ORD-00002"]);
    }

    #[test]
    fn test_summaries() {
        let orders = vec![
            create_test_order("ORD-00001", "CUST-1", "ENERGY_EFF_LIGHTING", true),
            create_test_order("ORD-00002", "CUST-1", "SMART_THERMOSTAT", true),
            create_test_order("ORD-00003", "CUST-1", "SMART_THERMOSTAT", true),
        ];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", (2024, 6, 24), SettlementStatus::Settled),
            create_test_settlement("TXN-2", "ORD-00002", (2024, 6, 30), SettlementStatus::Settled),
            create_test_settlement("TXN-3", "ORD-00003", (2024, 7, 1), SettlementStatus::Settled),
        ];
        let records = SettlementBuilder::new().build(&orders, &settlements, &[]);

        let totals = SettlementSummary::from_records(&records);
        assert_eq!(totals.record_count, 3);
        assert_eq!(totals.total_gross_revenue, money("336.00"));
        assert_eq!(totals.total_incentive_payable, money("45.00"));
        assert_eq!(totals.total_processing_fees, money("10.65"));
        assert_eq!(totals.net_to_client, money("325.35"));

        let programs = program_summary(&records);
        assert_eq!(programs[0].incentive_program, "SMART_THERMOSTAT");
        assert_eq!(programs[0].order_count, 2);
        assert_eq!(programs[0].net_revenue, money("216.90"));
        assert_eq!(programs[1].incentive_program, "ENERGY_EFF_LIGHTING");

        let months = monthly_summary(&records);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, "2024-06");
        assert_eq!(months[0].transactions, 2);
        assert_eq!(months[1].month, "2024-07");
        assert_eq!(months[1].gross_revenue, money("112.00"));
    }

    #[test]
    fn test_repeated_transaction_builds_one_record() {
        let orders = vec![create_test_order("ORD-00001", "CUST-1", "ENERGY_EFF_LIGHTING", true)];
        let settlements = vec![
            create_test_settlement("TXN-1", "ORD-00001", (2024, 6, 24), SettlementStatus::Settled),
            create_test_settlement("TXN-1", "ORD-00001", (2024, 6, 24), SettlementStatus::Settled),
        ];

        let records = SettlementBuilder::new().build(&orders, &settlements, &[]);
        let summary = SettlementSummary::from_records(&records);

        assert_eq!(records.len(), 1);
        assert_eq!(summary.total_gross_revenue, money("112.00"));
        assert_eq!(summary.net_to_client, money("108.45"));
    }
}
