// 📤 Export - CSV files and the JSON upload payload
//
// Output files (all in one directory):
//   validation_flags.csv    every Issue, for the finance team
//   orders_clean.csv        canonical orders
//   settlement_ready.csv    flat upload file
//   settlement_ready.json   upload payload with summary header
//   program_summary.csv     per incentive program
//   monthly_summary.csv     per settlement month
//   reconciliation.json     the four reconciliation views

use crate::data_quality::Issue;
use crate::models::{CanonicalOrder, SettlementRecord};
use crate::pipeline::PipelineOutput;
use crate::settlement::{monthly_summary, program_summary, SettlementSummary};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const SOURCE_SYSTEM: &str = "Magento / Commerce Manager";
pub const TARGET_SYSTEM: &str = "Microsoft Dynamics";

pub const ISSUES_FILE: &str = "validation_flags.csv";
pub const ORDERS_FILE: &str = "orders_clean.csv";
pub const SETTLEMENT_CSV_FILE: &str = "settlement_ready.csv";
pub const SETTLEMENT_JSON_FILE: &str = "settlement_ready.json";
pub const PROGRAM_SUMMARY_FILE: &str = "program_summary.csv";
pub const MONTHLY_SUMMARY_FILE: &str = "monthly_summary.csv";
pub const RECONCILIATION_FILE: &str = "reconciliation.json";

/// Status codes render zero-padded ("000" for unknown)
pub fn status_code_text(code: u16) -> String {
    format!("{:03}", code)
}

// ============================================================================
// FLAT ROWS
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IssueRow<'a> {
    pub issue_id: &'a str,
    pub category: &'static str,
    pub severity: &'static str,
    pub order_id: Option<&'a str>,
    pub transaction_id: Option<&'a str>,
    pub detail: &'a str,
    pub action: &'a str,
    pub detected_at: String,
}

impl<'a> From<&'a Issue> for IssueRow<'a> {
    fn from(issue: &'a Issue) -> Self {
        IssueRow {
            issue_id: &issue.issue_id,
            category: issue.category.as_str(),
            severity: issue.severity.as_str(),
            order_id: issue.order_id.as_deref(),
            transaction_id: issue.transaction_id.as_deref(),
            detail: &issue.detail,
            action: &issue.action,
            detected_at: issue.detected_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderRow<'a> {
    pub order_id: &'a str,
    pub customer_id: &'a str,
    pub order_timestamp: String,
    pub sku_raw: &'a str,
    pub sku_normalized: &'a str,
    pub qty: u32,
    pub subtotal: Decimal,
    pub total_tax: Decimal,
    pub tax_source: &'static str,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub grand_total: Decimal,
    pub status: &'a str,
    pub dynamics_status_code: String,
    pub status_label: &'a str,
    pub eligible: bool,
    pub payment_method: &'a str,
    pub invoice_number: Option<&'a str>,
    pub incentive_program: &'a str,
    pub incentive_rate: Decimal,
    pub incentive_amount: Decimal,
}

impl<'a> From<&'a CanonicalOrder> for OrderRow<'a> {
    fn from(o: &'a CanonicalOrder) -> Self {
        OrderRow {
            order_id: &o.order_id,
            customer_id: &o.customer_id,
            order_timestamp: o.order_timestamp_iso(),
            sku_raw: &o.sku_raw,
            sku_normalized: &o.sku,
            qty: o.qty,
            subtotal: o.subtotal,
            total_tax: o.tax,
            tax_source: o.tax_source.as_str(),
            shipping: o.shipping,
            discount: o.discount,
            grand_total: o.grand_total,
            status: &o.status,
            dynamics_status_code: status_code_text(o.status_code),
            status_label: &o.status_label,
            eligible: o.eligible,
            payment_method: &o.payment_method,
            invoice_number: o.invoice_number.as_deref(),
            incentive_program: &o.incentive_program,
            incentive_rate: o.incentive_rate,
            incentive_amount: o.incentive_amount,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementRow<'a> {
    pub order_id: &'a str,
    pub invoice_number: Option<&'a str>,
    pub order_timestamp: String,
    pub settlement_date: String,
    pub customer_id: &'a str,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub state: Option<&'a str>,
    pub sku_normalized: &'a str,
    pub incentive_program: &'a str,
    pub qty: u32,
    pub subtotal: Decimal,
    pub total_tax: Decimal,
    pub tax_source: &'static str,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub grand_total: Decimal,
    pub incentive_rate: Decimal,
    pub incentive_amount: Decimal,
    pub processing_fee: Decimal,
    pub net_settled_amount: Decimal,
    pub dynamics_status_code: String,
    pub status_label: &'a str,
    pub txn_id: &'a str,
}

impl<'a> From<&'a SettlementRecord> for SettlementRow<'a> {
    fn from(r: &'a SettlementRecord) -> Self {
        SettlementRow {
            order_id: &r.order_id,
            invoice_number: r.invoice_number.as_deref(),
            order_timestamp: r.order_timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            settlement_date: r.settlement_date.format("%Y-%m-%d").to_string(),
            customer_id: &r.customer_id,
            first_name: r.first_name.as_deref(),
            last_name: r.last_name.as_deref(),
            email: r.email.as_deref(),
            state: r.state.as_deref(),
            sku_normalized: &r.sku,
            incentive_program: &r.incentive_program,
            qty: r.qty,
            subtotal: r.subtotal,
            total_tax: r.tax,
            tax_source: r.tax_source.as_str(),
            shipping: r.shipping,
            discount: r.discount,
            grand_total: r.grand_total,
            incentive_rate: r.incentive_rate,
            incentive_amount: r.incentive_amount,
            processing_fee: r.processing_fee,
            net_settled_amount: r.net_settled_amount,
            dynamics_status_code: status_code_text(r.status_code),
            status_label: &r.status_label,
            txn_id: &r.transaction_id,
        }
    }
}

// ============================================================================
// JSON PAYLOAD
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SettlementPayload<'a> {
    pub export_timestamp: String,
    pub source_system: &'static str,
    pub target_system: &'static str,
    pub record_count: usize,
    pub summary: &'a SettlementSummary,
    pub run_fingerprint: &'a str,
    pub orders: Vec<SettlementRow<'a>>,
}

impl<'a> SettlementPayload<'a> {
    pub fn from_output(output: &'a PipelineOutput) -> Self {
        SettlementPayload {
            export_timestamp: output.run_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            source_system: SOURCE_SYSTEM,
            target_system: TARGET_SYSTEM,
            record_count: output.settlement_records.len(),
            summary: &output.settlement_summary,
            run_fingerprint: &output.fingerprint,
            orders: output.settlement_records.iter().map(SettlementRow::from).collect(),
        }
    }
}

// ============================================================================
// WRITERS
// ============================================================================

/// Serialize rows to any writer, header first
pub fn write_csv<W: Write, T: Serialize>(writer: W, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row).context("Failed to serialize CSV row")?;
    }
    csv_writer.flush().context("Failed to flush CSV writer")?;
    Ok(())
}

fn write_csv_file<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    write_csv(BufWriter::new(file), rows)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to write JSON to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Every file written by one export
#[derive(Debug, Clone, Default)]
pub struct ExportManifest {
    pub files: Vec<PathBuf>,
}

/// Write all file artifacts into `out_dir` (created if missing)
pub fn export_files(output: &PipelineOutput, out_dir: &Path) -> Result<ExportManifest> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    let mut manifest = ExportManifest::default();
    let mut target = |name: &str| {
        let path = out_dir.join(name);
        manifest.files.push(path.clone());
        path
    };

    write_csv_file(&target(ISSUES_FILE), output.issues.iter().map(IssueRow::from))?;
    write_csv_file(
        &target(ORDERS_FILE),
        output.canonical_orders.iter().map(OrderRow::from),
    )?;
    write_csv_file(
        &target(SETTLEMENT_CSV_FILE),
        output.settlement_records.iter().map(SettlementRow::from),
    )?;
    write_json_file(
        &target(SETTLEMENT_JSON_FILE),
        &SettlementPayload::from_output(output),
    )?;
    write_csv_file(
        &target(PROGRAM_SUMMARY_FILE),
        program_summary(&output.settlement_records),
    )?;
    write_csv_file(
        &target(MONTHLY_SUMMARY_FILE),
        monthly_summary(&output.settlement_records),
    )?;
    write_json_file(&target(RECONCILIATION_FILE), &output.reconciliation)?;

    info!(dir = %out_dir.display(), files = manifest.files.len(), "Export complete");
    Ok(manifest)
}

// ============================================================================
// TESTS
// ============================================================================
