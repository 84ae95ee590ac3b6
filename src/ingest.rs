// 📥 CSV Ingestion - Storefront and processor exports → raw records
//
// Shape validation only: columns present, numbers numeric, dates parse.
// Content checks (currency text, order dates, duplicates) belong to the core,
// so `subtotal` and `order_date` stay as the raw strings they arrived as.

use crate::models::{Customer, RawDataset, RawOrder, SettlementStatus, SettlementTransaction};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// ISO dates used by the customer and processor exports
const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// ROW ACCESS BY HEADER NAME
// ============================================================================

struct Columns {
    index: HashMap<String, usize>,
    source: String,
}

impl Columns {
    fn new(headers: &StringRecord, source: &str, required: &[&str]) -> Result<Self> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();

        for name in required {
            if !index.contains_key(*name) {
                return Err(anyhow!("{}: missing required column '{}'", source, name));
            }
        }

        Ok(Columns {
            index,
            source: source.to_string(),
        })
    }

    fn text<'r>(&self, record: &'r StringRecord, name: &str) -> &'r str {
        self.index
            .get(name)
            .and_then(|i| record.get(*i))
            .map(str::trim)
            .unwrap_or("")
    }

    fn optional(&self, record: &StringRecord, name: &str) -> Option<String> {
        let value = self.text(record, name);
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    fn decimal(&self, record: &StringRecord, name: &str, line: usize) -> Result<Decimal> {
        let value = self.text(record, name);
        Decimal::from_str(value).with_context(|| {
            format!("{} line {}: column '{}' is not numeric: '{}'", self.source, line, name, value)
        })
    }

    /// Blank or NaN → None
    fn optional_decimal(
        &self,
        record: &StringRecord,
        name: &str,
        line: usize,
    ) -> Result<Option<Decimal>> {
        let value = self.text(record, name);
        if value.is_empty() || value.eq_ignore_ascii_case("nan") {
            return Ok(None);
        }
        self.decimal(record, name, line).map(Some)
    }

    fn date(&self, record: &StringRecord, name: &str, line: usize) -> Result<NaiveDate> {
        let value = self.text(record, name);
        NaiveDate::parse_from_str(value, ISO_DATE_FORMAT).with_context(|| {
            format!("{} line {}: column '{}' is not a YYYY-MM-DD date: '{}'", self.source, line, name, value)
        })
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string()
}

// ============================================================================
// ORDERS
// ============================================================================

const ORDER_COLUMNS: &[&str] = &[
    "order_id",
    "customer_id",
    "order_date",
    "sku",
    "qty",
    "subtotal",
    "shipping",
    "discount",
    "grand_total",
    "status",
    "payment_method",
];

pub fn read_orders<R: Read>(reader: R, source: &str) -> Result<Vec<RawOrder>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV headers in {}", source))?
        .clone();
    let cols = Columns::new(&headers, source, ORDER_COLUMNS)?;

    let mut orders = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let line = line_num + 2; // 1-indexed + header row
        let record = result
            .with_context(|| format!("Failed to parse CSV line {} in {}", line, source))?;

        let qty_raw = cols.text(&record, "qty");
        let qty = qty_raw.parse::<u32>().with_context(|| {
            format!("{} line {}: column 'qty' is not a count: '{}'", source, line, qty_raw)
        })?;

        orders.push(RawOrder {
            order_id: cols.text(&record, "order_id").to_string(),
            customer_id: cols.text(&record, "customer_id").to_string(),
            order_date: cols.text(&record, "order_date").to_string(),
            sku: cols.text(&record, "sku").to_string(),
            qty,
            subtotal: cols.text(&record, "subtotal").to_string(),
            state_tax: cols.optional_decimal(&record, "state_tax", line)?,
            county_tax: cols.optional_decimal(&record, "county_tax", line)?,
            combined_tax: cols.optional_decimal(&record, "combined_tax", line)?,
            shipping: cols.decimal(&record, "shipping", line)?,
            discount: cols.decimal(&record, "discount", line)?,
            grand_total: cols.decimal(&record, "grand_total", line)?,
            status: cols.text(&record, "status").to_string(),
            payment_method: cols.text(&record, "payment_method").to_string(),
            invoice_number: cols.optional(&record, "invoice_number"),
        });
    }

    Ok(orders)
}

pub fn load_orders(path: &Path) -> Result<Vec<RawOrder>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let orders = read_orders(file, &source_name(path))?;
    info!(file = %path.display(), rows = orders.len(), "Loaded orders");
    Ok(orders)
}

// ============================================================================
// CUSTOMERS
// ============================================================================

const CUSTOMER_COLUMNS: &[&str] = &[
    "customer_id",
    "first_name",
    "last_name",
    "email",
    "state",
    "created_at",
];

pub fn read_customers<R: Read>(reader: R, source: &str) -> Result<Vec<Customer>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV headers in {}", source))?
        .clone();
    let cols = Columns::new(&headers, source, CUSTOMER_COLUMNS)?;

    let mut customers = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let line = line_num + 2;
        let record = result
            .with_context(|| format!("Failed to parse CSV line {} in {}", line, source))?;

        customers.push(Customer {
            customer_id: cols.text(&record, "customer_id").to_string(),
            first_name: cols.text(&record, "first_name").to_string(),
            last_name: cols.text(&record, "last_name").to_string(),
            email: cols.text(&record, "email").to_string(),
            state: cols.text(&record, "state").to_string(),
            created_at: cols.date(&record, "created_at", line)?,
            loyalty_tier: Customer::normalize_tier(
                cols.optional(&record, "loyalty_tier").as_deref(),
            ),
        });
    }

    Ok(customers)
}

pub fn load_customers(path: &Path) -> Result<Vec<Customer>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let customers = read_customers(file, &source_name(path))?;
    info!(file = %path.display(), rows = customers.len(), "Loaded customers");
    Ok(customers)
}

// ============================================================================
// SETTLEMENTS
// ============================================================================

const SETTLEMENT_COLUMNS: &[&str] = &[
    "transaction_id",
    "order_id",
    "settle_date",
    "gross_amount",
    "processor_fee",
    "net_amount",
    "status",
    "auth_code",
];

pub fn read_settlements<R: Read>(reader: R, source: &str) -> Result<Vec<SettlementTransaction>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV headers in {}", source))?
        .clone();
    let cols = Columns::new(&headers, source, SETTLEMENT_COLUMNS)?;

    let mut settlements = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let line = line_num + 2;
        let record = result
            .with_context(|| format!("Failed to parse CSV line {} in {}", line, source))?;

        let status_raw = cols.text(&record, "status");
        let status = SettlementStatus::parse(status_raw).ok_or_else(|| {
            anyhow!("{} line {}: unknown settlement status '{}'", source, line, status_raw)
        })?;

        settlements.push(SettlementTransaction {
            transaction_id: cols.text(&record, "transaction_id").to_string(),
            order_id: cols.text(&record, "order_id").to_string(),
            settle_date: cols.date(&record, "settle_date", line)?,
            gross_amount: cols.decimal(&record, "gross_amount", line)?,
            processor_fee: cols.decimal(&record, "processor_fee", line)?,
            net_amount: cols.decimal(&record, "net_amount", line)?,
            status,
            auth_code: cols.text(&record, "auth_code").to_string(),
        });
    }

    Ok(settlements)
}

pub fn load_settlements(path: &Path) -> Result<Vec<SettlementTransaction>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let settlements = read_settlements(file, &source_name(path))?;
    info!(file = %path.display(), rows = settlements.len(), "Loaded settlements");
    Ok(settlements)
}

/// Load all three exports
pub fn load_dataset(orders: &Path, customers: &Path, settlements: &Path) -> Result<RawDataset> {
    Ok(RawDataset {
        orders: load_orders(orders)?,
        customers: load_customers(customers)?,
        settlements: load_settlements(settlements)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
