// 📦 Record Types - Raw inputs, canonical orders, final settlement rows
// Raw records are the immutable audit source; every later stage builds new values.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Loyalty tier used when the customer export has none.
pub const NO_LOYALTY_TIER: &str = "none";

// ============================================================================
// MONEY HELPERS
// ============================================================================

/// Round to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Render as `$1,247.50`.
pub fn format_money(value: Decimal) -> String {
    let rounded = round_money(value);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}${}.{}", sign, grouped, cents)
}

// ============================================================================
// RAW ORDER (as exported by the storefront)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOrder {
    /// NOT unique - re-exports produce duplicates
    pub order_id: String,
    pub customer_id: String,
    /// `MM/DD/YYYY HH:MM`
    pub order_date: String,
    /// Free-form casing and separators
    pub sku: String,
    pub qty: u32,
    /// Formatted currency text, e.g. "$1,247.50"
    pub subtotal: String,

    // Tax arrives either itemized or combined, never both
    pub state_tax: Option<Decimal>,
    pub county_tax: Option<Decimal>,
    pub combined_tax: Option<Decimal>,

    pub shipping: Decimal,
    pub discount: Decimal,
    pub grand_total: Decimal,
    pub status: String,
    pub payment_method: String,
    pub invoice_number: Option<String>,
}

impl RawOrder {
    pub fn has_invoice(&self) -> bool {
        self.invoice_number
            .as_deref()
            .map(|inv| !inv.trim().is_empty())
            .unwrap_or(false)
    }

    /// Which tax representation this record carries
    pub fn tax_format(&self) -> TaxProvenance {
        if self.combined_tax.is_some() {
            TaxProvenance::Combined
        } else if self.state_tax.is_some() && self.county_tax.is_some() {
            TaxProvenance::Itemized
        } else {
            TaxProvenance::Missing
        }
    }
}

// ============================================================================
// TAX PROVENANCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxProvenance {
    Combined,
    Itemized,
    Missing,
}

impl TaxProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxProvenance::Combined => "combined",
            TaxProvenance::Itemized => "itemized",
            TaxProvenance::Missing => "missing",
        }
    }
}

// ============================================================================
// CANONICAL ORDER (one per order_id after dedup + normalization)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub order_id: String,
    pub customer_id: String,
    pub order_timestamp: DateTime<Utc>,
    pub sku_raw: String,
    pub sku: String,
    pub qty: u32,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tax_source: TaxProvenance,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub grand_total: Decimal,
    pub status: String,
    pub status_code: u16,
    pub status_label: String,
    pub eligible: bool,
    pub payment_method: String,
    pub invoice_number: Option<String>,
    pub incentive_program: String,
    pub incentive_rate: Decimal,
    pub incentive_amount: Decimal,
}

impl CanonicalOrder {
    /// subtotal + tax + shipping - discount
    pub fn computed_total(&self) -> Decimal {
        round_money(self.subtotal + self.tax + self.shipping - self.discount)
    }

    /// Recorded grand total minus the recomputed one
    pub fn total_discrepancy(&self) -> Decimal {
        self.grand_total - self.computed_total()
    }

    pub fn order_timestamp_iso(&self) -> String {
        self.order_timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

// ============================================================================
// CUSTOMER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Region code (US state)
    pub state: String,
    pub created_at: NaiveDate,
    pub loyalty_tier: String,
}

impl Customer {
    /// Blank and "None" tiers collapse to the sentinel
    pub fn normalize_tier(tier: Option<&str>) -> String {
        match tier.map(str::trim) {
            None => NO_LOYALTY_TIER.to_string(),
            Some(t) if t.is_empty() || t.eq_ignore_ascii_case("none") => {
                NO_LOYALTY_TIER.to_string()
            }
            Some(t) => t.to_lowercase(),
        }
    }
}

// ============================================================================
// SETTLEMENT TRANSACTION (payment processor ledger)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Settled,
    Voided,
    Refunded,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Settled => "settled",
            SettlementStatus::Voided => "voided",
            SettlementStatus::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "settled" => Some(SettlementStatus::Settled),
            "voided" => Some(SettlementStatus::Voided),
            "refunded" => Some(SettlementStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementTransaction {
    pub transaction_id: String,
    /// May reference an order that does not exist (orphan)
    pub order_id: String,
    pub settle_date: NaiveDate,
    pub gross_amount: Decimal,
    pub processor_fee: Decimal,
    /// Trusted as reported by the processor, never recomputed
    pub net_amount: Decimal,
    pub status: SettlementStatus,
    pub auth_code: String,
}

impl SettlementTransaction {
    pub fn is_settled(&self) -> bool {
        self.status == SettlementStatus::Settled
    }
}

// ============================================================================
// SETTLEMENT RECORD (final joined output row)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub order_id: String,
    pub invoice_number: Option<String>,
    pub order_timestamp: DateTime<Utc>,
    pub settlement_date: NaiveDate,
    pub customer_id: String,
    // Customer enrichment is a left join: absent customers leave these empty
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub state: Option<String>,
    pub sku: String,
    pub incentive_program: String,
    pub qty: u32,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tax_source: TaxProvenance,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub grand_total: Decimal,
    pub incentive_rate: Decimal,
    pub incentive_amount: Decimal,
    pub processing_fee: Decimal,
    pub net_settled_amount: Decimal,
    pub status_code: u16,
    pub status_label: String,
    pub transaction_id: String,
}

// ============================================================================
// RAW DATASET (what ingestion hands the core)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    pub orders: Vec<RawOrder>,
    pub customers: Vec<Customer>,
    pub settlements: Vec<SettlementTransaction>,
}
