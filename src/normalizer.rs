// 🧹 Normalizer - RawOrder → CanonicalOrder
// Pure field conversions: currency text, locale dates, SKU spelling,
// tax unification, status codes, incentive lookup.
// Nothing here looks at any other record.

use crate::error::NormalizeError;
use crate::incentives::{incentive_amount, IncentiveTable};
use crate::models::{round_money, CanonicalOrder, RawOrder, TaxProvenance};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Storefront export format: month/day/year, 24-hour clock, no seconds
pub const ORDER_DATE_FORMAT: &str = "%m/%d/%Y %H:%M";

// ============================================================================
// CURRENCY
// ============================================================================

/// Parse "$1,247.50" → 1247.50
///
/// Strips the dollar sign and thousands separators, trims what is left
/// ("$ 12.00" is fine), then requires a plain non-negative decimal. Anything
/// else is `MalformedCurrency`; the value is never coerced to zero. The
/// returned error carries no order id yet.
pub fn parse_currency(field: &str, raw: &str) -> Result<Decimal, NormalizeError> {
    let malformed = || NormalizeError::MalformedCurrency {
        order_id: String::new(),
        field: field.to_string(),
        raw: raw.to_string(),
    };

    let stripped: String = raw.chars().filter(|c| *c != '$' && *c != ',').collect();
    let residual = stripped.trim();

    let digits = residual.chars().filter(|c| c.is_ascii_digit()).count();
    let dots = residual.chars().filter(|c| *c == '.').count();
    let only_numeric = residual.chars().all(|c| c.is_ascii_digit() || c == '.');

    if digits == 0 || dots > 1 || !only_numeric {
        return Err(malformed());
    }

    let value = Decimal::from_str(residual).map_err(|_| malformed())?;
    Ok(round_money(value))
}

// ============================================================================
// DATES
// ============================================================================

/// Parse "06/22/2024 14:05" as a UTC timestamp
pub fn parse_order_date(field: &str, raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    NaiveDateTime::parse_from_str(raw.trim(), ORDER_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| NormalizeError::MalformedDate {
            order_id: String::new(),
            field: field.to_string(),
            raw: raw.to_string(),
        })
}

// ============================================================================
// SKU
// ============================================================================

/// "sku_led_001" → "SKU-LED-001"
pub fn normalize_sku(raw: &str) -> String {
    raw.trim().to_uppercase().replace(['_', ' '], "-")
}

// ============================================================================
// TAX
// ============================================================================

/// Combined wins; otherwise both itemized parts are summed; otherwise missing (0).
pub fn unify_tax(order: &RawOrder) -> (Decimal, TaxProvenance) {
    if let Some(combined) = order.combined_tax {
        return (round_money(combined), TaxProvenance::Combined);
    }

    match (order.state_tax, order.county_tax) {
        (Some(state), Some(county)) => (round_money(state + county), TaxProvenance::Itemized),
        _ => (Decimal::ZERO, TaxProvenance::Missing),
    }
}

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMapping {
    pub code: u16,
    pub label: &'static str,
    /// Qualifies for payment submission
    pub eligible: bool,
}

pub const UNKNOWN_STATUS: StatusMapping = StatusMapping {
    code: 0,
    label: "UNKNOWN",
    eligible: false,
};

/// Storefront status → downstream numeric code
pub fn map_status(raw: &str) -> StatusMapping {
    match raw.trim().to_lowercase().as_str() {
        "complete" => StatusMapping { code: 110, label: "INVOICED", eligible: true },
        "processing" => StatusMapping { code: 100, label: "IN_PROGRESS", eligible: true },
        "closed" => StatusMapping { code: 120, label: "CLOSED", eligible: false },
        "pending" => StatusMapping { code: 50, label: "PENDING", eligible: false },
        "canceled" => StatusMapping { code: 999, label: "VOID", eligible: false },
        _ => UNKNOWN_STATUS,
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct Normalizer {
    incentives: IncentiveTable,
}

impl Normalizer {
    pub fn new(incentives: IncentiveTable) -> Self {
        Normalizer { incentives }
    }

    pub fn incentives(&self) -> &IncentiveTable {
        &self.incentives
    }

    /// Convert one raw order. Fails only on unparseable currency or date.
    pub fn normalize(&self, raw: &RawOrder) -> Result<CanonicalOrder, NormalizeError> {
        let subtotal =
            parse_currency("subtotal", &raw.subtotal).map_err(|e| e.for_order(&raw.order_id))?;
        let order_timestamp = parse_order_date("order_date", &raw.order_date)
            .map_err(|e| e.for_order(&raw.order_id))?;

        let sku = normalize_sku(&raw.sku);
        let (tax, tax_source) = unify_tax(raw);
        let status = map_status(&raw.status);
        let incentive = self.incentives.resolve(&sku);

        Ok(CanonicalOrder {
            order_id: raw.order_id.clone(),
            customer_id: raw.customer_id.clone(),
            order_timestamp,
            sku_raw: raw.sku.clone(),
            sku,
            qty: raw.qty,
            subtotal,
            tax,
            tax_source,
            shipping: round_money(raw.shipping),
            discount: round_money(raw.discount),
            grand_total: round_money(raw.grand_total),
            status: raw.status.clone(),
            status_code: status.code,
            status_label: status.label.to_string(),
            eligible: status.eligible,
            payment_method: raw.payment_method.clone(),
            invoice_number: raw.invoice_number.clone().filter(|inv| !inv.trim().is_empty()),
            incentive_amount: incentive_amount(subtotal, incentive.rate),
            incentive_program: incentive.program,
            incentive_rate: incentive.rate,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
