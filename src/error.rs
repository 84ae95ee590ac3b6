// ⚠️ Normalization Errors - Fatal per-record parse failures
// Soft data-quality defects are never errors; they become Issues (see data_quality.rs)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw field that could not be interpreted at all.
///
/// Carries enough context (order + field + raw text) for the caller to decide
/// whether to abort the run or quarantine the single record.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NormalizeError {
    #[error("malformed currency in {field} for order {order_id}: '{raw}'")]
    MalformedCurrency {
        order_id: String,
        field: String,
        raw: String,
    },

    #[error("malformed date in {field} for order {order_id}: '{raw}' (expected MM/DD/YYYY HH:MM)")]
    MalformedDate {
        order_id: String,
        field: String,
        raw: String,
    },
}

impl NormalizeError {
    pub fn order_id(&self) -> &str {
        match self {
            NormalizeError::MalformedCurrency { order_id, .. } => order_id,
            NormalizeError::MalformedDate { order_id, .. } => order_id,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            NormalizeError::MalformedCurrency { field, .. } => field,
            NormalizeError::MalformedDate { field, .. } => field,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            NormalizeError::MalformedCurrency { raw, .. } => raw,
            NormalizeError::MalformedDate { raw, .. } => raw,
        }
    }

    /// Attach the order id once the caller knows which record failed.
    pub fn for_order(self, id: &str) -> Self {
        match self {
            NormalizeError::MalformedCurrency { field, raw, .. } => {
                NormalizeError::MalformedCurrency {
                    order_id: id.to_string(),
                    field,
                    raw,
                }
            }
            NormalizeError::MalformedDate { field, raw, .. } => NormalizeError::MalformedDate {
                order_id: id.to_string(),
                field,
                raw,
            },
        }
    }
}

/// A record the pipeline set aside because it failed normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub order_id: String,
    pub error: NormalizeError,
}

impl RecordFailure {
    pub fn new(error: NormalizeError) -> Self {
        RecordFailure {
            order_id: error.order_id().to_string(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_order_rewrites_reference() {
        let err = NormalizeError::MalformedCurrency {
            order_id: String::new(),
            field: "subtotal".to_string(),
            raw: "$12.3x".to_string(),
        }
        .for_order("ORD-00007");

        assert_eq!(err.order_id(), "ORD-00007");
        assert_eq!(err.field(), "subtotal");
        assert_eq!(err.raw(), "$12.3x");
    }

    #[test]
    fn test_error_message_names_field_and_value() {
        let err = NormalizeError::MalformedDate {
            order_id: "ORD-00002".to_string(),
            field: "order_date".to_string(),
            raw: "2024-06-01".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("order_date"));
        assert!(msg.contains("ORD-00002"));
        assert!(msg.contains("2024-06-01"));

        let failure = RecordFailure::new(err);
        assert_eq!(failure.order_id, "ORD-00002");
    }
}
