// ⚙️ Pipeline Configuration - Tolerances and table locations as data
// Every field has a default, so an empty `{}` file is a valid config.

use crate::data_quality::DEFAULT_GRAND_TOTAL_TOLERANCE;
use crate::incentives::IncentiveTable;
use crate::reconciliation::DEFAULT_AMOUNT_TOLERANCE;
use anyhow::{anyhow, Context as AnyhowContext, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Allowed |grand_total - recomputed total|
    pub grand_total_tolerance: Decimal,

    /// Allowed |order total - processor gross|
    pub amount_tolerance: Decimal,

    /// Incentive program table; the built-in table when unset
    pub incentive_table: Option<PathBuf>,

    /// Abort on the first malformed record instead of quarantining it
    pub strict: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            grand_total_tolerance: DEFAULT_GRAND_TOTAL_TOLERANCE,
            amount_tolerance: DEFAULT_AMOUNT_TOLERANCE,
            incentive_table: None,
            strict: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {:?}", path.as_ref()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grand_total_tolerance < Decimal::ZERO {
            return Err(anyhow!(
                "grand_total_tolerance must not be negative, got {}",
                self.grand_total_tolerance
            ));
        }
        if self.amount_tolerance < Decimal::ZERO {
            return Err(anyhow!(
                "amount_tolerance must not be negative, got {}",
                self.amount_tolerance
            ));
        }
        Ok(())
    }

    /// Load the configured table, or the built-in one
    pub fn load_incentives(&self) -> Result<IncentiveTable> {
        match &self.incentive_table {
            Some(path) => IncentiveTable::from_file(path),
            None => IncentiveTable::builtin(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
