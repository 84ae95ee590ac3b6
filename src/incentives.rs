// 💡 Incentive Programs - Rules as Data
// Normalized SKU → {program, reimbursement rate}, loaded from JSON so new
// programs ship without a rebuild.

use crate::models::round_money;
use crate::normalizer::normalize_sku;
use anyhow::{anyhow, Context as AnyhowContext, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Program name assigned when a SKU has no entry in the table
pub const UNMAPPED_PROGRAM: &str = "UNMAPPED";

const BUILTIN_TABLE: &str = include_str!("../config/incentive_programs.json");

// ============================================================================
// PROGRAM DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncentiveProgram {
    /// Product code; normalized on load
    pub sku: String,

    /// Program name (e.g. SMART_THERMOSTAT)
    pub program: String,

    /// Share of the subtotal reimbursed (0.0 - 1.0)
    pub rate: Decimal,

    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct IncentiveResolution {
    pub program: String,
    pub rate: Decimal,
    /// false → latent defect, the SKU needs a table entry
    pub mapped: bool,
}

impl IncentiveResolution {
    fn unmapped() -> Self {
        IncentiveResolution {
            program: UNMAPPED_PROGRAM.to_string(),
            rate: Decimal::ZERO,
            mapped: false,
        }
    }
}

// ============================================================================
// INCENTIVE TABLE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct IncentiveTable {
    programs: BTreeMap<String, IncentiveProgram>,
}

impl IncentiveTable {
    /// Create an empty table (every SKU resolves to UNMAPPED)
    pub fn new() -> Self {
        IncentiveTable {
            programs: BTreeMap::new(),
        }
    }

    /// Table shipped with the crate
    pub fn builtin() -> Result<Self> {
        IncentiveTable::from_json(BUILTIN_TABLE).context("Built-in incentive table is invalid")
    }

    /// Load programs from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read incentive table: {:?}", path.as_ref()))?;

        IncentiveTable::from_json(&content)
            .with_context(|| format!("Failed to load incentive table: {:?}", path.as_ref()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let programs: Vec<IncentiveProgram> =
            serde_json::from_str(content).context("Failed to parse incentive table JSON")?;

        IncentiveTable::from_programs(programs)
    }

    /// Build from a list of programs; keys are normalized, conflicting
    /// duplicates and out-of-range rates are rejected
    pub fn from_programs(programs: Vec<IncentiveProgram>) -> Result<Self> {
        let mut table = IncentiveTable::new();
        for program in programs {
            table.add_program(program)?;
        }
        Ok(table)
    }

    pub fn add_program(&mut self, mut program: IncentiveProgram) -> Result<()> {
        if program.rate < Decimal::ZERO || program.rate > Decimal::ONE {
            return Err(anyhow!(
                "Incentive rate for {} must be between 0 and 1, got {}",
                program.sku,
                program.rate
            ));
        }

        program.sku = normalize_sku(&program.sku);

        if let Some(existing) = self.programs.get(&program.sku) {
            if existing.program != program.program || existing.rate != program.rate {
                return Err(anyhow!(
                    "Conflicting incentive entries for {}: {} @ {} vs {} @ {}",
                    program.sku,
                    existing.program,
                    existing.rate,
                    program.program,
                    program.rate
                ));
            }
        }

        self.programs.insert(program.sku.clone(), program);
        Ok(())
    }

    /// Exact match on the normalized SKU
    pub fn resolve(&self, normalized_sku: &str) -> IncentiveResolution {
        match self.programs.get(normalized_sku) {
            Some(p) => IncentiveResolution {
                program: p.program.clone(),
                rate: p.rate,
                mapped: true,
            },
            None => IncentiveResolution::unmapped(),
        }
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn programs(&self) -> impl Iterator<Item = &IncentiveProgram> {
        self.programs.values()
    }
}

/// subtotal × rate, rounded to cents
pub fn incentive_amount(subtotal: Decimal, rate: Decimal) -> Decimal {
    round_money(subtotal * rate)
}

// ============================================================================
// TESTS
// ============================================================================
