// 🔍 Deduplication Engine - One record per order_id
// Re-exports overlap, so the same order can appear several times.
// Rule: keep the occurrence with the largest grand_total; on a tie keep the
// first one in input order.

use crate::models::{RawOrder, SettlementTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// DUPLICATE GROUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub order_id: String,

    /// Input positions of every occurrence, ascending
    pub indices: Vec<usize>,

    /// Position of the occurrence that was kept
    pub kept_index: usize,

    pub kept_grand_total: Decimal,

    /// Human-readable reason
    pub reason: String,
}

impl DuplicateGroup {
    pub fn occurrences(&self) -> usize {
        self.indices.len()
    }

    pub fn discarded(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied().filter(move |i| *i != self.kept_index)
    }
}

// ============================================================================
// DEDUPLICATION RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct DeduplicationResult {
    /// One record per order_id, ordered by order_id
    pub kept: Vec<RawOrder>,

    /// Only ids with more than one occurrence
    pub groups: Vec<DuplicateGroup>,

    pub input_count: usize,
}

impl DeduplicationResult {
    pub fn removed_count(&self) -> usize {
        self.input_count - self.kept.len()
    }
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

#[derive(Debug, Default)]
pub struct DeduplicationEngine;

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine
    }

    fn group_indices<'a>(&self, orders: &'a [RawOrder]) -> BTreeMap<&'a str, Vec<usize>> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, order) in orders.iter().enumerate() {
            groups.entry(order.order_id.as_str()).or_default().push(i);
        }
        groups
    }

    /// (order_id, occurrence count) for every id seen more than once
    pub fn duplicate_counts(&self, orders: &[RawOrder]) -> Vec<(String, usize)> {
        self.group_indices(orders)
            .into_iter()
            .filter(|(_, idx)| idx.len() > 1)
            .map(|(id, idx)| (id.to_string(), idx.len()))
            .collect()
    }

    /// Largest grand_total wins; strict `>` keeps the first on ties
    fn pick(&self, orders: &[RawOrder], indices: &[usize]) -> usize {
        let mut best = indices[0];
        for &i in &indices[1..] {
            if orders[i].grand_total > orders[best].grand_total {
                best = i;
            }
        }
        best
    }

    /// Collapse to exactly one record per order_id
    pub fn deduplicate(&self, orders: &[RawOrder]) -> DeduplicationResult {
        let mut kept = Vec::new();
        let mut groups = Vec::new();

        for (order_id, indices) in self.group_indices(orders) {
            let kept_index = self.pick(orders, &indices);
            kept.push(orders[kept_index].clone());

            if indices.len() > 1 {
                let kept_grand_total = orders[kept_index].grand_total;
                groups.push(DuplicateGroup {
                    order_id: order_id.to_string(),
                    reason: format!(
                        "{} occurrences of {}; kept row {} (grand_total {})",
                        indices.len(),
                        order_id,
                        kept_index,
                        kept_grand_total
                    ),
                    indices,
                    kept_index,
                    kept_grand_total,
                });
            }
        }

        DeduplicationResult {
            kept,
            groups,
            input_count: orders.len(),
        }
    }

    // ========================================================================
    // PROCESSOR LEDGER
    // ========================================================================

    /// (transaction_id, occurrence count) for every id the ledger repeats
    pub fn duplicate_transaction_counts(
        &self,
        settlements: &[SettlementTransaction],
    ) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for txn in settlements {
            *counts.entry(txn.transaction_id.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(id, n)| (id.to_string(), n))
            .collect()
    }
}

/// First occurrence of each transaction_id, in input order
pub fn unique_transactions(settlements: &[SettlementTransaction]) -> Vec<&SettlementTransaction> {
    let mut seen = HashSet::new();
    settlements
        .iter()
        .filter(|t| seen.insert(t.transaction_id.as_str()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
