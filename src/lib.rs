// Order Reconciliation - Core Library
// Cleans storefront order exports and reconciles them against processor settlements

pub mod config;
pub mod data_quality;
pub mod db;
pub mod deduplication;
pub mod error;
pub mod export;
pub mod incentives;
pub mod ingest;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod reconciliation;
pub mod settlement;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use data_quality::{
    assign_issue_ids, DataQualityEngine, Issue, IssueCategory, IssueSummary, RawScan,
    Severity, SkuVariantGroup, TaxFormatDistribution,
};
pub use db::{export_run, open_database, setup_database, ExportOutcome};
pub use deduplication::{
    unique_transactions, DeduplicationEngine, DeduplicationResult, DuplicateGroup,
};
pub use error::{NormalizeError, RecordFailure};
pub use export::{export_files, ExportManifest, SettlementPayload};
pub use incentives::{IncentiveProgram, IncentiveTable, UNMAPPED_PROGRAM};
pub use ingest::{load_customers, load_dataset, load_orders, load_settlements};
pub use models::{
    format_money, round_money, CanonicalOrder, Customer, RawDataset, RawOrder,
    SettlementRecord, SettlementStatus, SettlementTransaction, TaxProvenance,
};
pub use normalizer::{map_status, normalize_sku, parse_currency, parse_order_date, Normalizer};
pub use pipeline::{Pipeline, PipelineOutput};
pub use reconciliation::{
    AggregateGap, AmountMismatch, MismatchDirection, OrphanSettlement, ReconciliationEngine,
    ReconciliationOutcome, ReconciliationReport, UnsettledOrder,
};
pub use settlement::{
    monthly_summary, program_summary, MonthlySummary, ProgramSummary, SettlementBuilder,
    SettlementSummary,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
