use crate::export::status_code_text;
use crate::pipeline::PipelineOutput;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

pub const DATABASE_FILE: &str = "reconciliation.db";

/// What one `export_run` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Inserted {
        issues: usize,
        orders: usize,
        settlement_records: usize,
    },
    /// A run with the same fingerprint is already stored
    AlreadyExported,
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Run metadata (one row per distinct run fingerprint)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS run_metadata (
            fingerprint TEXT PRIMARY KEY,
            run_at TEXT NOT NULL,
            raw_orders INTEGER NOT NULL,
            raw_customers INTEGER NOT NULL,
            raw_settlements INTEGER NOT NULL,
            canonical_orders INTEGER NOT NULL,
            quarantined INTEGER NOT NULL,
            duplicates_removed INTEGER NOT NULL,
            issue_count INTEGER NOT NULL,
            settlement_records INTEGER NOT NULL,
            total_gross_revenue TEXT NOT NULL,
            net_to_client TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Issues log (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS issues_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_fingerprint TEXT NOT NULL REFERENCES run_metadata(fingerprint),
            issue_id TEXT NOT NULL,
            category TEXT NOT NULL,
            severity TEXT NOT NULL,
            order_id TEXT,
            transaction_id TEXT,
            detail TEXT NOT NULL,
            action TEXT NOT NULL,
            detected_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Cleaned orders / settlement batch (money stored as exact decimal text)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS orders_clean (
            run_fingerprint TEXT NOT NULL REFERENCES run_metadata(fingerprint),
            order_id TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            order_timestamp TEXT NOT NULL,
            sku_raw TEXT NOT NULL,
            sku TEXT NOT NULL,
            qty INTEGER NOT NULL,
            subtotal TEXT NOT NULL,
            tax TEXT NOT NULL,
            tax_source TEXT NOT NULL,
            shipping TEXT NOT NULL,
            discount TEXT NOT NULL,
            grand_total TEXT NOT NULL,
            status TEXT NOT NULL,
            status_code TEXT NOT NULL,
            status_label TEXT NOT NULL,
            eligible INTEGER NOT NULL,
            payment_method TEXT NOT NULL,
            invoice_number TEXT,
            incentive_program TEXT NOT NULL,
            incentive_rate TEXT NOT NULL,
            incentive_amount TEXT NOT NULL,
            PRIMARY KEY (run_fingerprint, order_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settlement_ready (
            run_fingerprint TEXT NOT NULL REFERENCES run_metadata(fingerprint),
            order_id TEXT NOT NULL,
            transaction_id TEXT NOT NULL,
            invoice_number TEXT,
            order_timestamp TEXT NOT NULL,
            settlement_date TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            first_name TEXT,
            last_name TEXT,
            email TEXT,
            state TEXT,
            sku TEXT NOT NULL,
            incentive_program TEXT NOT NULL,
            qty INTEGER NOT NULL,
            subtotal TEXT NOT NULL,
            tax TEXT NOT NULL,
            tax_source TEXT NOT NULL,
            shipping TEXT NOT NULL,
            discount TEXT NOT NULL,
            grand_total TEXT NOT NULL,
            incentive_rate TEXT NOT NULL,
            incentive_amount TEXT NOT NULL,
            processing_fee TEXT NOT NULL,
            net_settled_amount TEXT NOT NULL,
            status_code TEXT NOT NULL,
            status_label TEXT NOT NULL,
            PRIMARY KEY (run_fingerprint, order_id, transaction_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_issues_category ON issues_log(run_fingerprint, category)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_issues_order ON issues_log(order_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_settlement_date ON settlement_ready(settlement_date)",
        [],
    )?;

    Ok(())
}

pub fn run_exists(conn: &Connection, fingerprint: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT fingerprint FROM run_metadata WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Store one pipeline run. Re-exporting an identical run is a no-op.
pub fn export_run(conn: &mut Connection, output: &PipelineOutput) -> Result<ExportOutcome> {
    if run_exists(conn, &output.fingerprint)? {
        info!(fingerprint = %output.fingerprint, "Run already exported, skipping");
        return Ok(ExportOutcome::AlreadyExported);
    }

    let tx = conn.transaction().context("Failed to begin export transaction")?;

    tx.execute(
        "INSERT INTO run_metadata (
            fingerprint, run_at, raw_orders, raw_customers, raw_settlements,
            canonical_orders, quarantined, duplicates_removed, issue_count,
            settlement_records, total_gross_revenue, net_to_client
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            output.fingerprint,
            output.run_at.to_rfc3339(),
            output.raw_order_count as i64,
            output.raw_customer_count as i64,
            output.raw_settlement_count as i64,
            output.canonical_orders.len() as i64,
            output.failures.len() as i64,
            output.duplicates_removed as i64,
            output.issues.len() as i64,
            output.settlement_records.len() as i64,
            output.settlement_summary.total_gross_revenue.to_string(),
            output.settlement_summary.net_to_client.to_string(),
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO issues_log (
                run_fingerprint, issue_id, category, severity, order_id,
                transaction_id, detail, action, detected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for issue in &output.issues {
            stmt.execute(params![
                output.fingerprint,
                issue.issue_id,
                issue.category.as_str(),
                issue.severity.as_str(),
                issue.order_id,
                issue.transaction_id,
                issue.detail,
                issue.action,
                issue.detected_at.to_rfc3339(),
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO orders_clean (
                run_fingerprint, order_id, customer_id, order_timestamp, sku_raw, sku,
                qty, subtotal, tax, tax_source, shipping, discount, grand_total,
                status, status_code, status_label, eligible, payment_method,
                invoice_number, incentive_program, incentive_rate, incentive_amount
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        )?;
        for o in &output.canonical_orders {
            stmt.execute(params![
                output.fingerprint,
                o.order_id,
                o.customer_id,
                o.order_timestamp_iso(),
                o.sku_raw,
                o.sku,
                o.qty,
                o.subtotal.to_string(),
                o.tax.to_string(),
                o.tax_source.as_str(),
                o.shipping.to_string(),
                o.discount.to_string(),
                o.grand_total.to_string(),
                o.status,
                status_code_text(o.status_code),
                o.status_label,
                o.eligible,
                o.payment_method,
                o.invoice_number,
                o.incentive_program,
                o.incentive_rate.to_string(),
                o.incentive_amount.to_string(),
            ])
            .with_context(|| format!("Failed to insert order {}", o.order_id))?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO settlement_ready (
                run_fingerprint, order_id, transaction_id, invoice_number, order_timestamp,
                settlement_date, customer_id, first_name, last_name, email, state, sku,
                incentive_program, qty, subtotal, tax, tax_source, shipping, discount,
                grand_total, incentive_rate, incentive_amount, processing_fee,
                net_settled_amount, status_code, status_label
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
        )?;
        for r in &output.settlement_records {
            stmt.execute(params![
                output.fingerprint,
                r.order_id,
                r.transaction_id,
                r.invoice_number,
                r.order_timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                r.settlement_date.format("%Y-%m-%d").to_string(),
                r.customer_id,
                r.first_name,
                r.last_name,
                r.email,
                r.state,
                r.sku,
                r.incentive_program,
                r.qty,
                r.subtotal.to_string(),
                r.tax.to_string(),
                r.tax_source.as_str(),
                r.shipping.to_string(),
                r.discount.to_string(),
                r.grand_total.to_string(),
                r.incentive_rate.to_string(),
                r.incentive_amount.to_string(),
                r.processing_fee.to_string(),
                r.net_settled_amount.to_string(),
                status_code_text(r.status_code),
                r.status_label,
            ])
            .with_context(|| {
                format!("Failed to insert settlement {} / {}", r.order_id, r.transaction_id)
            })?;
        }
    }

    tx.commit().context("Failed to commit export transaction")?;

    info!(
        fingerprint = %output.fingerprint,
        issues = output.issues.len(),
        orders = output.canonical_orders.len(),
        settlement_records = output.settlement_records.len(),
        "Exported run to database"
    );

    Ok(ExportOutcome::Inserted {
        issues: output.issues.len(),
        orders: output.canonical_orders.len(),
        settlement_records: output.settlement_records.len(),
    })
}

/// (category, count) for one run, largest first
pub fn get_issue_counts(conn: &Connection, fingerprint: &str) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) AS n
         FROM issues_log
         WHERE run_fingerprint = ?1
         GROUP BY category
         ORDER BY n DESC, category ASC",
    )?;

    let counts = stmt
        .query_map(params![fingerprint], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(counts)
}

pub fn verify_count(conn: &Connection, table: &str, fingerprint: &str) -> Result<i64> {
    // Table names cannot be bound as parameters
    let sql = match table {
        "issues_log" => "SELECT COUNT(*) FROM issues_log WHERE run_fingerprint = ?1",
        "orders_clean" => "SELECT COUNT(*) FROM orders_clean WHERE run_fingerprint = ?1",
        "settlement_ready" => "SELECT COUNT(*) FROM settlement_ready WHERE run_fingerprint = ?1",
        other => anyhow::bail!("Unknown export table: {}", other),
    };
    let count: i64 = conn.query_row(sql, params![fingerprint], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::{RawDataset, RawOrder, SettlementStatus, SettlementTransaction};
    use crate::pipeline::Pipeline;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn money(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Helper: raw order with everything consistent except the invoice
    fn create_test_order(id: &str, grand_total: &str) -> RawOrder {
        RawOrder {
            order_id: id.to_string(),
            customer_id: "CUST-0001".to_string(),
            order_date: "06/22/2024 12:00".to_string(),
            sku: "SKU-THERM-002".to_string(),
            qty: 1,
            subtotal: format!("${}", grand_total),
            state_tax: None,
            county_tax: None,
            combined_tax: Some(Decimal::ZERO),
            shipping: Decimal::ZERO,
            discount: Decimal::ZERO,
            grand_total: money(grand_total),
            status: "processing".to_string(),
            payment_method: "authorizenet".to_string(),
            invoice_number: None,
        }
    }

    fn create_test_output() -> PipelineOutput {
        let dataset = RawDataset {
            orders: vec![
                create_test_order("ORD-00001", "100.00"),
                create_test_order("ORD-00002", "40.00"),
            ],
            customers: vec![],
            settlements: vec![SettlementTransaction {
                transaction_id: "TXN-1".to_string(),
                order_id: "ORD-00001".to_string(),
                settle_date: NaiveDate::from_ymd_opt(2024, 6, 24).unwrap(),
                gross_amount: money("100.00"),
                processor_fee: money("3.20"),
                net_amount: money("96.80"),
                status: SettlementStatus::Settled,
                auth_code: "AUTH1".to_string(),
            }],
        };

        Pipeline::from_config(PipelineConfig::default())
            .unwrap()
            .run(&dataset, Utc.with_ymd_and_hms(2024, 9, 30, 8, 0, 0).unwrap())
            .unwrap()
    }

    #[test]
    fn test_export_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let output = create_test_output();

        let outcome = export_run(&mut conn, &output).unwrap();

        assert_eq!(
            outcome,
            ExportOutcome::Inserted {
                issues: output.issues.len(),
                orders: 2,
                settlement_records: 1,
            }
        );
        assert_eq!(verify_count(&conn, "orders_clean", &output.fingerprint).unwrap(), 2);
        assert_eq!(verify_count(&conn, "settlement_ready", &output.fingerprint).unwrap(), 1);
        assert_eq!(
            verify_count(&conn, "issues_log", &output.fingerprint).unwrap(),
            output.issues.len() as i64
        );

        let net: String = conn
            .query_row(
                "SELECT net_settled_amount FROM settlement_ready WHERE order_id = 'ORD-00001'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(net, "96.80");
    }

    #[test]
    fn test_export_twice_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let output = create_test_output();

        export_run(&mut conn, &output).unwrap();
        let second = export_run(&mut conn, &output).unwrap();

        assert_eq!(second, ExportOutcome::AlreadyExported);
        assert_eq!(verify_count(&conn, "orders_clean", &output.fingerprint).unwrap(), 2);
    }

    #[test]
    fn test_issue_counts_by_category() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let output = create_test_output();
        export_run(&mut conn, &output).unwrap();

        let counts = get_issue_counts(&conn, &output.fingerprint).unwrap();

        assert!(counts.contains(&("MISSING_INVOICE".to_string(), 2)));
        assert!(counts.contains(&("UNSETTLED_ORDER".to_string(), 1)));
    }

    #[test]
    fn test_unknown_table_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        assert!(verify_count(&conn, "sqlite_master", "x").is_err());
    }

    #[test]
    fn test_open_database_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_database(&dir.path().join(DATABASE_FILE)).unwrap();
        assert!(!run_exists(&conn, "missing").unwrap());
    }

    #[test]
    fn test_repeated_ledger_row_exports_once() {
        let txn = SettlementTransaction {
            transaction_id: "TXN-1".to_string(),
            order_id: "ORD-00001".to_string(),
            settle_date: NaiveDate::from_ymd_opt(2024, 6, 24).unwrap(),
            gross_amount: money("100.00"),
            processor_fee: money("3.20"),
            net_amount: money("96.80"),
            status: SettlementStatus::Settled,
            auth_code: "AUTH1".to_string(),
        };
        let dataset = RawDataset {
            orders: vec![create_test_order("ORD-00001", "100.00")],
            customers: vec![],
            settlements: vec![txn.clone(), txn],
        };
        let output = Pipeline::from_config(PipelineConfig::default())
            .unwrap()
            .run(&dataset, Utc.with_ymd_and_hms(2024, 9, 30, 8, 0, 0).unwrap())
            .unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let outcome = export_run(&mut conn, &output).unwrap();

        assert!(matches!(outcome, ExportOutcome::Inserted { settlement_records: 1, .. }));
        let counts = get_issue_counts(&conn, &output.fingerprint).unwrap();
        assert!(counts.contains(&("DUPLICATE_TRANSACTION".to_string(), 1)));
    }
}
