use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use order_reconciliation::{
    db, export_files, export_run, format_money, load_dataset, ExportOutcome, IssueCategory,
    Pipeline, PipelineConfig, PipelineOutput,
};

const USAGE: &str = "\
Usage:
  order-reconciliation run <orders.csv> <customers.csv> <settlements.csv> <out_dir>
                           [--config <pipeline.json>] [--strict] [--run-at <RFC3339>]
  order-reconciliation programs [--config <pipeline.json>]

Logging: RECON_LOG=debug (default: info)";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("run") => run_pipeline(&args[1..]),
        Some("programs") => list_programs(&args[1..]),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

/// Logs go to stderr; stdout carries the run summary
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("RECON_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ============================================================================
// ARGUMENTS
// ============================================================================

struct RunArgs {
    positional: Vec<String>,
    config: Option<PathBuf>,
    strict: bool,
    run_at: Option<DateTime<Utc>>,
}

fn parse_args(args: &[String]) -> Result<RunArgs> {
    let mut parsed = RunArgs {
        positional: Vec::new(),
        config: None,
        strict: false,
        run_at: None,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--strict" => parsed.strict = true,
            "--config" => {
                let path = iter.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--run-at" => {
                let raw = iter.next().ok_or_else(|| anyhow!("--run-at needs a timestamp"))?;
                let ts = DateTime::parse_from_rfc3339(raw)
                    .with_context(|| format!("Invalid --run-at timestamp: {}", raw))?;
                parsed.run_at = Some(ts.with_timezone(&Utc));
            }
            flag if flag.starts_with("--") => return Err(anyhow!("Unknown flag: {}\n\n{}", flag, USAGE)),
            _ => parsed.positional.push(arg.clone()),
        }
    }

    Ok(parsed)
}

/// File config first, CLI flags on top
fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if args.strict {
        config.strict = true;
    }
    Ok(config)
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_pipeline(args: &[String]) -> Result<()> {
    let args = parse_args(args)?;
    let [orders, customers, settlements, out_dir] = args.positional.as_slice() else {
        return Err(anyhow!("run expects 4 paths\n\n{}", USAGE));
    };

    let config = load_config(&args)?;
    let pipeline = Pipeline::from_config(config)?;

    let dataset = load_dataset(Path::new(orders), Path::new(customers), Path::new(settlements))?;
    let run_at = args.run_at.unwrap_or_else(|| Utc::now().trunc_subsecs(0));
    let output = pipeline.run(&dataset, run_at)?;

    // Database before files; a failed insert leaves no partial file set
    let out_dir = Path::new(out_dir);
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;
    let mut conn = db::open_database(&out_dir.join(db::DATABASE_FILE))?;
    let outcome = export_run(&mut conn, &output)?;

    let manifest = export_files(&output, out_dir)?;

    print_summary(&output);

    println!("\n📁 Output files:");
    for path in &manifest.files {
        println!("   {}", path.display());
    }
    match outcome {
        ExportOutcome::Inserted { .. } => {
            println!("   {} (run {})", out_dir.join(db::DATABASE_FILE).display(), short(&output.fingerprint))
        }
        ExportOutcome::AlreadyExported => {
            println!("   {} (run {} already stored)", out_dir.join(db::DATABASE_FILE).display(), short(&output.fingerprint))
        }
    }

    Ok(())
}

fn list_programs(args: &[String]) -> Result<()> {
    let args = parse_args(args)?;
    let table = load_config(&args)?.load_incentives()?;

    println!("💡 {} incentive programs", table.program_count());
    for p in table.programs() {
        println!("   {:<16} {:<22} {}", p.sku, p.program, p.rate);
    }
    Ok(())
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

// ============================================================================
// CONSOLE SUMMARY
// ============================================================================

fn print_summary(output: &PipelineOutput) {
    let line = "━".repeat(60);

    println!("{}", line);
    println!("📊 Order reconciliation run {}", output.run_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("{}", line);

    println!("\n📂 Raw input");
    println!("   Orders:       {}", output.raw_order_count);
    println!("   Customers:    {}", output.raw_customer_count);
    println!("   Settlements:  {}", output.raw_settlement_count);

    let tax = &output.raw_scan.tax_distribution;
    println!("\n🔧 Transformations");
    println!("   Duplicates removed:      {}", output.duplicates_removed);
    println!("   Records quarantined:     {}", output.failures.len());
    println!("   SKUs normalized:         {}", output.sku_changed_count);
    println!(
        "   Tax formats:             {} combined / {} itemized / {} neither",
        tax.combined, tax.itemized, tax.neither
    );
    println!("   Canonical orders:        {} ({} eligible)", output.canonical_orders.len(), output.eligible_count());

    let summary = output.issue_summary();
    println!("\n⚠️  {}", summary.summary());
    for (category, count) in &summary.by_category {
        println!("   {:<24} {}", category.as_str(), count);
    }
    if summary.count(IssueCategory::OrphanTransaction) > 0 {
        println!(
            "   Orphaned settled money:  {}",
            format_money(output.reconciliation.orphan_total())
        );
    }

    let gap = &output.reconciliation.aggregate;
    println!("\n⚖️  Reconciliation");
    println!(
        "   Eligible orders:   {:>5}  {:>14}",
        gap.eligible_order_count,
        format_money(gap.eligible_order_total)
    );
    println!(
        "   Settled:           {:>5}  {:>14}",
        gap.settled_order_count,
        format_money(gap.settled_total)
    );
    println!(
        "   Gap:               {:>5}  {:>14}",
        gap.count_gap,
        format_money(gap.amount_gap)
    );

    let totals = &output.settlement_summary;
    println!("\n💰 Settlement batch ({} records)", totals.record_count);
    println!("   Gross revenue:     {:>14}", format_money(totals.total_gross_revenue));
    println!("   Incentive payable: {:>14}", format_money(totals.total_incentive_payable));
    println!("   Processing fees:   {:>14}", format_money(totals.total_processing_fees));
    println!("   Net to client:     {:>14}", format_money(totals.net_to_client));
}
