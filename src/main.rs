// ledger-audit CLI
//
//   ledger-audit analyze <ledger.csv|ledger.json> [config.json] [--json]
//   ledger-audit config
//
// Logs go to stderr (RUST_LOG controls the level) so --json output on
// stdout stays machine-readable.

use anyhow::{Context, Result};
use ledger_audit::{load_ledger, AnalysisConfig, AnalysisPipeline, AnalysisResult, VERSION};
use std::env;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("analyze") => run_analyze(&args[2..])?,
        Some("config") => run_config()?,
        Some("--version") | Some("version") => println!("ledger-audit {}", VERSION),
        _ => {
            print_usage();
            process::exit(2);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    eprintln!("ledger-audit {}", VERSION);
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  ledger-audit analyze <ledger.csv|ledger.json> [config.json] [--json]");
    eprintln!("  ledger-audit config      Print the default configuration");
}

fn run_config() -> Result<()> {
    let json = serde_json::to_string_pretty(&AnalysisConfig::default())?;
    println!("{}", json);
    Ok(())
}

fn run_analyze(args: &[String]) -> Result<()> {
    let json_output = args.iter().any(|a| a == "--json");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

    let ledger_path = match positional.first() {
        Some(path) => path.as_str(),
        None => {
            print_usage();
            process::exit(2);
        }
    };

    let config = match positional.get(1) {
        Some(path) => AnalysisConfig::from_file(path.as_str())?,
        None => AnalysisConfig::default(),
    };

    let ledger = load_ledger(ledger_path)?;
    let result = AnalysisPipeline::new()
        .run(&ledger, &config)
        .context("Analysis failed")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_report(ledger_path, &result);
    }

    Ok(())
}

fn print_report(source: &str, result: &AnalysisResult) {
    let summary = &result.summary;

    println!("🔎 Ledger Audit - {}", source);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📒 Entries:        {}", summary.total_entries);
    println!("👤 Preparers:      {}", summary.user_count);
    println!("💰 Net balance:    {:.2}", summary.net_balance);
    println!("⚖️  Imbalance:      {:.2}%", summary.imbalance_pct);
    println!("🚩 Flagged:        {}", summary.flagged_entries);
    if let Some(date) = result.reference_date {
        println!("📅 Reference date: {}", date);
    }

    if let Some(benford) = &result.benford {
        println!("\n🔢 {}", benford.summary());
    }
    if let Some(benford) = &result.benford_first_two {
        println!("🔢 {}", benford.summary());
    }

    if !summary.flags_by_detector.is_empty() {
        println!("\n🚩 Flags by detector:");
        for (detector, count) in &summary.flags_by_detector {
            println!("   {:<16} {}", detector, count);
        }
    }

    println!("\n📊 Entries by tier:");
    for (tier, count) in &summary.entries_by_tier {
        println!("   {:<16} {}", tier, count);
    }

    let top: Vec<_> = result
        .top_risks(10)
        .into_iter()
        .filter(|a| a.risk.score > 0.0)
        .collect();
    if !top.is_empty() {
        println!("\n🔥 Highest risk entries:");
        for assessment in top {
            let sources: Vec<&str> = assessment
                .flags
                .iter()
                .map(|f| f.detector.as_str())
                .collect();
            println!(
                "   {:<14} {:>6.2}  {:<9} {}",
                assessment.entry_id,
                assessment.risk.score,
                assessment.risk.tier.as_str(),
                sources.join(", ")
            );
        }
    }

    if !result.warnings.is_empty() {
        println!("\n⚠️  Warnings:");
        for warning in &result.warnings {
            println!("   [{}] {}", warning.source, warning.message);
        }
    }

    println!("\n🔏 Fingerprint: {}", result.ledger_fingerprint);
}
