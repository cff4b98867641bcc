//! Periodic ex_member renewal sweep
//!
//! Run from cron or any scheduler; each run charges every subscription that
//! is due and demotes the ones that can no longer pay.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use wallet_roles::notify::TracingEmitter;
use wallet_roles::{TimeStamp, WalletConfig, WalletService, logging};

#[derive(Parser)]
#[command(name = "wallet-renewals")]
#[command(about = "Charge due ex_member subscriptions", long_about = None)]
struct Cli {
    /// sled database directory
    #[arg(short, long, default_value = "wallet.db")]
    db: PathBuf,

    /// TOML file with fees and thresholds, defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.verbose { "debug" } else { "info" });

    let config = match &cli.config {
        Some(path) => WalletConfig::load(path)?,
        None => WalletConfig::default(),
    };

    let db = sled::open(&cli.db)
        .with_context(|| format!("failed to open database {}", cli.db.display()))?;
    let db = Arc::new(db);

    let service = WalletService::open_sled(db.clone(), config, Arc::new(TracingEmitter))?;
    let report = service.roles().run_due_renewals(&TimeStamp::new())?;

    tracing::info!(
        renewed = report.renewed.len(),
        expired = report.expired.len(),
        not_due = report.not_due,
        failed = report.failed.len(),
        "renewal sweep finished"
    );
    db.flush().context("failed to flush database")?;

    if !report.failed.is_empty() {
        anyhow::bail!("{} renewals failed", report.failed.len());
    }
    Ok(())
}
