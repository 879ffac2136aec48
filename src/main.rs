mod alerts;
mod config;
mod export;
mod models;
mod pipeline;
mod scraper;
mod selection;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::{Pipeline, RunOptions, RunReport};
use crate::scraper::ExtractError;
use crate::storage::Repository;
use crate::utils::{fmt_number, fmt_price, fmt_term};

/// Exit status when the page parsed but nothing qualified.
const EXIT_NO_QUALIFYING: i32 = 2;
/// Exit status when the page had no offers table.
const EXIT_NO_TABLE: i32 = 3;

#[derive(Parser)]
#[command(
    name = "rate-watch",
    about = "Find the lowest qualifying (fixed, no ETF, no monthly fee) electric rate and raise alerts",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the comparison page, store a snapshot and evaluate alerts
    Run {
        /// Results URL to scrape
        #[arg(long)]
        url: Option<String>,

        /// Skip TLS certificate verification
        #[arg(long)]
        insecure: bool,

        /// Also print the top N qualifying offers
        #[arg(long)]
        top: Option<usize>,

        /// Print JSON for the best offer
        #[arg(long)]
        json: bool,

        /// CSV to append the best snapshot to
        #[arg(long, conflicts_with = "no_csv")]
        csv: Option<PathBuf>,

        /// Disable CSV output (DB only)
        #[arg(long)]
        no_csv: bool,

        /// Alert if the best price for any term falls below this $/kWh value
        #[arg(long)]
        alert_below: Option<f64>,

        /// Recipient for --alert-below
        #[arg(long)]
        notify_to: Option<String>,
    },

    /// Manage stored alert rules
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },

    /// Show triggered alerts, newest first
    History {
        #[arg(long)]
        alert_id: Option<i64>,

        #[arg(long, default_value_t = 200)]
        limit: usize,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations
    Migrate,
}

#[derive(Subcommand)]
enum AlertAction {
    /// Create a rule
    Add {
        #[arg(long)]
        name: String,

        /// Trip when a term winner is priced below this $/kWh value
        #[arg(long)]
        threshold: f64,

        #[arg(long)]
        email: String,

        /// Contract length filter: "12", "12-24", "12+", ">=6", "<= 24", ...
        #[arg(long)]
        term: Option<String>,

        /// Store the rule switched off
        #[arg(long)]
        inactive: bool,
    },

    /// List every rule
    List,

    /// Switch a rule on or off
    Toggle { id: i64 },

    /// Delete a rule and its history
    Delete { id: i64 },
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)?;
    repo.run_migrations()?;
    Ok(repo)
}

fn is_missing_table(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<ExtractError>(), Some(ExtractError::NoOffersTableFound))
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    let Some(best) = &report.selection.overall else { return Ok(()) };
    let ts = report.snapshot_ts.format("%Y-%m-%d %H:%M:%S");

    println!(
        "[{}] Lowest qualifying rate: {}/kWh - {} | {} | term {}",
        ts,
        fmt_price(best.price_per_kwh),
        best.supplier,
        best.rate_type,
        fmt_term(best.term_months)
    );

    for (i, o) in report.top.iter().enumerate() {
        println!(
            "  {}. {}/kWh - {} | {} | {} | ETF: {} | Monthly: {}",
            i + 1,
            fmt_price(o.price_per_kwh),
            o.supplier,
            o.rate_type,
            fmt_term(o.term_months),
            o.early_termination_fee.raw,
            o.monthly_fee.raw
        );
    }

    if !report.selection.per_term.is_empty() {
        println!("  Best per term:");
        for (term, o) in &report.selection.per_term {
            println!("    {:>3} mo: {}/kWh - {}", term, fmt_price(o.price_per_kwh), o.supplier);
        }
    }

    for m in &report.matches {
        println!("ALERT [{}]: {}", m.rule_name, m.message);
    }
    for s in &report.skipped_rules {
        eprintln!("Warning: alert #{} '{}' skipped: {}", s.rule_id, s.name, s.reason);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(best)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "rate_watch=info,warn",
        1 => "rate_watch=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Run { url, insecure, top, json, csv, no_csv, alert_below, notify_to } => {
            let _t = utils::Timer::start("Rate check");

            if let Some(url) = url {
                config.scraper.url = url;
            }
            config.scraper.insecure |= insecure;

            let mut opts = RunOptions::from_config(&config);
            if let Some(top) = top {
                opts.top = top;
            }
            if no_csv {
                opts.csv_path = None;
            } else if let Some(csv) = csv {
                opts.csv_path = Some(csv);
            }
            opts.alert_below = alert_below.or(opts.alert_below);
            opts.notify_to = notify_to.or(opts.notify_to);

            let report = match Pipeline::new(config).run(&opts).await {
                Ok(report) => report,
                Err(e) if is_missing_table(&e) => {
                    error!("{:#}", e);
                    std::process::exit(EXIT_NO_TABLE);
                }
                Err(e) => return Err(e),
            };

            if report.selection.overall.is_none() {
                println!("No qualifying offers found (fixed rate with $0 monthly fee and $0 ETF).");
                std::process::exit(EXIT_NO_QUALIFYING);
            }

            print_report(&report, json)?;
            info!(
                "Done: {} offers, {} qualifying, {} alerts, {} notifications sent, {} logged only, {} errors",
                report.offers_found,
                report.qualifying,
                report.matches.len(),
                report.notifications_sent,
                report.notifications_logged,
                report.errors
            );
        }

        Command::Alerts { action } => {
            let repo = open_repo(&config)?;
            match action {
                AlertAction::Add { name, threshold, email, term, inactive } => {
                    let id = repo.create_alert(&name, threshold, term.as_deref(), &email, !inactive)?;
                    println!("Alert #{} created.", id);
                }
                AlertAction::List => {
                    let alerts = repo.list_alerts()?;
                    if alerts.is_empty() {
                        println!("No alerts — add one with `rate-watch alerts add`.");
                    }
                    for a in &alerts {
                        println!(
                            "  #{:<4} {:<24} below {} | term {:<10} | {} | {}",
                            a.id,
                            a.name,
                            fmt_price(a.price_threshold),
                            a.term_qualifier.as_deref().unwrap_or("any"),
                            a.recipient,
                            if a.active { "active" } else { "paused" }
                        );
                    }
                }
                AlertAction::Toggle { id } => match repo.toggle_alert(id)? {
                    Some(true) => println!("Alert #{} activated.", id),
                    Some(false) => println!("Alert #{} paused.", id),
                    None => println!("Alert #{} not found.", id),
                },
                AlertAction::Delete { id } => {
                    if repo.delete_alert(id)? {
                        println!("Alert #{} deleted.", id);
                    } else {
                        println!("Alert #{} not found.", id);
                    }
                }
            }
        }

        Command::History { alert_id, limit } => {
            let repo = open_repo(&config)?;
            let rows = repo.alert_history(alert_id, limit)?;
            if rows.is_empty() {
                println!("No alert history.");
            }
            for h in &rows {
                println!(
                    "  {} | #{} {} → {} | {}/kWh | {} | {}",
                    h.triggered_at.format("%Y-%m-%d %H:%M:%S"),
                    h.alert_id,
                    h.alert_name,
                    h.recipient,
                    fmt_price(h.price),
                    fmt_term(h.term_months),
                    h.supplier.as_deref().unwrap_or("—")
                );
            }
        }

        Command::Stats => {
            let repo = open_repo(&config)?;
            let (min, max) = repo.snapshot_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Rate Watch — Database Stats");
            println!("─────────────────────────────────");
            println!("  Runs          : {}", fmt_number(repo.run_count()?));
            println!("  Offer rows    : {}", fmt_number(repo.offer_count()?));
            println!("  Alerts        : {}", fmt_number(repo.alert_count()?));
            println!("  Alert history : {}", fmt_number(repo.history_count()?));
            println!("  From          : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To            : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_a_missing_table_maps_to_its_exit_code() {
        let missing = anyhow::Error::new(ExtractError::NoOffersTableFound).context("extract");
        assert!(is_missing_table(&missing));

        let selector = anyhow::Error::new(ExtractError::Selector("tbody tr"));
        assert!(!is_missing_table(&selector));

        let other = anyhow::anyhow!("HTTP error 503").context("fetch");
        assert!(!is_missing_table(&other));
    }
}
