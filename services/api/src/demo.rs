use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::Args;

use crate::infra::{build_orchestrator, demo_sources, load_sources, parse_cli_date};
use cadence::config::AppConfig;
use cadence::error::AppError;
use cadence::scheduler::{ExecutionLedger, ExecutionQuery, TriggerError};
use cadence::telemetry;

#[derive(Args, Debug, Default)]
pub(crate) struct PassArgs {
    /// Directory with companies.csv, rules.csv and debts.csv. Uses the
    /// built-in demo portfolio when omitted.
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
    /// Evaluate as of this date (YYYY-MM-DD) at 12:00 UTC. Defaults to now.
    #[arg(long, value_parser = parse_cli_date)]
    pub(crate) as_of: Option<NaiveDate>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print the full execution ledger after the walkthrough.
    #[arg(long)]
    pub(crate) show_ledger: bool,
}

fn as_instant(date: Option<NaiveDate>) -> DateTime<Utc> {
    match date {
        Some(date) => {
            Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).expect("valid time"))
        }
        None => Utc::now(),
    }
}

/// Run one evaluation pass and print its report.
pub(crate) async fn run_pass(args: PassArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let (rules, debts) = match args.data_dir {
        Some(dir) => load_sources(&dir)?,
        None => demo_sources(),
    };
    let orchestrator = build_orchestrator(&config.scheduler, rules, debts);

    let report = orchestrator
        .run_pass(as_instant(args.as_of))
        .await
        .map_err(TriggerError::Source)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report)
            .map_err(|err| AppError::Startup(err.to_string()))?
    );
    Ok(())
}

/// Walk the demo portfolio through its whole cadence: one pass on the due
/// date, one three days later, one a week in.
pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let (rules, debts) = demo_sources();
    let orchestrator = build_orchestrator(&config.scheduler, rules, debts);

    println!("Collection cadence demo: three debts, three passes\n");
    for (label, day) in [("due date", 1), ("day 3", 4), ("day 7", 8)] {
        let as_of = Utc
            .with_ymd_and_hms(2024, 2, day, 15, 0, 0)
            .single()
            .expect("valid timestamp");
        let report = orchestrator
            .run_pass(as_of)
            .await
            .map_err(TriggerError::Source)?;
        println!(
            "pass on {label}: {} sent, {} failed, {} debts skipped",
            report.steps_sent, report.steps_failed, report.debts_skipped
        );
    }

    if args.show_ledger {
        let records = orchestrator.ledger().query(&ExecutionQuery::default());
        println!("\nexecution ledger:");
        for record in records {
            println!(
                "  {} / {} step {} -> {:?} after {} attempt(s)",
                record.debt_id.0,
                record.rule_id.0,
                record.step_order,
                record.outcome,
                record.attempt_count
            );
        }
    }

    Ok(())
}
