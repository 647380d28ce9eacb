//! Collection cadence scheduling engine.
//!
//! Given a company-defined cadence of dunning steps and a portfolio of
//! overdue debts, the scheduler decides whether, which, and when a step
//! fires, and guarantees each step fires at most once per debt. Rule and
//! debt storage, channel transports, and dashboards live behind trait
//! seams; this crate owns the decision pipeline and the execution ledger.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod telemetry;
