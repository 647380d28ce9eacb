use super::domain::CadenceStep;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;

/// Whole days elapsed between the anchor and the company-local clock.
/// Negative before the anchor day.
pub fn elapsed_days(anchor: NaiveDate, now_local: NaiveDateTime) -> i64 {
    (now_local.date() - anchor).num_days()
}

/// Determine which steps are due at `now_local`, given the anchor date
/// and the step orders already fired for this (debt, rule) pair.
///
/// This implements the backfill policy: a step is due once
/// `elapsed_days >= days_after_due`, so a pass missed during an outage
/// does not silently lose steps. The time-of-day gate only applies on the
/// step's exact day; catch-ups from earlier days fire regardless of the
/// configured execution time. Backfill never reaches behind progress
/// already made: once a higher-order step has fired, earlier unfired
/// steps stay retired. Disabled steps are skipped outright and never
/// block their successors.
pub fn due_steps<'a>(
    anchor: NaiveDate,
    now_local: NaiveDateTime,
    ordered_steps: &[&'a CadenceStep],
    fired_orders: &BTreeSet<u32>,
) -> Vec<&'a CadenceStep> {
    let elapsed = elapsed_days(anchor, now_local);
    if elapsed < 0 {
        return Vec::new();
    }

    let highest_fired = fired_orders.iter().next_back().copied();

    ordered_steps
        .iter()
        .filter(|step| step.is_enabled)
        .filter(|step| !fired_orders.contains(&step.step_order))
        .filter(|step| match highest_fired {
            Some(order) => step.step_order > order,
            None => true,
        })
        .filter(|step| {
            let day = i64::from(step.days_after_due);
            if elapsed > day {
                true
            } else {
                elapsed == day && now_local.time() >= step.execution_time
            }
        })
        .copied()
        .collect()
}
