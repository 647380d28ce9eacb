use std::collections::BTreeSet;

use super::common::rule;
use crate::scheduler::domain::AnchorField;
use crate::scheduler::due::{due_steps, elapsed_days};
use chrono::{NaiveDate, NaiveDateTime};

fn anchor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date")
}

fn local(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 2, day)
        .expect("valid date")
        .and_hms_opt(hour, minute, 0)
        .expect("valid time")
}

fn orders(steps: &[&crate::scheduler::domain::CadenceStep]) -> Vec<u32> {
    steps.iter().map(|step| step.step_order).collect()
}

#[test]
fn elapsed_is_negative_before_the_anchor() {
    assert_eq!(elapsed_days(anchor(), local(1, 12, 0)), 0);
    let before = NaiveDate::from_ymd_opt(2024, 1, 30)
        .expect("valid date")
        .and_hms_opt(12, 0, 0)
        .expect("valid time");
    assert_eq!(elapsed_days(anchor(), before), -2);
}

#[test]
fn nothing_is_due_before_the_anchor_day() {
    let rule = rule("r-1", AnchorField::DueDate);
    let steps = rule.sorted_steps();
    let before = NaiveDate::from_ymd_opt(2024, 1, 31)
        .expect("valid date")
        .and_hms_opt(23, 59, 0)
        .expect("valid time");
    assert!(due_steps(anchor(), before, &steps, &BTreeSet::new()).is_empty());
}

#[test]
fn execution_time_gates_the_exact_day() {
    let rule = rule("r-1", AnchorField::DueDate);
    let steps = rule.sorted_steps();

    // 08:00 on day zero: step 1 fires at 09:00, so not yet.
    assert!(due_steps(anchor(), local(1, 8, 0), &steps, &BTreeSet::new()).is_empty());
    assert_eq!(
        orders(&due_steps(anchor(), local(1, 9, 0), &steps, &BTreeSet::new())),
        vec![1]
    );
}

#[test]
fn missed_days_are_caught_up_regardless_of_time_of_day() {
    let rule = rule("r-1", AnchorField::DueDate);
    let steps = rule.sorted_steps();

    // Day 3 at 08:00: step 2's own gate has not passed, but step 1 is
    // three days late and fires anyway.
    let due = due_steps(anchor(), local(4, 8, 0), &steps, &BTreeSet::new());
    assert_eq!(orders(&due), vec![1]);

    // Day 8: everything missed comes back in order.
    let due = due_steps(anchor(), local(9, 12, 0), &steps, &BTreeSet::new());
    assert_eq!(orders(&due), vec![1, 2, 3]);
}

#[test]
fn fired_steps_are_not_repeated() {
    let rule = rule("r-1", AnchorField::DueDate);
    let steps = rule.sorted_steps();
    let fired = BTreeSet::from([1]);
    let due = due_steps(anchor(), local(9, 12, 0), &steps, &fired);
    assert_eq!(orders(&due), vec![2, 3]);
}

#[test]
fn backfill_never_reaches_behind_progress() {
    let rule = rule("r-1", AnchorField::DueDate);
    let steps = rule.sorted_steps();
    // Step 2 already fired; step 1 stays retired even though it never ran.
    let fired = BTreeSet::from([2]);
    let due = due_steps(anchor(), local(9, 12, 0), &steps, &fired);
    assert_eq!(orders(&due), vec![3]);
}

#[test]
fn disabled_steps_neither_fire_nor_block() {
    let mut rule = rule("r-1", AnchorField::DueDate);
    rule.steps[1].is_enabled = false;
    let steps = rule.sorted_steps();
    let due = due_steps(anchor(), local(9, 12, 0), &steps, &BTreeSet::new());
    assert_eq!(orders(&due), vec![1, 3]);
}
