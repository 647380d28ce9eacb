use super::common::{debt, rule};
use crate::scheduler::domain::{AnchorField, ApprovalStatus, DebtStatus};
use crate::scheduler::eligibility::{assess, Eligibility, IneligibleReason};

#[test]
fn collectable_statuses_pass_the_gate() {
    let rule = rule("r-1", AnchorField::DueDate);
    for status in [DebtStatus::Open, DebtStatus::Overdue, DebtStatus::InCollection] {
        let mut debt = debt("d-1");
        debt.status = status;
        assert_eq!(assess(&debt, &[&rule]), Eligibility::Eligible);
    }
}

#[test]
fn settled_debt_is_ineligible() {
    let rule = rule("r-1", AnchorField::DueDate);
    let mut debt = debt("d-1");
    debt.status = DebtStatus::Paid;
    assert_eq!(
        assess(&debt, &[&rule]),
        Eligibility::Ineligible(IneligibleReason::LifecycleStatus(DebtStatus::Paid))
    );
}

#[test]
fn no_candidate_rules_means_no_active_rule() {
    let debt = debt("d-1");
    assert_eq!(
        assess(&debt, &[]),
        Eligibility::Ineligible(IneligibleReason::NoActiveRule)
    );
}

#[test]
fn inactive_rules_do_not_count_as_coverage() {
    let mut inactive = rule("r-1", AnchorField::DueDate);
    inactive.is_active = false;
    let debt = debt("d-1");
    assert_eq!(
        assess(&debt, &[&inactive]),
        Eligibility::Ineligible(IneligibleReason::NoActiveRule)
    );
}

#[test]
fn approval_status_must_match_some_rule() {
    let rule = rule("r-1", AnchorField::DueDate);
    let mut debt = debt("d-1");
    debt.approval_status = ApprovalStatus("REJEITA".to_string());
    assert_eq!(
        assess(&debt, &[&rule]),
        Eligibility::Ineligible(IneligibleReason::ApprovalStatusMismatch)
    );
}

#[test]
fn unrestricted_rule_accepts_any_approval_status() {
    let mut open_rule = rule("r-1", AnchorField::DueDate);
    open_rule.requires_approval_status.clear();
    let mut debt = debt("d-1");
    debt.approval_status = ApprovalStatus("REJEITA".to_string());
    assert_eq!(assess(&debt, &[&open_rule]), Eligibility::Eligible);
}
