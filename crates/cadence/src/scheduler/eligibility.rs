use super::domain::{CollectionRule, Debt, DebtStatus};
use serde::Serialize;

/// Outcome of the eligibility gate. Pure predicate; runs before any date
/// arithmetic so "why didn't this fire" stays cheap to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Eligibility {
    Eligible,
    Ineligible(IneligibleReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    /// Lifecycle status outside {open, overdue, in_collection}.
    LifecycleStatus(DebtStatus),
    /// No candidate rule accepts the debt's approval status.
    ApprovalStatusMismatch,
    /// The company has no active rule at all.
    NoActiveRule,
}

impl IneligibleReason {
    pub fn summary(&self) -> String {
        match self {
            IneligibleReason::LifecycleStatus(status) => {
                format!("lifecycle status '{}' is not collectable", status.label())
            }
            IneligibleReason::ApprovalStatusMismatch => {
                "no rule accepts the debt's approval status".to_string()
            }
            IneligibleReason::NoActiveRule => "company has no active rule".to_string(),
        }
    }
}

/// Decide whether a debt qualifies for automated processing given the
/// company's candidate rules.
pub fn assess(debt: &Debt, candidates: &[&CollectionRule]) -> Eligibility {
    if !debt.status.collectable() {
        return Eligibility::Ineligible(IneligibleReason::LifecycleStatus(debt.status));
    }

    let active: Vec<&&CollectionRule> = candidates.iter().filter(|rule| rule.is_active).collect();
    if active.is_empty() {
        return Eligibility::Ineligible(IneligibleReason::NoActiveRule);
    }

    if !active
        .iter()
        .any(|rule| rule.matches_approval(&debt.approval_status))
    {
        return Eligibility::Ineligible(IneligibleReason::ApprovalStatusMismatch);
    }

    Eligibility::Eligible
}
