use super::domain::{AnchorField, CollectionRule, Debt};
use chrono::NaiveDate;

/// Map the rule's configured anchor field to a concrete calendar date on
/// the debt. `None` means the debt is not yet anchor-able and is skipped
/// until the field becomes available.
pub fn resolve_anchor(rule: &CollectionRule, debt: &Debt) -> Option<NaiveDate> {
    match rule.start_date_field {
        AnchorField::DueDate => Some(debt.due_date),
        AnchorField::FirstOverdue => debt.first_overdue_date,
        AnchorField::AnalysisDate => debt.analysis_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::common::{debt, rule};
    use crate::scheduler::AnchorField;
    use chrono::NaiveDate;

    #[test]
    fn due_date_anchor_always_resolves() {
        let rule = rule("r-1", AnchorField::DueDate);
        let debt = debt("d-1");
        assert_eq!(resolve_anchor(&rule, &debt), Some(debt.due_date));
    }

    #[test]
    fn first_overdue_anchor_requires_the_field() {
        let rule = rule("r-1", AnchorField::FirstOverdue);
        let mut debt = debt("d-1");
        debt.first_overdue_date = None;
        assert_eq!(resolve_anchor(&rule, &debt), None);

        debt.first_overdue_date = NaiveDate::from_ymd_opt(2024, 1, 10);
        assert_eq!(
            resolve_anchor(&rule, &debt),
            NaiveDate::from_ymd_opt(2024, 1, 10)
        );
    }

    #[test]
    fn analysis_date_anchor_requires_the_field() {
        let rule = rule("r-1", AnchorField::AnalysisDate);
        let mut debt = debt("d-1");
        debt.analysis_date = None;
        assert_eq!(resolve_anchor(&rule, &debt), None);
    }
}
