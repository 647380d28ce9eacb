use super::domain::{CollectionRule, Debt, RuleId};

/// The rule chosen for a (company, debt) pair, plus any ambiguity the
/// orchestrator should surface as a warning event.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub rule: &'a CollectionRule,
    pub ambiguity: Option<AmbiguousDefault>,
}

/// Raised when more than one rule could apply and the tie had to be
/// broken deterministically. The data model does not enforce a unique
/// default per company, so this is an anomaly to report, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousDefault {
    pub chosen: RuleId,
    pub contenders: Vec<RuleId>,
}

/// Pick the single effective rule for a debt among the company's active
/// rules. A unique matching default wins outright; otherwise the most
/// recently created match wins (ties broken by id so the choice is
/// stable), and the ambiguity is reported. Zero matches means the debt
/// is skipped this pass.
pub fn select_rule<'a>(debt: &Debt, candidates: &[&'a CollectionRule]) -> Option<Selection<'a>> {
    let mut matching: Vec<&'a CollectionRule> = candidates
        .iter()
        .filter(|rule| rule.is_active && rule.matches_approval(&debt.approval_status))
        .copied()
        .collect();

    if matching.is_empty() {
        return None;
    }

    if matching.len() == 1 {
        return Some(Selection {
            rule: matching[0],
            ambiguity: None,
        });
    }

    let defaults: Vec<&CollectionRule> = matching
        .iter()
        .filter(|rule| rule.is_default_for_company)
        .copied()
        .collect();

    if defaults.len() == 1 {
        return Some(Selection {
            rule: defaults[0],
            ambiguity: None,
        });
    }

    // Several matches and no unique default: most recent created_at wins.
    let mut pool = if defaults.is_empty() { matching } else { defaults };
    pool.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.0.cmp(&a.id.0))
    });
    let chosen = pool[0];
    let contenders = pool.iter().map(|rule| rule.id.clone()).collect();

    Some(Selection {
        rule: chosen,
        ambiguity: Some(AmbiguousDefault {
            chosen: chosen.id.clone(),
            contenders,
        }),
    })
}
