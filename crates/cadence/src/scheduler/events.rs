use super::domain::{ActionType, AnchorField, CompanyId, DebtId, RuleId};
use serde::Serialize;

/// Warning and anomaly events surfaced to an operational stream external
/// to this core. Never fatal; processing continues with the documented
/// tie-break or skip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// More than one rule could apply and the most-recent-wins tie-break
    /// was used.
    AmbiguousDefaultRule {
        company_id: CompanyId,
        debt_id: DebtId,
        chosen: RuleId,
        contenders: Vec<RuleId>,
    },
    /// A rule carries a configuration defect, e.g. an email step without
    /// a subject template.
    RuleConfigurationAnomaly {
        rule_id: RuleId,
        detail: String,
    },
    /// A known template variable had no value and rendered empty.
    TemplateVariableGap {
        debt_id: DebtId,
        rule_id: RuleId,
        step_order: u32,
        variables: Vec<String>,
    },
    /// A step exhausted its retry budget (or failed permanently) and its
    /// outcome is now pinned to Failed.
    StepPinnedFailed {
        debt_id: DebtId,
        rule_id: RuleId,
        step_order: u32,
        reason: String,
    },
    /// A debt was skipped this pass for a data-incompleteness reason and
    /// may become processable later.
    DebtSkipped {
        debt_id: DebtId,
        reason: SkipDetail,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipDetail {
    MissingAnchor(AnchorField),
    MissingContact(ActionType),
}

/// Outbound hook for scheduler events (dashboards, alerting). In-memory
/// in tests, tracing-backed in the service.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: SchedulerEvent);
}
