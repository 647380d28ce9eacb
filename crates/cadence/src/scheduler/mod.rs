//! The cadence decision pipeline.
//!
//! One evaluation pass runs, per company and per debt: eligibility →
//! rule selection → anchor resolution → step-due evaluation → ledger
//! claim → template rendering → dispatch → ledger commit. Every module
//! below owns exactly one of those stages.

pub mod anchor;
pub mod dispatch;
pub mod domain;
pub mod due;
pub mod eligibility;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod router;
pub mod selector;
pub mod template;

#[cfg(test)]
mod tests;

pub use dispatch::{
    ChannelAdapter, ChannelRegistry, DispatchResult, Dispatcher, OutboundMessage, SendError,
};
pub use domain::{
    ActionType, AnchorField, ApprovalStatus, CadenceStep, CollectionRule, CompanyId,
    CompanyProfile, ContactChannels, ContactPoint, Debt, DebtId, DebtStatus, ExecutionMode,
    LocaleConvention, RuleId, RuleSnapshot,
};
pub use eligibility::{Eligibility, IneligibleReason};
pub use events::{EventSink, SchedulerEvent};
pub use ledger::{
    AttemptToken, ClaimError, CommitOutcome, CommitReceipt, ExecutionLedger, ExecutionOutcome,
    ExecutionQuery, ExecutionRecord, InMemoryLedger, LedgerError, RuleRun,
};
pub use orchestrator::{
    CadenceOrchestrator, CancellationFlag, DebtOutcome, DebtSource, PassReport, RuleSource,
    SkipReason, SourceError, StepOutcome, StepResult, TriggerError,
};
pub use router::cadence_router;
pub use selector::{select_rule, AmbiguousDefault, Selection};
pub use template::{render, Rendered, TemplateVars};
