use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::anchor::resolve_anchor;
use super::dispatch::{DispatchResult, Dispatcher, OutboundMessage};
use super::domain::{
    ActionType, AnchorField, CadenceStep, CollectionRule, CompanyId, CompanyProfile, Debt, DebtId,
    RuleId, RuleSnapshot,
};
use super::due::{due_steps, elapsed_days};
use super::eligibility::{self, Eligibility, IneligibleReason};
use super::events::{EventSink, SchedulerEvent, SkipDetail};
use super::ledger::{CommitOutcome, ExecutionLedger, RuleRun};
use super::selector::select_rule;
use super::template::{render, TemplateVars};
use crate::config::SchedulerConfig;

/// Read-only view over rule definitions, owned elsewhere. The scheduler
/// takes a fresh snapshot per company per pass.
pub trait RuleSource: Send + Sync {
    fn companies(&self) -> Result<Vec<CompanyProfile>, SourceError>;
    fn rules_for(&self, company: &CompanyId) -> Result<Vec<CollectionRule>, SourceError>;
}

/// Read-only view over debts and customer contacts, owned elsewhere.
pub trait DebtSource: Send + Sync {
    fn open_debts(&self, company: &CompanyId) -> Result<Vec<Debt>, SourceError>;
    fn debt(&self, id: &DebtId) -> Result<Option<Debt>, SourceError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Error raised by the manual trigger surface.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("unknown company '{}'", .0 .0)]
    UnknownCompany(CompanyId),
    #[error("unknown rule '{}'", .0 .0)]
    UnknownRule(RuleId),
    #[error("unknown debt '{}'", .0 .0)]
    UnknownDebt(DebtId),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Cooperative cancellation: once raised, the pass issues no new claims
/// but lets in-flight dispatches resolve their claims.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reclaimed_claims: usize,
    pub companies_processed: usize,
    pub companies_failed: usize,
    pub debts_evaluated: usize,
    pub debts_skipped: usize,
    pub steps_sent: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
}

impl PassReport {
    fn absorb(&mut self, stats: &CompanyStats) {
        self.companies_processed += 1;
        self.debts_evaluated += stats.debts_evaluated;
        self.debts_skipped += stats.debts_skipped;
        self.steps_sent += stats.steps_sent;
        self.steps_failed += stats.steps_failed;
        self.steps_skipped += stats.steps_skipped;
    }
}

/// Per-debt outcome returned by manual triggers and aggregated by passes.
#[derive(Debug, Clone, Serialize)]
pub struct DebtOutcome {
    pub debt_id: DebtId,
    pub rule_id: Option<RuleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub steps: Vec<StepOutcome>,
}

impl DebtOutcome {
    fn skipped(debt_id: DebtId, reason: SkipReason) -> Self {
        Self {
            debt_id,
            rule_id: None,
            skipped: Some(reason),
            steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Ineligible(IneligibleReason),
    NoMatchingRule,
    MissingAnchor(AnchorField),
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step_order: u32,
    pub action: ActionType,
    pub result: StepResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    Sent {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        reason: String,
        permanent: bool,
        pinned: bool,
    },
    /// The step was due but not dispatchable (missing contact channel).
    Skipped {
        reason: String,
    },
    /// Another worker holds or already resolved the claim; a no-op.
    NotClaimed {
        reason: String,
    },
}

#[derive(Debug, Default)]
struct CompanyStats {
    debts_evaluated: usize,
    debts_skipped: usize,
    steps_sent: usize,
    steps_failed: usize,
    steps_skipped: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct RuleTally {
    debts_evaluated: usize,
    steps_sent: usize,
    steps_failed: usize,
}

/// Drives evaluation passes across companies and debts with bounded
/// parallelism, and exposes the synchronous manual-trigger pipeline.
pub struct CadenceOrchestrator<R, D, L, E> {
    rules: Arc<R>,
    debts: Arc<D>,
    ledger: Arc<L>,
    events: Arc<E>,
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
    cancellation: CancellationFlag,
}

impl<R, D, L, E> Clone for CadenceOrchestrator<R, D, L, E> {
    fn clone(&self) -> Self {
        Self {
            rules: Arc::clone(&self.rules),
            debts: Arc::clone(&self.debts),
            ledger: Arc::clone(&self.ledger),
            events: Arc::clone(&self.events),
            dispatcher: Arc::clone(&self.dispatcher),
            config: self.config.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<R, D, L, E> CadenceOrchestrator<R, D, L, E>
where
    R: RuleSource + 'static,
    D: DebtSource + 'static,
    L: ExecutionLedger + 'static,
    E: EventSink + 'static,
{
    pub fn new(
        rules: Arc<R>,
        debts: Arc<D>,
        ledger: Arc<L>,
        events: Arc<E>,
        dispatcher: Dispatcher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            rules,
            debts,
            ledger,
            events,
            dispatcher: Arc::new(dispatcher),
            config,
            cancellation: CancellationFlag::default(),
        }
    }

    /// Handle for shutdown paths to stop new claims being issued.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancellation.clone()
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Run one automatic evaluation pass over every company. A single
    /// debt's failure never aborts the pass; companies whose sources are
    /// unavailable are counted and skipped.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassReport, SourceError> {
        let mut report = PassReport {
            started_at: Some(now),
            ..PassReport::default()
        };

        report.reclaimed_claims = self
            .ledger
            .reclaim_abandoned(now, self.config.claim_timeout());
        if report.reclaimed_claims > 0 {
            warn!(
                reclaimed = report.reclaimed_claims,
                "reclaimed abandoned ledger claims"
            );
        }

        let companies = self.rules.companies()?;
        let semaphore = Arc::new(Semaphore::new(self.config.company_concurrency));
        let mut join = JoinSet::new();

        for company in companies {
            if self.cancellation.is_cancelled() {
                break;
            }
            let semaphore = Arc::clone(&semaphore);
            let this = self.clone();
            join.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (company.id.clone(), Err(SourceError::Unavailable(
                        "worker pool closed".to_string(),
                    ))),
                };
                let id = company.id.clone();
                (id, this.process_company(company, now).await)
            });
        }

        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((_, Ok(stats))) => report.absorb(&stats),
                Ok((company_id, Err(err))) => {
                    warn!(company = %company_id.0, %err, "company pass failed");
                    report.companies_failed += 1;
                }
                Err(join_err) => {
                    error!(%join_err, "company task aborted");
                    report.companies_failed += 1;
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            companies = report.companies_processed,
            debts = report.debts_evaluated,
            sent = report.steps_sent,
            failed = report.steps_failed,
            "evaluation pass complete"
        );
        Ok(report)
    }

    async fn process_company(
        &self,
        company: CompanyProfile,
        now: DateTime<Utc>,
    ) -> Result<CompanyStats, SourceError> {
        let rules = self.rules.rules_for(&company.id)?;
        let snapshot = Arc::new(RuleSnapshot::new(company, rules, now));

        for rule in snapshot.active_rules() {
            for detail in rule.configuration_anomalies() {
                self.events.publish(SchedulerEvent::RuleConfigurationAnomaly {
                    rule_id: rule.id.clone(),
                    detail,
                });
            }
        }

        let debts = self.debts.open_debts(&snapshot.company.id)?;
        let semaphore = Arc::new(Semaphore::new(self.config.debt_concurrency));
        let mut join = JoinSet::new();

        for debt in debts {
            if self.cancellation.is_cancelled() {
                break;
            }
            let semaphore = Arc::clone(&semaphore);
            let snapshot = Arc::clone(&snapshot);
            let this = self.clone();
            join.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return DebtOutcome::skipped(debt.id, SkipReason::Cancelled),
                };
                this.evaluate_debt(&snapshot, debt, now, false).await
            });
        }

        let mut stats = CompanyStats::default();
        let mut tallies: HashMap<RuleId, RuleTally> = HashMap::new();
        while let Some(joined) = join.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    error!(%join_err, "debt task aborted");
                    continue;
                }
            };
            absorb_outcome(&mut stats, &mut tallies, &outcome);
        }

        let finished_at = Utc::now();
        for (rule_id, tally) in tallies {
            self.ledger.record_rule_run(RuleRun {
                rule_id,
                company_id: snapshot.company.id.clone(),
                started_at: now,
                finished_at,
                debts_evaluated: tally.debts_evaluated,
                steps_sent: tally.steps_sent,
                steps_failed: tally.steps_failed,
            });
        }

        Ok(stats)
    }

    /// Run the full pipeline for one debt against a rule snapshot.
    /// `manual` widens the candidate set to Manual-mode rules.
    async fn evaluate_debt(
        &self,
        snapshot: &RuleSnapshot,
        debt: Debt,
        now: DateTime<Utc>,
        manual: bool,
    ) -> DebtOutcome {
        if self.cancellation.is_cancelled() {
            return DebtOutcome::skipped(debt.id, SkipReason::Cancelled);
        }

        let candidates = if manual {
            snapshot.active_rules()
        } else {
            snapshot.automatic_rules()
        };

        if let Eligibility::Ineligible(reason) = eligibility::assess(&debt, &candidates) {
            debug!(debt = %debt.id.0, reason = %reason.summary(), "debt ineligible");
            return DebtOutcome::skipped(debt.id, SkipReason::Ineligible(reason));
        }

        let Some(selection) = select_rule(&debt, &candidates) else {
            return DebtOutcome::skipped(debt.id, SkipReason::NoMatchingRule);
        };
        if let Some(ambiguity) = &selection.ambiguity {
            self.events.publish(SchedulerEvent::AmbiguousDefaultRule {
                company_id: snapshot.company.id.clone(),
                debt_id: debt.id.clone(),
                chosen: ambiguity.chosen.clone(),
                contenders: ambiguity.contenders.clone(),
            });
        }
        let rule = selection.rule;

        let Some(anchor) = resolve_anchor(rule, &debt) else {
            self.events.publish(SchedulerEvent::DebtSkipped {
                debt_id: debt.id.clone(),
                reason: SkipDetail::MissingAnchor(rule.start_date_field),
            });
            return DebtOutcome::skipped(debt.id, SkipReason::MissingAnchor(rule.start_date_field));
        };

        let now_local = snapshot.company.local_now(now);
        let fired = self.ledger.fired_orders(&debt.id, &rule.id);
        let ordered = rule.sorted_steps();
        let due = due_steps(anchor, now_local, &ordered, &fired);
        // Placeholder semantics: days_overdue counts from the due date
        // even when the rule anchors elsewhere.
        let days_overdue = elapsed_days(debt.due_date, now_local);

        let mut steps = Vec::new();
        for step in due {
            // Shutdown: stop issuing new dispatches, keep what resolved.
            if self.cancellation.is_cancelled() {
                break;
            }
            steps.push(
                self.fire_step(&snapshot.company, rule, step, &debt, days_overdue, now)
                    .await,
            );
        }

        DebtOutcome {
            debt_id: debt.id,
            rule_id: Some(rule.id.clone()),
            skipped: None,
            steps,
        }
    }

    async fn fire_step(
        &self,
        company: &CompanyProfile,
        rule: &CollectionRule,
        step: &CadenceStep,
        debt: &Debt,
        days_overdue: i64,
        now: DateTime<Utc>,
    ) -> StepOutcome {
        let token = match self
            .ledger
            .begin_attempt(&debt.id, &rule.id, step.step_order, now)
        {
            Ok(token) => token,
            Err(err) => {
                debug!(
                    debt = %debt.id.0,
                    rule = %rule.id.0,
                    step = step.step_order,
                    %err,
                    "claim not taken"
                );
                return StepOutcome {
                    step_order: step.step_order,
                    action: step.action_type,
                    result: StepResult::NotClaimed {
                        reason: err.to_string(),
                    },
                };
            }
        };

        // A missing contact resolves the claim as Skipped so the audit
        // trail records it; the slot stays claimable for a later pass.
        let Some(contact) = step.action_type.contact_point(&debt.contact) else {
            let reason = format!("no {} contact on file", step.action_type.label());
            if let Err(err) = self.ledger.commit(
                token,
                CommitOutcome::Skipped {
                    reason: reason.clone(),
                },
                Utc::now(),
            ) {
                error!(debt = %debt.id.0, step = step.step_order, %err, "commit failed");
            }
            self.events.publish(SchedulerEvent::DebtSkipped {
                debt_id: debt.id.clone(),
                reason: SkipDetail::MissingContact(step.action_type),
            });
            return StepOutcome {
                step_order: step.step_order,
                action: step.action_type,
                result: StepResult::Skipped { reason },
            };
        };

        let vars = TemplateVars::for_debt(debt, company, days_overdue);
        let body = render(&step.template_content, &vars);
        let subject = step
            .template_subject
            .as_deref()
            .map(|template| render(template, &vars));

        let mut gaps = body.missing.clone();
        if let Some(rendered) = &subject {
            for variable in &rendered.missing {
                if !gaps.contains(variable) {
                    gaps.push(variable.clone());
                }
            }
        }
        if !gaps.is_empty() {
            self.events.publish(SchedulerEvent::TemplateVariableGap {
                debt_id: debt.id.clone(),
                rule_id: rule.id.clone(),
                step_order: step.step_order,
                variables: gaps,
            });
        }

        let message = OutboundMessage {
            debt_id: debt.id.clone(),
            company_id: company.id.clone(),
            action: step.action_type,
            contact,
            subject: subject.map(|rendered| rendered.text),
            body: body.text,
        };

        // The claim must always resolve; abandoned claims are swept by
        // reclaim_abandoned at the start of the next pass.
        match self.dispatcher.dispatch(&message).await {
            DispatchResult::Sent { attempts } => {
                if let Err(err) = self
                    .ledger
                    .commit(token, CommitOutcome::Sent { attempts }, Utc::now())
                {
                    error!(debt = %debt.id.0, step = step.step_order, %err, "commit failed");
                }
                StepOutcome {
                    step_order: step.step_order,
                    action: step.action_type,
                    result: StepResult::Sent { attempts },
                }
            }
            DispatchResult::Failed {
                attempts,
                reason,
                permanent,
            } => {
                let mut pinned = false;
                match self.ledger.commit(
                    token,
                    CommitOutcome::Failed {
                        attempts,
                        reason: reason.clone(),
                        permanent,
                    },
                    Utc::now(),
                ) {
                    Ok(receipt) => pinned = receipt.pinned,
                    Err(err) => {
                        error!(debt = %debt.id.0, step = step.step_order, %err, "commit failed")
                    }
                }
                if pinned {
                    self.events.publish(SchedulerEvent::StepPinnedFailed {
                        debt_id: debt.id.clone(),
                        rule_id: rule.id.clone(),
                        step_order: step.step_order,
                        reason: reason.clone(),
                    });
                }
                StepOutcome {
                    step_order: step.step_order,
                    action: step.action_type,
                    result: StepResult::Failed {
                        attempts,
                        reason,
                        permanent,
                        pinned,
                    },
                }
            }
        }
    }

    /// Manual trigger: evaluate one named rule for every open debt of a
    /// company, Manual-mode rules included. Returns per-debt outcomes.
    pub async fn run_rule(
        &self,
        rule_id: &RuleId,
        company_id: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<Vec<DebtOutcome>, TriggerError> {
        let company = self
            .rules
            .companies()?
            .into_iter()
            .find(|company| company.id == *company_id)
            .ok_or_else(|| TriggerError::UnknownCompany(company_id.clone()))?;
        let rule = self
            .rules
            .rules_for(company_id)?
            .into_iter()
            .find(|rule| rule.id == *rule_id)
            .ok_or_else(|| TriggerError::UnknownRule(rule_id.clone()))?;

        let snapshot = RuleSnapshot::new(company, vec![rule], now);
        let debts = self.debts.open_debts(company_id)?;

        let mut outcomes = Vec::with_capacity(debts.len());
        let mut tally = RuleTally::default();
        for debt in debts {
            let outcome = self.evaluate_debt(&snapshot, debt, now, true).await;
            if outcome.rule_id.is_some() {
                tally.debts_evaluated += 1;
            }
            for step in &outcome.steps {
                match step.result {
                    StepResult::Sent { .. } => tally.steps_sent += 1,
                    StepResult::Failed { .. } => tally.steps_failed += 1,
                    _ => {}
                }
            }
            outcomes.push(outcome);
        }

        self.ledger.record_rule_run(RuleRun {
            rule_id: rule_id.clone(),
            company_id: company_id.clone(),
            started_at: now,
            finished_at: Utc::now(),
            debts_evaluated: tally.debts_evaluated,
            steps_sent: tally.steps_sent,
            steps_failed: tally.steps_failed,
        });

        Ok(outcomes)
    }

    /// Manual trigger: evaluate a single named debt against its company's
    /// active rules, Manual-mode rules included.
    pub async fn run_debt(
        &self,
        debt_id: &DebtId,
        now: DateTime<Utc>,
    ) -> Result<DebtOutcome, TriggerError> {
        let debt = self
            .debts
            .debt(debt_id)?
            .ok_or_else(|| TriggerError::UnknownDebt(debt_id.clone()))?;
        let company = self
            .rules
            .companies()?
            .into_iter()
            .find(|company| company.id == debt.company_id)
            .ok_or_else(|| TriggerError::UnknownCompany(debt.company_id.clone()))?;
        let rules = self.rules.rules_for(&debt.company_id)?;

        let snapshot = RuleSnapshot::new(company, rules, now);
        Ok(self.evaluate_debt(&snapshot, debt, now, true).await)
    }
}

fn absorb_outcome(
    stats: &mut CompanyStats,
    tallies: &mut HashMap<RuleId, RuleTally>,
    outcome: &DebtOutcome,
) {
    if outcome.skipped.is_some() {
        stats.debts_skipped += 1;
        return;
    }

    stats.debts_evaluated += 1;
    let tally = outcome
        .rule_id
        .as_ref()
        .map(|rule_id| tallies.entry(rule_id.clone()).or_default());
    if let Some(tally) = tally {
        tally.debts_evaluated += 1;
    }

    for step in &outcome.steps {
        match step.result {
            StepResult::Sent { .. } => {
                stats.steps_sent += 1;
                if let Some(rule_id) = &outcome.rule_id {
                    tallies.entry(rule_id.clone()).or_default().steps_sent += 1;
                }
            }
            StepResult::Failed { .. } => {
                stats.steps_failed += 1;
                if let Some(rule_id) = &outcome.rule_id {
                    tallies.entry(rule_id.clone()).or_default().steps_failed += 1;
                }
            }
            StepResult::Skipped { .. } | StepResult::NotClaimed { .. } => {
                stats.steps_skipped += 1;
            }
        }
    }
}
