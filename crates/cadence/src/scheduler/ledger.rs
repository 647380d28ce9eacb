use super::domain::{CompanyId, DebtId, RuleId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Terminal (or provisional) outcome of one (debt, rule, step) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The claim is held by a worker and not yet resolved.
    Pending,
    Sent,
    Failed,
    Skipped,
}

/// Audit record for one step slot. Created on first claim, appended to on
/// retries, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub debt_id: DebtId,
    pub rule_id: RuleId,
    pub step_order: u32,
    pub outcome: ExecutionOutcome,
    /// Dispatch attempts accumulated across claims.
    pub attempt_count: u32,
    pub claimed_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// A terminal record accepts no further claims.
    pub terminal: bool,
}

/// Exclusive reservation of a step slot, resolved by exactly one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptToken {
    pub debt_id: DebtId,
    pub rule_id: RuleId,
    pub step_order: u32,
}

/// Why a claim could not be taken. Losing a claim race is a no-op for the
/// caller, not an error condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("another worker holds the claim")]
    InFlight,
    #[error("step already sent")]
    AlreadySent,
    #[error("step terminally failed")]
    PinnedFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no claim held for {0:?} step {1}")]
    UnknownClaim(DebtId, u32),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Resolution reported by the worker holding a claim.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Sent {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        reason: String,
        /// Permanent failures pin immediately, skipping the retry budget.
        permanent: bool,
    },
    /// Resolve the claim without consuming the slot; a later pass may
    /// claim it again.
    Skipped {
        reason: String,
    },
}

/// What the commit did, so the orchestrator can surface pinned failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub pinned: bool,
}

/// One completed evaluation of a rule, recorded explicitly so "never run"
/// and "ran with zero eligible debts" stay distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRun {
    pub rule_id: RuleId,
    pub company_id: CompanyId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub debts_evaluated: usize,
    pub steps_sent: usize,
    pub steps_failed: usize,
}

/// Filter for the audit-trail query surface.
#[derive(Debug, Clone, Default)]
pub struct ExecutionQuery {
    pub debt_id: Option<DebtId>,
    pub rule_id: Option<RuleId>,
    pub outcome: Option<ExecutionOutcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Idempotency store and audit trail. The claim/commit split exists
/// because dispatch is slow network I/O: two concurrent passes must never
/// both send the same message, so the claim must be a single atomic
/// write.
pub trait ExecutionLedger: Send + Sync {
    fn has_fired(&self, debt_id: &DebtId, rule_id: &RuleId, step_order: u32) -> bool;

    /// Step orders with a Sent record for this (debt, rule) pair.
    fn fired_orders(&self, debt_id: &DebtId, rule_id: &RuleId) -> BTreeSet<u32>;

    fn begin_attempt(
        &self,
        debt_id: &DebtId,
        rule_id: &RuleId,
        step_order: u32,
        now: DateTime<Utc>,
    ) -> Result<AttemptToken, ClaimError>;

    fn commit(
        &self,
        token: AttemptToken,
        outcome: CommitOutcome,
        now: DateTime<Utc>,
    ) -> Result<CommitReceipt, LedgerError>;

    /// Release claims older than `timeout` with no terminal commit, making
    /// them eligible for retry. Returns how many were reclaimed.
    fn reclaim_abandoned(&self, now: DateTime<Utc>, timeout: Duration) -> usize;

    fn query(&self, query: &ExecutionQuery) -> Vec<ExecutionRecord>;

    fn record_rule_run(&self, run: RuleRun);

    fn rule_runs(&self, rule_id: &RuleId) -> Vec<RuleRun>;

    /// Latest completed run for the rule, if any.
    fn last_execution_at(&self, rule_id: &RuleId) -> Option<DateTime<Utc>> {
        self.rule_runs(rule_id)
            .into_iter()
            .map(|run| run.finished_at)
            .max()
    }
}

type SlotKey = (DebtId, RuleId, u32);

/// In-memory ledger. A single mutex around the slot map makes the
/// claim-or-conflict decision atomic under concurrent workers and
/// concurrent passes.
pub struct InMemoryLedger {
    max_attempts: u32,
    slots: Mutex<HashMap<SlotKey, ExecutionRecord>>,
    runs: Mutex<Vec<RuleRun>>,
}

impl InMemoryLedger {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            slots: Mutex::new(HashMap::new()),
            runs: Mutex::new(Vec::new()),
        }
    }
}

impl ExecutionLedger for InMemoryLedger {
    fn has_fired(&self, debt_id: &DebtId, rule_id: &RuleId, step_order: u32) -> bool {
        let slots = self.slots.lock().expect("ledger mutex poisoned");
        slots
            .get(&(debt_id.clone(), rule_id.clone(), step_order))
            .map(|record| record.outcome == ExecutionOutcome::Sent)
            .unwrap_or(false)
    }

    fn fired_orders(&self, debt_id: &DebtId, rule_id: &RuleId) -> BTreeSet<u32> {
        let slots = self.slots.lock().expect("ledger mutex poisoned");
        slots
            .values()
            .filter(|record| {
                record.debt_id == *debt_id
                    && record.rule_id == *rule_id
                    && record.outcome == ExecutionOutcome::Sent
            })
            .map(|record| record.step_order)
            .collect()
    }

    fn begin_attempt(
        &self,
        debt_id: &DebtId,
        rule_id: &RuleId,
        step_order: u32,
        now: DateTime<Utc>,
    ) -> Result<AttemptToken, ClaimError> {
        let mut slots = self.slots.lock().expect("ledger mutex poisoned");
        let key = (debt_id.clone(), rule_id.clone(), step_order);

        match slots.get_mut(&key) {
            None => {
                slots.insert(
                    key,
                    ExecutionRecord {
                        debt_id: debt_id.clone(),
                        rule_id: rule_id.clone(),
                        step_order,
                        outcome: ExecutionOutcome::Pending,
                        attempt_count: 0,
                        claimed_at: now,
                        fired_at: None,
                        failure_reason: None,
                        terminal: false,
                    },
                );
                Ok(AttemptToken {
                    debt_id: debt_id.clone(),
                    rule_id: rule_id.clone(),
                    step_order,
                })
            }
            Some(record) => match record.outcome {
                ExecutionOutcome::Pending => Err(ClaimError::InFlight),
                ExecutionOutcome::Sent => Err(ClaimError::AlreadySent),
                ExecutionOutcome::Failed if record.terminal => Err(ClaimError::PinnedFailed),
                ExecutionOutcome::Failed | ExecutionOutcome::Skipped => {
                    record.outcome = ExecutionOutcome::Pending;
                    record.claimed_at = now;
                    Ok(AttemptToken {
                        debt_id: debt_id.clone(),
                        rule_id: rule_id.clone(),
                        step_order,
                    })
                }
            },
        }
    }

    fn commit(
        &self,
        token: AttemptToken,
        outcome: CommitOutcome,
        now: DateTime<Utc>,
    ) -> Result<CommitReceipt, LedgerError> {
        let mut slots = self.slots.lock().expect("ledger mutex poisoned");
        let key = (
            token.debt_id.clone(),
            token.rule_id.clone(),
            token.step_order,
        );

        let record = slots
            .get_mut(&key)
            .filter(|record| record.outcome == ExecutionOutcome::Pending)
            .ok_or(LedgerError::UnknownClaim(token.debt_id, token.step_order))?;

        let mut receipt = CommitReceipt { pinned: false };
        match outcome {
            CommitOutcome::Sent { attempts } => {
                record.outcome = ExecutionOutcome::Sent;
                record.attempt_count += attempts.max(1);
                record.fired_at = Some(now);
                record.failure_reason = None;
                record.terminal = true;
            }
            CommitOutcome::Failed {
                attempts,
                reason,
                permanent,
            } => {
                record.outcome = ExecutionOutcome::Failed;
                record.attempt_count += attempts.max(1);
                record.failure_reason = Some(reason);
                if permanent || record.attempt_count >= self.max_attempts {
                    record.terminal = true;
                    receipt.pinned = true;
                }
            }
            CommitOutcome::Skipped { reason } => {
                record.outcome = ExecutionOutcome::Skipped;
                record.failure_reason = Some(reason);
            }
        }

        Ok(receipt)
    }

    fn reclaim_abandoned(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut slots = self.slots.lock().expect("ledger mutex poisoned");
        let mut reclaimed = 0;
        for record in slots.values_mut() {
            if record.outcome == ExecutionOutcome::Pending && now - record.claimed_at >= timeout {
                record.outcome = ExecutionOutcome::Failed;
                record.failure_reason = Some("claim abandoned without terminal commit".to_string());
                reclaimed += 1;
            }
        }
        reclaimed
    }

    fn query(&self, query: &ExecutionQuery) -> Vec<ExecutionRecord> {
        let slots = self.slots.lock().expect("ledger mutex poisoned");
        let mut records: Vec<ExecutionRecord> = slots
            .values()
            .filter(|record| {
                query
                    .debt_id
                    .as_ref()
                    .map(|debt| record.debt_id == *debt)
                    .unwrap_or(true)
                    && query
                        .rule_id
                        .as_ref()
                        .map(|rule| record.rule_id == *rule)
                        .unwrap_or(true)
                    && query
                        .outcome
                        .map(|outcome| record.outcome == outcome)
                        .unwrap_or(true)
                    && query
                        .from
                        .map(|from| record.claimed_at >= from)
                        .unwrap_or(true)
                    && query.to.map(|to| record.claimed_at <= to).unwrap_or(true)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.claimed_at
                .cmp(&b.claimed_at)
                .then_with(|| a.step_order.cmp(&b.step_order))
        });
        records
    }

    fn record_rule_run(&self, run: RuleRun) {
        self.runs.lock().expect("ledger mutex poisoned").push(run);
    }

    fn rule_runs(&self, rule_id: &RuleId) -> Vec<RuleRun> {
        self.runs
            .lock()
            .expect("ledger mutex poisoned")
            .iter()
            .filter(|run| run.rule_id == *rule_id)
            .cloned()
            .collect()
    }
}
