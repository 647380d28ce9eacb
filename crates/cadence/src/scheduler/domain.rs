use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for companies running cadences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

/// Identifier wrapper for overdue debts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebtId(pub String);

/// Identifier wrapper for collection rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

/// Approval label assigned to a debt by the (external) credit analysis.
/// Compared verbatim against a rule's required set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalStatus(pub String);

/// Whether a rule participates in the automatic pass or only fires when
/// explicitly invoked by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Automatic,
    Manual,
}

/// The debt field that a rule's day offsets are counted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorField {
    DueDate,
    FirstOverdue,
    AnalysisDate,
}

impl AnchorField {
    pub const fn label(self) -> &'static str {
        match self {
            AnchorField::DueDate => "due_date",
            AnchorField::FirstOverdue => "first_overdue",
            AnchorField::AnalysisDate => "analysis_date",
        }
    }
}

/// Communication channel of a cadence step. Adding a channel means a new
/// registry entry in the dispatcher, not a new conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Email,
    Sms,
    WhatsApp,
    AutomaticCall,
    HumanCall,
}

impl ActionType {
    pub const fn label(self) -> &'static str {
        match self {
            ActionType::Email => "email",
            ActionType::Sms => "sms",
            ActionType::WhatsApp => "whatsapp",
            ActionType::AutomaticCall => "automatic_call",
            ActionType::HumanCall => "human_call",
        }
    }

    pub const fn requires_subject(self) -> bool {
        matches!(self, ActionType::Email)
    }

    /// Pick the contact point this channel delivers to, if the debt has one.
    pub fn contact_point(self, contact: &ContactChannels) -> Option<ContactPoint> {
        match self {
            ActionType::Email => contact.email.clone().map(ContactPoint::Email),
            ActionType::Sms
            | ActionType::WhatsApp
            | ActionType::AutomaticCall
            | ActionType::HumanCall => contact.phone.clone().map(ContactPoint::Phone),
        }
    }
}

/// One step of a cadence: which channel fires how many days after the
/// anchor, and at which company-local time of day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceStep {
    pub step_order: u32,
    pub days_after_due: u32,
    pub action_type: ActionType,
    pub template_subject: Option<String>,
    pub template_content: String,
    pub execution_time: NaiveTime,
    pub is_enabled: bool,
}

/// A company-defined cadence. Read-only within one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub execution_mode: ExecutionMode,
    pub start_date_field: AnchorField,
    pub is_default_for_company: bool,
    /// Empty set means no approval-status restriction.
    pub requires_approval_status: Vec<ApprovalStatus>,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<CadenceStep>,
}

impl CollectionRule {
    pub fn step(&self, order: u32) -> Option<&CadenceStep> {
        self.steps.iter().find(|step| step.step_order == order)
    }

    /// Steps in firing sequence.
    pub fn sorted_steps(&self) -> Vec<&CadenceStep> {
        let mut steps: Vec<&CadenceStep> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.step_order);
        steps
    }

    pub fn matches_approval(&self, status: &ApprovalStatus) -> bool {
        self.requires_approval_status.is_empty()
            || self.requires_approval_status.contains(status)
    }

    /// Configuration anomalies that never block processing but deserve a
    /// warning event: an email step without a subject template, duplicate
    /// step orders.
    pub fn configuration_anomalies(&self) -> Vec<String> {
        let mut anomalies = Vec::new();
        for step in &self.steps {
            if step.action_type.requires_subject()
                && step
                    .template_subject
                    .as_deref()
                    .map(str::trim)
                    .filter(|subject| !subject.is_empty())
                    .is_none()
            {
                anomalies.push(format!(
                    "step {} sends email without a subject template",
                    step.step_order
                ));
            }
        }
        let mut orders: Vec<u32> = self.steps.iter().map(|step| step.step_order).collect();
        orders.sort_unstable();
        orders.dedup();
        if orders.len() != self.steps.len() {
            anomalies.push("duplicate step_order values".to_string());
        }
        anomalies
    }
}

/// Lifecycle status of a debt, owned by external processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtStatus {
    Open,
    Overdue,
    InCollection,
    InNegotiation,
    Paid,
    Cancelled,
}

impl DebtStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DebtStatus::Open => "open",
            DebtStatus::Overdue => "overdue",
            DebtStatus::InCollection => "in_collection",
            DebtStatus::InNegotiation => "in_negotiation",
            DebtStatus::Paid => "paid",
            DebtStatus::Cancelled => "cancelled",
        }
    }

    /// Only these statuses qualify for automated processing.
    pub const fn collectable(self) -> bool {
        matches!(
            self,
            DebtStatus::Open | DebtStatus::Overdue | DebtStatus::InCollection
        )
    }
}

/// Customer contact channels attached to a debt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactChannels {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A concrete destination resolved for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactPoint {
    Email(String),
    Phone(String),
}

impl ContactPoint {
    pub fn address(&self) -> &str {
        match self {
            ContactPoint::Email(address) => address,
            ContactPoint::Phone(number) => number,
        }
    }
}

/// Snapshot of an overdue debt, read-only to the scheduler. The state may
/// change between passes; each pass reads it fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    pub id: DebtId,
    pub company_id: CompanyId,
    pub customer_name: String,
    pub contact: ContactChannels,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
    pub first_overdue_date: Option<NaiveDate>,
    pub analysis_date: Option<NaiveDate>,
    pub approval_status: ApprovalStatus,
    pub status: DebtStatus,
}

/// Formatting convention for amounts and dates in rendered messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocaleConvention {
    PtBr,
    EnUs,
}

impl LocaleConvention {
    /// Render an amount in cents as a currency string.
    pub fn format_amount(self, amount_cents: i64) -> String {
        let negative = amount_cents < 0;
        let cents = amount_cents.unsigned_abs();
        let units = cents / 100;
        let fraction = cents % 100;
        let grouped = match self {
            LocaleConvention::PtBr => group_thousands(units, '.'),
            LocaleConvention::EnUs => group_thousands(units, ','),
        };
        match self {
            LocaleConvention::PtBr => format!(
                "{}R$ {},{:02}",
                if negative { "-" } else { "" },
                grouped,
                fraction
            ),
            LocaleConvention::EnUs => format!(
                "{}${}.{:02}",
                if negative { "-" } else { "" },
                grouped,
                fraction
            ),
        }
    }

    pub fn format_date(self, date: NaiveDate) -> String {
        match self {
            LocaleConvention::PtBr => date.format("%d/%m/%Y").to_string(),
            LocaleConvention::EnUs => date.format("%m/%d/%Y").to_string(),
        }
    }
}

fn group_thousands(value: u64, separator: char) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(ch);
    }
    grouped
}

/// Company identity plus the conventions the renderer and the step-due
/// evaluator need: a fixed UTC offset standing in for the company
/// timezone, and the locale used to format amounts and dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub id: CompanyId,
    pub name: String,
    pub utc_offset_minutes: i32,
    pub locale: LocaleConvention,
}

impl CompanyProfile {
    /// Convert a UTC instant into the company's local wall clock.
    pub fn local_now(&self, now: DateTime<Utc>) -> NaiveDateTime {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        now.with_timezone(&offset).naive_local()
    }
}

/// Immutable point-in-time view of a company's rules, taken once per
/// pass. The scheduler never mutates rule definitions; concurrent edits
/// become visible on the next pass.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    pub company: CompanyProfile,
    pub rules: Vec<CollectionRule>,
    pub taken_at: DateTime<Utc>,
}

impl RuleSnapshot {
    pub fn new(company: CompanyProfile, rules: Vec<CollectionRule>, taken_at: DateTime<Utc>) -> Self {
        Self {
            company,
            rules,
            taken_at,
        }
    }

    /// Rules that participate in the automatic pass.
    pub fn automatic_rules(&self) -> Vec<&CollectionRule> {
        self.rules
            .iter()
            .filter(|rule| rule.is_active && rule.execution_mode == ExecutionMode::Automatic)
            .collect()
    }

    /// Rules eligible for a manual trigger (active, any mode).
    pub fn active_rules(&self) -> Vec<&CollectionRule> {
        self.rules.iter().filter(|rule| rule.is_active).collect()
    }
}
