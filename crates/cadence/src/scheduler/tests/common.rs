use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::SchedulerConfig;
use crate::scheduler::dispatch::{
    ChannelAdapter, ChannelRegistry, Dispatcher, OutboundMessage, SendError,
};
use crate::scheduler::domain::{
    ActionType, AnchorField, ApprovalStatus, CadenceStep, CollectionRule, CompanyId,
    CompanyProfile, ContactChannels, Debt, DebtId, DebtStatus, ExecutionMode, LocaleConvention,
    RuleId,
};
use crate::scheduler::events::{EventSink, SchedulerEvent};
use crate::scheduler::ledger::InMemoryLedger;
use crate::scheduler::orchestrator::{
    CadenceOrchestrator, DebtSource, RuleSource, SourceError,
};

pub(crate) fn company() -> CompanyProfile {
    CompanyProfile {
        id: CompanyId("co-1".to_string()),
        name: "Acme Cobranças".to_string(),
        utc_offset_minutes: -180,
        locale: LocaleConvention::PtBr,
    }
}

pub(crate) fn step(order: u32, days_after_due: u32, action: ActionType) -> CadenceStep {
    CadenceStep {
        step_order: order,
        days_after_due,
        action_type: action,
        template_subject: action
            .requires_subject()
            .then(|| "Pagamento pendente".to_string()),
        template_content: "Olá {customer_name}, sua fatura de {amount} venceu em {due_date}."
            .to_string(),
        execution_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
        is_enabled: true,
    }
}

/// Three-step cadence: email on day 0, SMS on day 3, automated call on
/// day 7, all at 09:00 company-local.
pub(crate) fn rule(id: &str, anchor: AnchorField) -> CollectionRule {
    CollectionRule {
        id: RuleId(id.to_string()),
        company_id: CompanyId("co-1".to_string()),
        name: format!("cadence {id}"),
        description: None,
        is_active: true,
        execution_mode: ExecutionMode::Automatic,
        start_date_field: anchor,
        is_default_for_company: false,
        requires_approval_status: vec![ApprovalStatus("ACEITA".to_string())],
        created_at: Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp"),
        steps: vec![
            step(1, 0, ActionType::Email),
            step(2, 3, ActionType::Sms),
            step(3, 7, ActionType::AutomaticCall),
        ],
    }
}

pub(crate) fn debt(id: &str) -> Debt {
    Debt {
        id: DebtId(id.to_string()),
        company_id: CompanyId("co-1".to_string()),
        customer_name: "Ana Souza".to_string(),
        contact: ContactChannels {
            email: Some("ana@example.com".to_string()),
            phone: Some("+5511999990000".to_string()),
        },
        amount_cents: 123_456,
        due_date: NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date"),
        first_overdue_date: NaiveDate::from_ymd_opt(2024, 2, 2),
        analysis_date: NaiveDate::from_ymd_opt(2024, 2, 5),
        approval_status: ApprovalStatus("ACEITA".to_string()),
        status: DebtStatus::Overdue,
    }
}

/// UTC instant at which the co-1 wall clock (UTC-3) reads noon.
pub(crate) fn local_noon(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(15, 0, 0).expect("valid time"))
}

#[derive(Default)]
pub(crate) struct MemoryEvents {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl MemoryEvents {
    pub(crate) fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl EventSink for MemoryEvents {
    fn publish(&self, event: SchedulerEvent) {
        self.events.lock().expect("event mutex poisoned").push(event);
    }
}

#[derive(Default)]
pub(crate) struct MemoryRules {
    pub(crate) companies: Vec<CompanyProfile>,
    pub(crate) rules: HashMap<CompanyId, Vec<CollectionRule>>,
}

impl MemoryRules {
    pub(crate) fn single(company: CompanyProfile, rules: Vec<CollectionRule>) -> Self {
        let mut map = HashMap::new();
        map.insert(company.id.clone(), rules);
        Self {
            companies: vec![company],
            rules: map,
        }
    }
}

impl RuleSource for MemoryRules {
    fn companies(&self) -> Result<Vec<CompanyProfile>, SourceError> {
        Ok(self.companies.clone())
    }

    fn rules_for(&self, company: &CompanyId) -> Result<Vec<CollectionRule>, SourceError> {
        Ok(self.rules.get(company).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct MemoryDebts {
    pub(crate) debts: Vec<Debt>,
}

impl DebtSource for MemoryDebts {
    fn open_debts(&self, company: &CompanyId) -> Result<Vec<Debt>, SourceError> {
        Ok(self
            .debts
            .iter()
            .filter(|debt| debt.company_id == *company)
            .cloned()
            .collect())
    }

    fn debt(&self, id: &DebtId) -> Result<Option<Debt>, SourceError> {
        Ok(self.debts.iter().find(|debt| debt.id == *id).cloned())
    }
}

#[derive(Default)]
pub(crate) struct RecordingAdapter {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingAdapter {
    pub(crate) fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("adapter mutex poisoned").clone()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        self.sent
            .lock()
            .expect("adapter mutex poisoned")
            .push(message.clone());
        Ok(())
    }
}

/// Fails with a transient error a fixed number of times, then delivers.
pub(crate) struct FlakyAdapter {
    remaining_failures: AtomicU32,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl FlakyAdapter {
    pub(crate) fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("adapter mutex poisoned").clone()
    }
}

#[async_trait]
impl ChannelAdapter for FlakyAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SendError::Transient("gateway timeout".to_string()));
        }
        self.sent
            .lock()
            .expect("adapter mutex poisoned")
            .push(message.clone());
        Ok(())
    }
}

pub(crate) struct RejectingAdapter;

#[async_trait]
impl ChannelAdapter for RejectingAdapter {
    async fn send(&self, _message: &OutboundMessage) -> Result<(), SendError> {
        Err(SendError::Permanent("recipient opted out".to_string()))
    }
}

/// One recording adapter wired behind every channel.
pub(crate) fn recording_registry() -> (ChannelRegistry, Arc<RecordingAdapter>) {
    let adapter = Arc::new(RecordingAdapter::default());
    let registry = registry_with(adapter.clone());
    (registry, adapter)
}

pub(crate) fn registry_with(adapter: Arc<dyn ChannelAdapter>) -> ChannelRegistry {
    ChannelRegistry::new()
        .register(ActionType::Email, adapter.clone())
        .register(ActionType::Sms, adapter.clone())
        .register(ActionType::WhatsApp, adapter.clone())
        .register(ActionType::AutomaticCall, adapter.clone())
        .register(ActionType::HumanCall, adapter)
}

/// Tight backoff and small budgets keep the retry tests fast.
pub(crate) fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_secs: 300,
        company_concurrency: 2,
        debt_concurrency: 4,
        max_dispatch_attempts: 3,
        max_step_attempts: 4,
        backoff_base_ms: 1,
        claim_timeout_secs: 900,
    }
}

pub(crate) type TestOrchestrator =
    CadenceOrchestrator<MemoryRules, MemoryDebts, InMemoryLedger, MemoryEvents>;

pub(crate) struct Harness {
    pub(crate) orchestrator: TestOrchestrator,
    pub(crate) ledger: Arc<InMemoryLedger>,
    pub(crate) events: Arc<MemoryEvents>,
}

pub(crate) fn harness(
    rules: MemoryRules,
    debts: MemoryDebts,
    registry: ChannelRegistry,
) -> Harness {
    harness_with_config(test_config(), rules, debts, registry)
}

pub(crate) fn harness_with_config(
    config: SchedulerConfig,
    rules: MemoryRules,
    debts: MemoryDebts,
    registry: ChannelRegistry,
) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new(config.max_step_attempts));
    let events = Arc::new(MemoryEvents::default());
    let dispatcher = Dispatcher::new(registry, config.max_dispatch_attempts, config.backoff_base());
    let orchestrator = CadenceOrchestrator::new(
        Arc::new(rules),
        Arc::new(debts),
        ledger.clone(),
        events.clone(),
        dispatcher,
        config,
    );
    Harness {
        orchestrator,
        ledger,
        events,
    }
}

pub(crate) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
