use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{info, warn};

use cadence::config::SchedulerConfig;
use cadence::error::AppError;
use cadence::scheduler::{
    ActionType, AnchorField, ApprovalStatus, CadenceOrchestrator, CadenceStep, ChannelAdapter,
    ChannelRegistry, CollectionRule, CompanyId, CompanyProfile, ContactChannels, Debt, DebtId,
    DebtSource, DebtStatus, Dispatcher, EventSink, ExecutionMode, InMemoryLedger,
    LocaleConvention, OutboundMessage, RuleId, RuleSource, SchedulerEvent, SendError, SourceError,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Rule definitions held in memory, loaded once at startup from CSV or
/// the demo portfolio.
#[derive(Debug)]
pub(crate) struct InMemoryRuleSource {
    companies: Vec<CompanyProfile>,
    rules: HashMap<CompanyId, Vec<CollectionRule>>,
}

impl RuleSource for InMemoryRuleSource {
    fn companies(&self) -> Result<Vec<CompanyProfile>, SourceError> {
        Ok(self.companies.clone())
    }

    fn rules_for(&self, company: &CompanyId) -> Result<Vec<CollectionRule>, SourceError> {
        Ok(self.rules.get(company).cloned().unwrap_or_default())
    }
}

#[derive(Debug)]
pub(crate) struct InMemoryDebtSource {
    debts: Vec<Debt>,
}

impl DebtSource for InMemoryDebtSource {
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

/// Scheduler warnings land on the tracing stream as structured warnings.
#[derive(Default)]
pub(crate) struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: SchedulerEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => warn!(event = %payload, "scheduler warning"),
            Err(_) => warn!(?event, "scheduler warning"),
        }
    }
}

/// Stand-in gateway adapter: logs the delivery instead of calling an
/// external provider.
pub(crate) struct LoggingChannelAdapter {
    channel: &'static str,
}

impl LoggingChannelAdapter {
    pub(crate) fn new(action: ActionType) -> Arc<Self> {
        Arc::new(Self {
            channel: action.label(),
        })
    }
}

#[async_trait]
impl ChannelAdapter for LoggingChannelAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        info!(
            channel = self.channel,
            debt = %message.debt_id.0,
            contact = message.contact.address(),
            subject = message.subject.as_deref().unwrap_or(""),
            "outbound message delivered"
        );
        Ok(())
    }
}

pub(crate) fn channel_registry() -> ChannelRegistry {
    let actions = [
        ActionType::Email,
        ActionType::Sms,
        ActionType::WhatsApp,
        ActionType::AutomaticCall,
        ActionType::HumanCall,
    ];
    actions.into_iter().fold(ChannelRegistry::new(), |registry, action| {
        registry.register(action, LoggingChannelAdapter::new(action))
    })
}

pub(crate) type ApiOrchestrator =
    CadenceOrchestrator<InMemoryRuleSource, InMemoryDebtSource, InMemoryLedger, TracingEventSink>;

pub(crate) fn build_orchestrator(
    config: &SchedulerConfig,
    rules: InMemoryRuleSource,
    debts: InMemoryDebtSource,
) -> Arc<ApiOrchestrator> {
    let ledger = Arc::new(InMemoryLedger::new(config.max_step_attempts));
    let dispatcher = Dispatcher::new(
        channel_registry(),
        config.max_dispatch_attempts,
        config.backoff_base(),
    );
    Arc::new(CadenceOrchestrator::new(
        Arc::new(rules),
        Arc::new(debts),
        ledger,
        Arc::new(TracingEventSink),
        dispatcher,
        config.clone(),
    ))
}

// --- CSV loading -----------------------------------------------------------
//
// rules.csv carries one row per cadence step; rule-level columns repeat on
// every row of the same rule and the first row wins.

#[derive(Debug, Deserialize)]
struct CompanyRow {
    id: String,
    name: String,
    utc_offset_minutes: i32,
    locale: String,
}

#[derive(Debug, Deserialize)]
struct RuleStepRow {
    rule_id: String,
    company_id: String,
    rule_name: String,
    is_active: bool,
    execution_mode: String,
    anchor_field: String,
    is_default: bool,
    /// Pipe-separated approval labels; empty means unrestricted.
    approval_statuses: Option<String>,
    created_at: DateTime<Utc>,
    step_order: u32,
    days_after_due: u32,
    action_type: String,
    template_subject: Option<String>,
    template_content: String,
    execution_time: Option<String>,
    is_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct DebtRow {
    id: String,
    company_id: String,
    customer_name: String,
    email: Option<String>,
    phone: Option<String>,
    amount_cents: i64,
    due_date: NaiveDate,
    first_overdue_date: Option<NaiveDate>,
    analysis_date: Option<NaiveDate>,
    approval_status: String,
    status: String,
}

pub(crate) fn load_sources(
    dir: &Path,
) -> Result<(InMemoryRuleSource, InMemoryDebtSource), AppError> {
    let companies = load_companies(&dir.join("companies.csv"))?;
    let rules = load_rules(&dir.join("rules.csv"))?;
    let debts = load_debts(&dir.join("debts.csv"))?;

    let mut by_company: HashMap<CompanyId, Vec<CollectionRule>> = HashMap::new();
    for rule in rules {
        by_company.entry(rule.company_id.clone()).or_default().push(rule);
    }

    info!(
        companies = companies.len(),
        rules = by_company.values().map(Vec::len).sum::<usize>(),
        debts = debts.len(),
        "loaded cadence data"
    );

    Ok((
        InMemoryRuleSource {
            companies,
            rules: by_company,
        },
        InMemoryDebtSource { debts },
    ))
}

fn load_companies(path: &Path) -> Result<Vec<CompanyProfile>, AppError> {
    let mut reader = csv::Reader::from_path(path).map_err(csv_error(path))?;
    let mut companies = Vec::new();
    for row in reader.deserialize::<CompanyRow>() {
        let row = row.map_err(csv_error(path))?;
        companies.push(CompanyProfile {
            id: CompanyId(row.id),
            name: row.name,
            utc_offset_minutes: row.utc_offset_minutes,
            locale: parse_locale(&row.locale)?,
        });
    }
    Ok(companies)
}

fn load_rules(path: &Path) -> Result<Vec<CollectionRule>, AppError> {
    let mut reader = csv::Reader::from_path(path).map_err(csv_error(path))?;
    let mut rules: HashMap<RuleId, CollectionRule> = HashMap::new();
    let mut order: Vec<RuleId> = Vec::new();

    for row in reader.deserialize::<RuleStepRow>() {
        let row = row.map_err(csv_error(path))?;
        let rule_id = RuleId(row.rule_id.clone());
        let step = CadenceStep {
            step_order: row.step_order,
            days_after_due: row.days_after_due,
            action_type: parse_action(&row.action_type)?,
            template_subject: row.template_subject.filter(|subject| !subject.is_empty()),
            template_content: row.template_content,
            execution_time: parse_execution_time(row.execution_time.as_deref())?,
            is_enabled: row.is_enabled,
        };

        match rules.entry(rule_id.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().steps.push(step),
            Entry::Vacant(entry) => {
                order.push(rule_id.clone());
                entry.insert(CollectionRule {
                    id: rule_id,
                    company_id: CompanyId(row.company_id),
                    name: row.rule_name,
                    description: None,
                    is_active: row.is_active,
                    execution_mode: parse_execution_mode(&row.execution_mode)?,
                    start_date_field: parse_anchor(&row.anchor_field)?,
                    is_default_for_company: row.is_default,
                    requires_approval_status: parse_approvals(row.approval_statuses.as_deref()),
                    created_at: row.created_at,
                    steps: vec![step],
                });
            }
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|id| rules.remove(&id))
        .collect())
}

fn load_debts(path: &Path) -> Result<Vec<Debt>, AppError> {
    let mut reader = csv::Reader::from_path(path).map_err(csv_error(path))?;
    let mut debts = Vec::new();
    for row in reader.deserialize::<DebtRow>() {
        let row = row.map_err(csv_error(path))?;
        debts.push(Debt {
            id: DebtId(row.id),
            company_id: CompanyId(row.company_id),
            customer_name: row.customer_name,
            contact: ContactChannels {
                email: row.email.filter(|email| !email.is_empty()),
                phone: row.phone.filter(|phone| !phone.is_empty()),
            },
            amount_cents: row.amount_cents,
            due_date: row.due_date,
            first_overdue_date: row.first_overdue_date,
            analysis_date: row.analysis_date,
            approval_status: ApprovalStatus(row.approval_status),
            status: parse_debt_status(&row.status)?,
        });
    }
    Ok(debts)
}

fn csv_error(path: &Path) -> impl Fn(csv::Error) -> AppError + '_ {
    move |err| AppError::Startup(format!("failed to read {}: {err}", path.display()))
}

fn parse_locale(raw: &str) -> Result<LocaleConvention, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pt_br" | "pt-br" => Ok(LocaleConvention::PtBr),
        "en_us" | "en-us" => Ok(LocaleConvention::EnUs),
        other => Err(AppError::Startup(format!("unknown locale '{other}'"))),
    }
}

fn parse_execution_mode(raw: &str) -> Result<ExecutionMode, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "automatic" => Ok(ExecutionMode::Automatic),
        "manual" => Ok(ExecutionMode::Manual),
        other => Err(AppError::Startup(format!("unknown execution mode '{other}'"))),
    }
}

fn parse_anchor(raw: &str) -> Result<AnchorField, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "due_date" => Ok(AnchorField::DueDate),
        "first_overdue" => Ok(AnchorField::FirstOverdue),
        "analysis_date" => Ok(AnchorField::AnalysisDate),
        other => Err(AppError::Startup(format!("unknown anchor field '{other}'"))),
    }
}

fn parse_action(raw: &str) -> Result<ActionType, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "email" => Ok(ActionType::Email),
        "sms" => Ok(ActionType::Sms),
        "whatsapp" => Ok(ActionType::WhatsApp),
        "automatic_call" => Ok(ActionType::AutomaticCall),
        "human_call" => Ok(ActionType::HumanCall),
        other => Err(AppError::Startup(format!("unknown action type '{other}'"))),
    }
}

fn parse_debt_status(raw: &str) -> Result<DebtStatus, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "open" => Ok(DebtStatus::Open),
        "overdue" => Ok(DebtStatus::Overdue),
        "in_collection" => Ok(DebtStatus::InCollection),
        "in_negotiation" => Ok(DebtStatus::InNegotiation),
        "paid" => Ok(DebtStatus::Paid),
        "cancelled" => Ok(DebtStatus::Cancelled),
        other => Err(AppError::Startup(format!("unknown debt status '{other}'"))),
    }
}

fn parse_approvals(raw: Option<&str>) -> Vec<ApprovalStatus> {
    raw.unwrap_or_default()
        .split('|')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(|label| ApprovalStatus(label.to_string()))
        .collect()
}

fn parse_execution_time(raw: Option<&str>) -> Result<NaiveTime, AppError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(NaiveTime::from_hms_opt(9, 0, 0).expect("valid default time")),
        Some(value) => NaiveTime::parse_from_str(value, "%H:%M:%S")
            .map_err(|err| AppError::Startup(format!("invalid execution time '{value}': {err}"))),
    }
}

pub(crate) fn parse_cli_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

// --- Demo portfolio --------------------------------------------------------

fn demo_step(
    order: u32,
    days_after_due: u32,
    action: ActionType,
    content: &str,
) -> CadenceStep {
    CadenceStep {
        step_order: order,
        days_after_due,
        action_type: action,
        template_subject: matches!(action, ActionType::Email)
            .then(|| "Pagamento pendente - {due_date}".to_string()),
        template_content: content.to_string(),
        execution_time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
        is_enabled: true,
    }
}

/// Small self-contained portfolio: one company, one default cadence, and
/// debts exercising the interesting paths (happy, missing email, settled).
pub(crate) fn demo_sources() -> (InMemoryRuleSource, InMemoryDebtSource) {
    let company = CompanyProfile {
        id: CompanyId("co-demo".to_string()),
        name: "Demo Cobranças Ltda".to_string(),
        utc_offset_minutes: -180,
        locale: LocaleConvention::PtBr,
    };

    let rule = CollectionRule {
        id: RuleId("rule-standard".to_string()),
        company_id: company.id.clone(),
        name: "standard cadence".to_string(),
        description: Some("email, SMS, then an automated call".to_string()),
        is_active: true,
        execution_mode: ExecutionMode::Automatic,
        start_date_field: AnchorField::DueDate,
        is_default_for_company: true,
        requires_approval_status: vec![
            ApprovalStatus("ACEITA".to_string()),
            ApprovalStatus("ACEITA_ESPECIAL".to_string()),
        ],
        created_at: Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp"),
        steps: vec![
            demo_step(
                1,
                0,
                ActionType::Email,
                "Olá {customer_name}, sua fatura de {amount} venceu em {due_date}.",
            ),
            demo_step(
                2,
                3,
                ActionType::Sms,
                "{customer_name}, fatura de {amount} em aberto há {days_overdue} dias.",
            ),
            demo_step(
                3,
                7,
                ActionType::AutomaticCall,
                "Cobrança automática: fatura de {amount} vencida em {due_date}.",
            ),
        ],
    };

    let debt = |id: &str, name: &str, email: Option<&str>, status: DebtStatus| Debt {
        id: DebtId(id.to_string()),
        company_id: CompanyId("co-demo".to_string()),
        customer_name: name.to_string(),
        contact: ContactChannels {
            email: email.map(str::to_string),
            phone: Some("+5511999990000".to_string()),
        },
        amount_cents: 157_890,
        due_date: NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date"),
        first_overdue_date: NaiveDate::from_ymd_opt(2024, 2, 2),
        analysis_date: None,
        approval_status: ApprovalStatus("ACEITA".to_string()),
        status,
    };

    let debts = vec![
        debt("debt-1001", "Ana Souza", Some("ana@example.com"), DebtStatus::Overdue),
        debt("debt-1002", "Bruno Lima", None, DebtStatus::InCollection),
        debt("debt-1003", "Carla Prado", Some("carla@example.com"), DebtStatus::Paid),
    ];

    let mut rules = HashMap::new();
    rules.insert(company.id.clone(), vec![rule]);

    (
        InMemoryRuleSource {
            companies: vec![company],
            rules,
        },
        InMemoryDebtSource { debts },
    )
}
