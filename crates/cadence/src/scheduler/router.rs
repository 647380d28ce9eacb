use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::domain::{CompanyId, DebtId, RuleId};
use super::events::EventSink;
use super::ledger::{ExecutionLedger, ExecutionOutcome, ExecutionQuery};
use super::orchestrator::{CadenceOrchestrator, DebtSource, RuleSource, TriggerError};

/// Router builder exposing the manual-trigger surface and the read-only
/// audit views consumed by dashboards.
pub fn cadence_router<R, D, L, E>(orchestrator: Arc<CadenceOrchestrator<R, D, L, E>>) -> Router
where
    R: RuleSource + 'static,
    D: DebtSource + 'static,
    L: ExecutionLedger + 'static,
    E: EventSink + 'static,
{
    Router::new()
        .route("/api/v1/cadence/pass", post(run_pass_handler::<R, D, L, E>))
        .route(
            "/api/v1/cadence/rules/:rule_id/run",
            post(run_rule_handler::<R, D, L, E>),
        )
        .route(
            "/api/v1/cadence/rules/:rule_id/runs",
            get(rule_runs_handler::<R, D, L, E>),
        )
        .route(
            "/api/v1/cadence/debts/:debt_id/run",
            post(run_debt_handler::<R, D, L, E>),
        )
        .route(
            "/api/v1/cadence/executions",
            get(executions_handler::<R, D, L, E>),
        )
        .with_state(orchestrator)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TriggerRequest {
    pub(crate) as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RuleTriggerRequest {
    pub(crate) company_id: String,
    pub(crate) as_of: Option<DateTime<Utc>>,
}

pub(crate) async fn run_pass_handler<R, D, L, E>(
    State(orchestrator): State<Arc<CadenceOrchestrator<R, D, L, E>>>,
    payload: Option<axum::Json<TriggerRequest>>,
) -> Response
where
    R: RuleSource + 'static,
    D: DebtSource + 'static,
    L: ExecutionLedger + 'static,
    E: EventSink + 'static,
{
    let as_of = payload
        .and_then(|axum::Json(request)| request.as_of)
        .unwrap_or_else(Utc::now);

    match orchestrator.run_pass(as_of).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::BAD_GATEWAY, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn run_rule_handler<R, D, L, E>(
    State(orchestrator): State<Arc<CadenceOrchestrator<R, D, L, E>>>,
    Path(rule_id): Path<String>,
    axum::Json(request): axum::Json<RuleTriggerRequest>,
) -> Response
where
    R: RuleSource + 'static,
    D: DebtSource + 'static,
    L: ExecutionLedger + 'static,
    E: EventSink + 'static,
{
    let rule_id = RuleId(rule_id);
    let company_id = CompanyId(request.company_id);
    let as_of = request.as_of.unwrap_or_else(Utc::now);

    match orchestrator.run_rule(&rule_id, &company_id, as_of).await {
        Ok(outcomes) => (StatusCode::OK, axum::Json(outcomes)).into_response(),
        Err(err) => trigger_error_response(err),
    }
}

pub(crate) async fn run_debt_handler<R, D, L, E>(
    State(orchestrator): State<Arc<CadenceOrchestrator<R, D, L, E>>>,
    Path(debt_id): Path<String>,
    payload: Option<axum::Json<TriggerRequest>>,
) -> Response
where
    R: RuleSource + 'static,
    D: DebtSource + 'static,
    L: ExecutionLedger + 'static,
    E: EventSink + 'static,
{
    let debt_id = DebtId(debt_id);
    let as_of = payload
        .and_then(|axum::Json(request)| request.as_of)
        .unwrap_or_else(Utc::now);

    match orchestrator.run_debt(&debt_id, as_of).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => trigger_error_response(err),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExecutionQueryParams {
    pub(crate) debt_id: Option<String>,
    pub(crate) rule_id: Option<String>,
    pub(crate) outcome: Option<String>,
    pub(crate) from: Option<DateTime<Utc>>,
    pub(crate) to: Option<DateTime<Utc>>,
}

pub(crate) async fn executions_handler<R, D, L, E>(
    State(orchestrator): State<Arc<CadenceOrchestrator<R, D, L, E>>>,
    Query(params): Query<ExecutionQueryParams>,
) -> Response
where
    R: RuleSource + 'static,
    D: DebtSource + 'static,
    L: ExecutionLedger + 'static,
    E: EventSink + 'static,
{
    let outcome = match params.outcome.as_deref() {
        None => None,
        Some("pending") => Some(ExecutionOutcome::Pending),
        Some("sent") => Some(ExecutionOutcome::Sent),
        Some("failed") => Some(ExecutionOutcome::Failed),
        Some("skipped") => Some(ExecutionOutcome::Skipped),
        Some(other) => {
            let payload = json!({ "error": format!("unknown outcome filter '{other}'") });
            return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
        }
    };

    let query = ExecutionQuery {
        debt_id: params.debt_id.map(DebtId),
        rule_id: params.rule_id.map(RuleId),
        outcome,
        from: params.from,
        to: params.to,
    };

    let records = orchestrator.ledger().query(&query);
    (StatusCode::OK, axum::Json(records)).into_response()
}

pub(crate) async fn rule_runs_handler<R, D, L, E>(
    State(orchestrator): State<Arc<CadenceOrchestrator<R, D, L, E>>>,
    Path(rule_id): Path<String>,
) -> Response
where
    R: RuleSource + 'static,
    D: DebtSource + 'static,
    L: ExecutionLedger + 'static,
    E: EventSink + 'static,
{
    let rule_id = RuleId(rule_id);
    let runs = orchestrator.ledger().rule_runs(&rule_id);
    let last_execution_at = orchestrator.ledger().last_execution_at(&rule_id);
    let payload = json!({
        "rule_id": rule_id.0,
        "last_execution_at": last_execution_at,
        "runs": runs,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

fn trigger_error_response(err: TriggerError) -> Response {
    let status = match &err {
        TriggerError::Source(_) => StatusCode::BAD_GATEWAY,
        TriggerError::UnknownCompany(_)
        | TriggerError::UnknownRule(_)
        | TriggerError::UnknownDebt(_) => StatusCode::NOT_FOUND,
    };
    let payload = json!({ "error": err.to_string() });
    (status, axum::Json(payload)).into_response()
}
