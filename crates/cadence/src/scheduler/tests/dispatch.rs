use std::sync::Arc;
use std::time::Duration;

use super::common::{debt, FlakyAdapter, RecordingAdapter, RejectingAdapter};
use crate::scheduler::dispatch::{
    ChannelRegistry, DispatchResult, Dispatcher, OutboundMessage,
};
use crate::scheduler::domain::{ActionType, CompanyId, ContactPoint};

fn message(action: ActionType) -> OutboundMessage {
    let debt = debt("d-1");
    OutboundMessage {
        debt_id: debt.id,
        company_id: CompanyId("co-1".to_string()),
        action,
        contact: ContactPoint::Email("ana@example.com".to_string()),
        subject: Some("Pagamento pendente".to_string()),
        body: "Olá Ana".to_string(),
    }
}

fn dispatcher(registry: ChannelRegistry, max_attempts: u32) -> Dispatcher {
    Dispatcher::new(registry, max_attempts, Duration::from_millis(1))
}

#[tokio::test]
async fn first_attempt_success_consumes_one_attempt() {
    let adapter = Arc::new(RecordingAdapter::default());
    let registry = ChannelRegistry::new().register(ActionType::Email, adapter.clone());

    let result = dispatcher(registry, 3).dispatch(&message(ActionType::Email)).await;
    assert_eq!(result, DispatchResult::Sent { attempts: 1 });
    assert_eq!(adapter.sent().len(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let adapter = Arc::new(FlakyAdapter::new(2));
    let registry = ChannelRegistry::new().register(ActionType::Email, adapter.clone());

    let result = dispatcher(registry, 5).dispatch(&message(ActionType::Email)).await;
    assert_eq!(result, DispatchResult::Sent { attempts: 3 });
    assert_eq!(adapter.sent().len(), 1);
}

#[tokio::test]
async fn transient_failures_stop_at_the_attempt_budget() {
    let adapter = Arc::new(FlakyAdapter::new(10));
    let registry = ChannelRegistry::new().register(ActionType::Email, adapter.clone());

    let result = dispatcher(registry, 3).dispatch(&message(ActionType::Email)).await;
    assert_eq!(
        result,
        DispatchResult::Failed {
            attempts: 3,
            reason: "gateway timeout".to_string(),
            permanent: false,
        }
    );
    assert!(adapter.sent().is_empty());
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let registry = ChannelRegistry::new().register(ActionType::Sms, Arc::new(RejectingAdapter));

    let result = dispatcher(registry, 5).dispatch(&message(ActionType::Sms)).await;
    assert_eq!(
        result,
        DispatchResult::Failed {
            attempts: 1,
            reason: "recipient opted out".to_string(),
            permanent: true,
        }
    );
}

#[tokio::test]
async fn unregistered_channel_fails_permanently() {
    let registry = ChannelRegistry::new();
    let result = dispatcher(registry, 5)
        .dispatch(&message(ActionType::WhatsApp))
        .await;
    assert!(matches!(
        result,
        DispatchResult::Failed {
            attempts: 1,
            permanent: true,
            ..
        }
    ));
}
