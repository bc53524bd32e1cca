//! Cancellation, watchdogs and identity matching.

mod common;

use biogate_core::{ClientToken, RequestId, SensorProperties, TemplateId};
use biogate_hal::HalReply;
use biogate_hal::mock::ReplyMode;
use biogate_scheduler::{
    CancelReason, OperationError, OperationOutcome, OperationResult, ProviderConfig,
};
use biogate_storage::TemplateStore;
use common::{SENSOR, TestProvider, eventually, finished, hat, outcome, request};
use std::time::Duration;

fn manual() -> TestProvider {
    let provider = TestProvider::start();
    provider.mock.set_reply_mode(ReplyMode::Manual);
    provider
}

#[tokio::test]
async fn test_cancel_queued_operation_never_reaches_driver() {
    let provider = manual();
    let mut first = provider.handle.authenticate(request(), 1, false).unwrap();
    let mut second = provider.handle.authenticate(request(), 2, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    provider
        .handle
        .cancel_authentication(SENSOR, second.token, second.request_id)
        .unwrap();

    let completion = finished(&mut second.events).await;
    assert_eq!(
        completion.outcome,
        OperationOutcome::Cancelled(CancelReason::Caller)
    );
    assert!(completion.cancel_requested);
    assert!(provider.mock.cancels().is_empty());

    provider
        .mock
        .reply_to_last(HalReply::Authenticated {
            template_id: TemplateId::new(1),
        })
        .unwrap();
    assert!(outcome(&mut first.events).await.is_success());
    provider.idle().await;
    assert_eq!(provider.mock.request_count("authenticate"), 1);
}

#[tokio::test]
async fn test_cancel_active_is_idempotent() {
    let provider = manual();
    let mut auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    for _ in 0..3 {
        provider
            .handle
            .cancel_authentication(SENSOR, auth.token, auth.request_id)
            .unwrap();
    }

    assert_eq!(
        outcome(&mut auth.events).await,
        OperationOutcome::Cancelled(CancelReason::Caller)
    );
    provider.barrier().await;
    assert_eq!(provider.mock.cancels().len(), 1);
}

#[tokio::test]
async fn test_cancel_requires_matching_identity_and_kind() {
    let provider = manual();
    let mut auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    // Wrong token, wrong request id, wrong kind
    provider
        .handle
        .cancel_authentication(SENSOR, ClientToken::new(), auth.request_id)
        .unwrap();
    provider
        .handle
        .cancel_authentication(SENSOR, auth.token, RequestId::new(9_999))
        .unwrap();
    provider
        .handle
        .cancel_enrollment(SENSOR, auth.token, auth.request_id)
        .unwrap();
    provider.barrier().await;

    assert!(provider.mock.cancels().is_empty());
    assert!(auth.events.try_recv().is_some_and(|e| matches!(
        e,
        biogate_scheduler::ClientEvent::Started(_)
    )));
    assert!(auth.events.try_recv().is_none());
}

#[tokio::test]
async fn test_cancel_enrollment() {
    let provider = manual();
    let mut enroll = provider.handle.enroll(request(), hat(), None).unwrap();
    eventually(|| provider.mock.request_count("enroll") == 1).await;

    provider
        .handle
        .cancel_enrollment(SENSOR, enroll.token, enroll.request_id)
        .unwrap();

    assert_eq!(
        outcome(&mut enroll.events).await,
        OperationOutcome::Cancelled(CancelReason::Caller)
    );
    assert!(provider.store.list(SENSOR, common::USER).unwrap().is_empty());
}

#[tokio::test]
async fn test_result_wins_over_pending_cancel() {
    let provider = manual();
    provider.mock.set_acknowledge_cancel(false);
    let mut auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    provider
        .handle
        .cancel_authentication(SENSOR, auth.token, auth.request_id)
        .unwrap();
    eventually(|| provider.mock.cancels().len() == 1).await;
    provider
        .mock
        .reply_to_last(HalReply::Authenticated {
            template_id: TemplateId::new(4),
        })
        .unwrap();

    let completion = finished(&mut auth.events).await;
    assert_eq!(
        completion.outcome,
        OperationOutcome::Success(OperationResult::Authenticated {
            template_id: TemplateId::new(4)
        })
    );
    assert!(completion.cancel_requested);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_connecting_skips_driver() {
    let provider = manual();
    provider.mock.set_connect_delay(Some(Duration::from_secs(1)));
    let mut auth = provider.handle.authenticate(request(), 1, false).unwrap();
    provider.barrier().await;

    provider
        .handle
        .cancel_authentication(SENSOR, auth.token, auth.request_id)
        .unwrap();

    assert_eq!(
        outcome(&mut auth.events).await,
        OperationOutcome::Cancelled(CancelReason::Caller)
    );
    eventually(|| provider.mock.is_connected()).await;
    provider.barrier().await;
    assert_eq!(provider.mock.request_count("authenticate"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_fails_stalled_operation() {
    let config = ProviderConfig {
        reply_timeout: Some(Duration::from_millis(200)),
        ..ProviderConfig::default()
    };
    let provider = TestProvider::with(config, vec![SensorProperties::new(SENSOR)]);
    provider.mock.set_reply_mode(ReplyMode::Manual);
    provider.mock.set_acknowledge_cancel(false);

    let mut challenge = provider.handle.generate_challenge(request()).unwrap();
    let mut next = provider.handle.generate_challenge(request()).unwrap();

    assert_eq!(
        outcome(&mut challenge.events).await,
        OperationOutcome::Failed(OperationError::Timeout { after_ms: 200 })
    );
    assert_eq!(provider.mock.cancels().len(), 1);

    // The queue moves on to the next operation
    eventually(|| provider.mock.request_count("generate_challenge") == 2).await;
    provider
        .mock
        .reply_to_last(HalReply::ChallengeGenerated { challenge: 8 })
        .unwrap();
    assert!(outcome(&mut next.events).await.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_interactive_operations_have_no_deadline() {
    let config = ProviderConfig {
        reply_timeout: Some(Duration::from_millis(200)),
        ..ProviderConfig::default()
    };
    let provider = TestProvider::with(config, vec![SensorProperties::new(SENSOR)]);
    provider.mock.set_reply_mode(ReplyMode::Manual);

    let auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let current = provider.handle.current_client(SENSOR).await.unwrap();
    assert_eq!(current.map(|c| c.request_id), Some(auth.request_id));
    assert!(provider.mock.cancels().is_empty());
}
