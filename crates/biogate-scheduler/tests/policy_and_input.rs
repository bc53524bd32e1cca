//! Foreground policy, touch routing, prepared operations and lockout.

mod common;

use biogate_core::constants::KEYGUARD_OWNER;
use biogate_core::{Cookie, LockoutMode, SensorProperties, SensorType, TemplateId};
use biogate_hal::mock::ReplyMode;
use biogate_hal::{HalReply, PointerContext};
use biogate_scheduler::{
    CancelReason, ClientRequest, OperationError, OperationOutcome, OperationResult,
    ProviderConfig,
};
use biogate_storage::TemplateStore;
use common::{APP, SENSOR, TestProvider, USER, eventually, hat, outcome, owner, request};
use std::time::Duration;

fn manual() -> TestProvider {
    let provider = TestProvider::start();
    provider.mock.set_reply_mode(ReplyMode::Manual);
    provider
}

fn udfps() -> TestProvider {
    let provider = TestProvider::with(
        ProviderConfig::default(),
        vec![SensorProperties::new(SENSOR).with_sensor_type(SensorType::UdfpsOptical)],
    );
    provider.mock.set_reply_mode(ReplyMode::Manual);
    provider
}

#[tokio::test]
async fn test_background_authentication_is_vetoed() {
    let provider = manual();
    let mut auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    provider.policy.set(Some(owner("com.example.other")));
    provider.handle.on_task_stack_changed().unwrap();

    let completion = common::finished(&mut auth.events).await;
    assert_eq!(
        completion.outcome,
        OperationOutcome::Cancelled(CancelReason::PolicyVeto)
    );
    assert_eq!(provider.mock.cancels().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_veto_reaches_authentication_waiting_for_connection() {
    let provider = manual();
    provider
        .mock
        .set_connect_delay(Some(Duration::from_millis(200)));
    let mut auth = provider.handle.authenticate(request(), 1, false).unwrap();
    let current = provider.handle.current_client(SENSOR).await.unwrap();
    assert_eq!(current.map(|c| c.request_id), Some(auth.request_id));

    provider.policy.set(Some(owner("com.example.other")));
    provider.handle.on_task_stack_changed().unwrap();

    assert_eq!(
        outcome(&mut auth.events).await,
        OperationOutcome::Cancelled(CancelReason::PolicyVeto)
    );
    eventually(|| provider.mock.is_connected()).await;
    provider.barrier().await;
    assert_eq!(provider.mock.request_count("authenticate"), 0);
    assert!(provider.mock.cancels().is_empty());
    assert!(provider.handle.current_client(SENSOR).await.unwrap().is_none());
}

#[tokio::test]
async fn test_foreground_owner_keeps_authenticating() {
    let provider = manual();
    let auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    provider.policy.set(Some(owner(APP)));
    provider.handle.on_task_stack_changed().unwrap();
    provider.barrier().await;

    assert!(provider.mock.cancels().is_empty());
    let current = provider.handle.current_client(SENSOR).await.unwrap();
    assert_eq!(current.map(|c| c.request_id), Some(auth.request_id));
}

#[tokio::test]
async fn test_trusted_and_background_clients_are_exempt() {
    let provider = manual();
    let keyguard = ClientRequest::new(SENSOR, USER, owner(KEYGUARD_OWNER));
    let _trusted = provider.handle.authenticate(keyguard, 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    provider.policy.set(Some(owner("com.example.other")));
    provider.handle.on_task_stack_changed().unwrap();
    provider.barrier().await;
    assert!(provider.mock.cancels().is_empty());

    provider
        .mock
        .reply_to_last(HalReply::Authenticated {
            template_id: TemplateId::new(1),
        })
        .unwrap();
    let _background = provider.handle.authenticate(request(), 2, true).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 2).await;

    provider.handle.on_task_stack_changed().unwrap();
    provider.barrier().await;
    assert!(provider.mock.cancels().is_empty());
}

#[tokio::test]
async fn test_no_foreground_owner_changes_nothing() {
    let provider = manual();
    let _auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    provider.handle.on_task_stack_changed().unwrap();
    provider.barrier().await;

    assert!(provider.mock.cancels().is_empty());
}

#[tokio::test]
async fn test_touch_reaches_active_operation_only() {
    let provider = udfps();
    let auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;
    let pointer = PointerContext::at(3, 120.0, 840.0);

    provider
        .handle
        .on_pointer_down(SENSOR, auth.request_id, pointer)
        .unwrap();
    provider
        .handle
        .on_pointer_up(SENSOR, auth.request_id, pointer)
        .unwrap();
    provider.handle.on_ui_ready(SENSOR, auth.request_id).unwrap();
    // Not the active operation
    provider
        .handle
        .on_pointer_down(SENSOR, biogate_core::RequestId::new(777), pointer)
        .unwrap();
    provider.barrier().await;

    assert_eq!(provider.mock.request_count("pointer_down"), 1);
    assert_eq!(provider.mock.request_count("pointer_up"), 1);
    assert_eq!(provider.mock.request_count("ui_ready"), 1);
    let last = provider.mock.requests().pop().unwrap();
    assert_eq!(last.request, biogate_hal::HalRequest::UiReady);
}

#[tokio::test]
async fn test_touch_ignored_for_non_interactive_operation() {
    let provider = udfps();
    let challenge = provider.handle.generate_challenge(request()).unwrap();
    eventually(|| provider.mock.request_count("generate_challenge") == 1).await;

    provider
        .handle
        .on_pointer_down(SENSOR, challenge.request_id, PointerContext::default())
        .unwrap();
    provider.barrier().await;

    assert_eq!(provider.mock.request_count("pointer_down"), 0);
}

#[tokio::test]
async fn test_prepared_operation_waits_for_cookie() {
    let provider = manual();
    let cookie = Cookie::new(77).unwrap();
    let mut prepared = provider
        .handle
        .authenticate(request().with_cookie(cookie), 1, false)
        .unwrap();
    let mut behind = provider.handle.generate_challenge(request()).unwrap();
    provider.barrier().await;

    assert_eq!(provider.mock.request_count("authenticate"), 0);
    assert_eq!(provider.mock.request_count("generate_challenge"), 0);
    let dump = provider.handle.dump_sensor(SENSOR).await.unwrap();
    assert_eq!(dump.scheduler.queued.len(), 2);

    // Unknown cookies release nothing
    provider
        .handle
        .start_prepared_client(SENSOR, Cookie::new(78).unwrap())
        .unwrap();
    provider
        .handle
        .start_prepared_client(SENSOR, cookie)
        .unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;

    provider
        .mock
        .reply_to_last(HalReply::Authenticated {
            template_id: TemplateId::new(2),
        })
        .unwrap();
    assert!(outcome(&mut prepared.events).await.is_success());

    eventually(|| provider.mock.request_count("generate_challenge") == 1).await;
    provider
        .mock
        .reply_to_last(HalReply::ChallengeGenerated { challenge: 1 })
        .unwrap();
    assert!(outcome(&mut behind.events).await.is_success());
}

#[tokio::test]
async fn test_lockout_blocks_authentication_until_reset() {
    let provider = manual();
    let mut auth = provider.handle.authenticate(request(), 1, false).unwrap();
    eventually(|| provider.mock.request_count("authenticate") == 1).await;
    provider
        .mock
        .reply_to_last(HalReply::AuthenticationFailed)
        .unwrap();
    provider
        .mock
        .reply_to_last(HalReply::LockoutPermanent)
        .unwrap();

    assert_eq!(
        outcome(&mut auth.events).await,
        OperationOutcome::Failed(OperationError::LockedOut {
            mode: LockoutMode::Permanent
        })
    );
    assert_eq!(
        provider.handle.lockout_mode(SENSOR, USER).await.unwrap(),
        LockoutMode::Permanent
    );

    let mut refused = provider.handle.authenticate(request(), 2, false).unwrap();
    assert!(matches!(
        outcome(&mut refused.events).await,
        OperationOutcome::Failed(OperationError::LockedOut { .. })
    ));
    assert_eq!(provider.mock.request_count("authenticate"), 1);

    let mut reset = provider.handle.reset_lockout(request(), Some(hat())).unwrap();
    eventually(|| provider.mock.request_count("reset_lockout") == 1).await;
    provider.mock.reply_to_last(HalReply::LockoutCleared).unwrap();
    assert_eq!(
        outcome(&mut reset.events).await,
        OperationOutcome::Success(OperationResult::LockoutReset)
    );
    assert_eq!(
        provider.handle.lockout_mode(SENSOR, USER).await.unwrap(),
        LockoutMode::None
    );

    let dump = provider.handle.dump_sensor(SENSOR).await.unwrap();
    let counters = serde_json::to_value(&dump.performance).unwrap();
    assert_eq!(counters["0"]["rejects"], 1);
}

#[tokio::test]
async fn test_internal_cleanup_on_request() {
    let provider = TestProvider::start();
    provider.mock.add_enrollment(SENSOR, USER, TemplateId::new(3));
    provider.store.add(SENSOR, USER, TemplateId::new(4), None).unwrap();

    let mut cleanup = provider
        .handle
        .schedule_internal_cleanup(SENSOR, USER, true)
        .unwrap();

    let OperationOutcome::Success(OperationResult::Reconciled(report)) =
        outcome(&mut cleanup.events).await
    else {
        panic!("cleanup did not reconcile");
    };
    assert_eq!(report.imported, vec![TemplateId::new(3)]);
    assert_eq!(report.removed_from_store, vec![TemplateId::new(4)]);
    assert!(report.removed_from_driver.is_empty());
    let stored: Vec<_> = provider
        .store
        .list(SENSOR, USER)
        .unwrap()
        .into_iter()
        .map(|r| r.template_id)
        .collect();
    assert_eq!(stored, vec![TemplateId::new(3)]);
}

#[tokio::test]
async fn test_dump_serializes_to_json() {
    let provider = TestProvider::start();
    let mut challenge = provider.handle.generate_challenge(request()).unwrap();
    common::finished(&mut challenge.events).await;

    let dump = provider.handle.dump().await.unwrap();
    let json = serde_json::to_value(&dump).unwrap();

    assert_eq!(json["instance_name"], "default");
    assert_eq!(json["driver_connected"], true);
    let history = &json["sensors"][0]["scheduler"]["history"];
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(
        history[0]["completion"]["operation"]["kind"],
        "generate_challenge"
    );
    assert_eq!(history[0]["completion"]["outcome"]["status"], "success");
}
