//! Property-based tests for the per-sensor scheduler.
//!
//! Random interleavings of submissions, cancels, replies, cookie releases and
//! driver deaths are fed to a bare [`Scheduler`] with a recording runner, and
//! the queue guarantees are checked after every step.

use biogate_core::{ClientToken, Cookie, OperationTag, OwnerId, RequestId, SensorId, UserId};
use biogate_hal::HalReply;
use biogate_scheduler::scheduler::{ClientRunner, ReplyAction, Scheduler, StartOutcome};
use biogate_scheduler::{
    CancelReason, ClientObserver, Completion, CompletionChain, Operation, OperationKind,
    OperationOutcome, OperationResult,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SENSOR: SensorId = SensorId::new(1);

#[derive(Debug, Clone)]
enum Action {
    Schedule { with_cookie: bool },
    Cancel(usize),
    Complete,
    AcknowledgeCancel,
    Release(usize),
    DriverDied,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => any::<bool>().prop_map(|with_cookie| Action::Schedule { with_cookie }),
        2 => any::<usize>().prop_map(Action::Cancel),
        2 => Just(Action::Complete),
        1 => Just(Action::AcknowledgeCancel),
        1 => any::<usize>().prop_map(Action::Release),
        1 => Just(Action::DriverDied),
    ]
}

/// Runner that tracks the one operation it believes is in flight.
#[derive(Default)]
struct RecordingRunner {
    active: Option<(RequestId, OperationTag)>,
    cancel_sent: Option<OperationTag>,
    started: Vec<RequestId>,
    overlap: bool,
}

impl ClientRunner for RecordingRunner {
    fn start(&mut self, operation: &mut Operation, tag: OperationTag) -> StartOutcome {
        if self.active.is_some() {
            self.overlap = true;
        }
        self.active = Some((operation.request_id, tag));
        self.started.push(operation.request_id);
        StartOutcome::Started
    }

    fn handle_reply(
        &mut self,
        _operation: &mut Operation,
        _tag: OperationTag,
        reply: HalReply,
    ) -> ReplyAction {
        match reply {
            HalReply::ChallengeGenerated { challenge } => ReplyAction::Finished(
                OperationOutcome::Success(OperationResult::ChallengeGenerated { challenge }),
            ),
            _ => ReplyAction::Finished(OperationOutcome::Cancelled(CancelReason::Caller)),
        }
    }

    fn cancel(&mut self, _operation: &Operation, tag: OperationTag) {
        self.cancel_sent = Some(tag);
    }

    fn on_finished(&mut self, operation: &Operation, _completion: &Completion) {
        if self.active.map(|(id, _)| id) == Some(operation.request_id) {
            self.active = None;
            self.cancel_sent = None;
        }
    }
}

struct Counting(Arc<Mutex<HashMap<RequestId, u32>>>);

impl ClientObserver for Counting {
    fn on_finished(&mut self, completion: &Completion) {
        *self
            .0
            .lock()
            .unwrap()
            .entry(completion.operation.request_id)
            .or_default() += 1;
    }
}

struct Submitted {
    token: ClientToken,
    request_id: RequestId,
    cookie: Option<Cookie>,
}

fn run(actions: Vec<Action>) -> Result<(), TestCaseError> {
    let mut scheduler = Scheduler::new(SENSOR, 8);
    let mut runner = RecordingRunner::default();
    let completions = Arc::new(Mutex::new(HashMap::new()));
    let mut submitted: Vec<Submitted> = Vec::new();

    for action in actions {
        match action {
            Action::Schedule { with_cookie } => {
                let request_id = RequestId::new(submitted.len() as u64 + 1);
                let token = ClientToken::new();
                let cookie = with_cookie
                    .then(|| Cookie::new(request_id.as_u64() as u32).unwrap());
                let mut operation = Operation::new(
                    request_id,
                    token,
                    OwnerId::new("com.example.app").unwrap(),
                    SENSOR,
                    UserId::new(0),
                    OperationKind::Authenticate {
                        operation_id: 0,
                        allow_background: false,
                    },
                );
                operation.cookie = cookie;
                let chain = CompletionChain::new()
                    .with(Box::new(Counting(Arc::clone(&completions))));
                scheduler.schedule(operation, chain, &mut runner);
                submitted.push(Submitted {
                    token,
                    request_id,
                    cookie,
                });
            }
            Action::Cancel(index) if !submitted.is_empty() => {
                let target = &submitted[index % submitted.len()];
                scheduler.cancel_authentication_or_detection(
                    &target.token,
                    target.request_id,
                    &mut runner,
                );
            }
            Action::Complete => {
                if let Some((_, tag)) = runner.active {
                    scheduler.on_reply(
                        Some(tag),
                        HalReply::ChallengeGenerated { challenge: 1 },
                        &mut runner,
                    );
                }
            }
            Action::AcknowledgeCancel => {
                if let Some(tag) = runner.cancel_sent {
                    scheduler.on_reply(Some(tag), HalReply::canceled(), &mut runner);
                }
            }
            Action::Release(index) if !submitted.is_empty() => {
                if let Some(cookie) = submitted[index % submitted.len()].cookie {
                    scheduler.start_prepared_client(cookie, &mut runner);
                }
            }
            Action::DriverDied => {
                scheduler.on_driver_died(&mut runner);
            }
            Action::Cancel(_) | Action::Release(_) => {}
        }

        prop_assert!(!runner.overlap, "two operations in flight at once");
        prop_assert_eq!(
            scheduler.current_client().map(|c| c.request_id),
            runner.active.map(|(id, _)| id)
        );
        prop_assert!(
            completions.lock().unwrap().values().all(|count| *count == 1),
            "an operation completed more than once"
        );
    }

    // Operations start in submission order, skipping the cancelled ones
    prop_assert!(runner.started.windows(2).all(|w| w[0] < w[1]));

    scheduler.on_driver_died(&mut runner);
    prop_assert!(scheduler.is_idle());
    let completions = completions.lock().unwrap();
    prop_assert_eq!(completions.len(), submitted.len());
    prop_assert!(completions.values().all(|count| *count == 1));
    prop_assert_eq!(scheduler.completed_count(), submitted.len() as u64);
    Ok(())
}

proptest! {
    /// Property: every accepted operation completes exactly once, at most one
    /// is ever in flight, and starts follow submission order.
    #[test]
    fn prop_scheduler_queue_guarantees(actions in prop::collection::vec(action(), 1..60)) {
        run(actions)?;
    }

    /// Property: the history ring never grows past its capacity.
    #[test]
    fn prop_history_is_bounded(capacity in 0usize..5, count in 0usize..20) {
        let mut scheduler = Scheduler::new(SENSOR, capacity);
        let mut runner = RecordingRunner::default();
        for i in 0..count {
            let operation = Operation::new(
                RequestId::new(i as u64 + 1),
                ClientToken::new(),
                OwnerId::new("com.example.app").unwrap(),
                SENSOR,
                UserId::new(0),
                OperationKind::GenerateChallenge,
            );
            scheduler.schedule(operation, CompletionChain::new(), &mut runner);
            if let Some((_, tag)) = runner.active {
                scheduler.on_reply(Some(tag), HalReply::ChallengeGenerated { challenge: 0 }, &mut runner);
            }
        }

        let dump = scheduler.dump();
        prop_assert_eq!(dump.history.len(), count.min(capacity));
        prop_assert_eq!(dump.completed, count as u64);
    }
}
