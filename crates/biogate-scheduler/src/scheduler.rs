//! Per-sensor operation scheduler.
//!
//! A FIFO queue plus at most one current operation. The current operation
//! moves through
//!
//! ```text
//! queued ──► starting ──► active ──► (success | failed | cancelled)
//!              │            │
//!              │            └─ cancel requested ─► cancelling ─► ...
//!              └─ waiting for a driver connection
//! ```
//!
//! The scheduler knows nothing about the driver. Kind-specific work (which
//! primitive to submit, how to read a reply, what state to update at the end)
//! is delegated to a [`ClientRunner`] supplied on every call, which keeps the
//! scheduler synchronous and testable on its own.
//!
//! # Guarantees
//!
//! - At most one operation is starting or active at a time.
//! - Operations start in submission order, except that an operation waiting
//!   for its cookie holds back everything queued behind it.
//! - Every accepted operation completes exactly once.
//! - A queued operation that is cancelled never reaches the runner.

use crate::error::{OperationError, SchedulerError};
use crate::observer::CompletionChain;
use crate::operation::{
    CancelReason, Completion, Operation, OperationInfo, OperationKind, OperationOutcome, Progress,
};
use biogate_core::{ClientToken, Cookie, OperationTag, RequestId, SensorId};
use biogate_hal::HalReply;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of asking the runner to start an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The first primitive was submitted.
    Started,
    /// No session yet; the scheduler waits for [`Scheduler::resume`].
    Pending,
    /// The operation ended without (further) hardware work.
    Finished(OperationOutcome),
}

/// What a reply meant for the current operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAction {
    /// Nothing visible to observers.
    Pending,
    Progress(Progress),
    Finished(OperationOutcome),
}

/// Kind-specific behaviour the scheduler delegates.
pub trait ClientRunner {
    /// Begin `operation`; every primitive it submits must carry `tag`.
    fn start(&mut self, operation: &mut Operation, tag: OperationTag) -> StartOutcome;

    /// Interpret a reply addressed to the current operation.
    fn handle_reply(
        &mut self,
        operation: &mut Operation,
        tag: OperationTag,
        reply: HalReply,
    ) -> ReplyAction;

    /// Ask the driver to stop the active primitive.
    fn cancel(&mut self, operation: &Operation, tag: OperationTag);

    /// State update for a finished operation. Runs before any observer.
    fn on_finished(&mut self, operation: &Operation, completion: &Completion);
}

/// Result of [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Accepted,
    /// An operation with the same token and request id is already
    /// scheduled; the new one was dropped.
    Duplicate,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The active operation was asked to stop; its completion follows.
    Requested,
    /// The operation had not reached the driver and completed as cancelled.
    Cancelled,
    /// A cancel was already in flight.
    AlreadyCancelling,
    /// Nothing matched.
    NoMatch,
}

/// Result of [`Scheduler::on_reply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDisposition {
    Handled,
    /// The tag does not belong to the active operation.
    Stale,
    /// The reply carried no tag; the caller decides.
    Unsolicited(HalReply),
}

/// Lifecycle state of a scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Queued,
    WaitingForCookie,
    Starting,
    Active,
    Cancelling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    WaitingForCookie(Cookie),
    Starting(OperationTag),
    Active(OperationTag),
}

#[derive(Debug)]
struct Entry {
    operation: Operation,
    chain: CompletionChain,
    phase: Phase,
    cancel: Option<CancelReason>,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn state(&self) -> ClientState {
        match self.phase {
            Phase::Queued => ClientState::Queued,
            Phase::WaitingForCookie(_) => ClientState::WaitingForCookie,
            Phase::Starting(_) => ClientState::Starting,
            Phase::Active(_) if self.cancel.is_some() => ClientState::Cancelling,
            Phase::Active(_) => ClientState::Active,
        }
    }

    fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            operation: self.operation.info(),
            state: self.state(),
        }
    }
}

/// An operation and its state, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    pub operation: OperationInfo,
    pub state: ClientState,
}

/// A completed operation in the history ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub completion: Completion,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

/// Scheduler state captured when the driver died.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashSnapshot {
    pub at: DateTime<Utc>,
    pub current: Option<ClientSnapshot>,
    pub queued: Vec<ClientSnapshot>,
}

/// Read-only view of a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerDump {
    pub sensor_id: SensorId,
    pub current: Option<ClientSnapshot>,
    pub queued: Vec<ClientSnapshot>,
    pub completed: u64,
    pub history: Vec<HistoryRecord>,
    pub crash_snapshots: Vec<CrashSnapshot>,
}

/// FIFO scheduler for one sensor.
///
/// # Examples
///
/// ```
/// use biogate_scheduler::scheduler::{ClientRunner, ReplyAction, Scheduler, StartOutcome};
/// use biogate_scheduler::{CompletionChain, Completion, Operation, OperationKind};
/// use biogate_core::{ClientToken, OperationTag, OwnerId, RequestId, SensorId, UserId};
/// use biogate_hal::HalReply;
///
/// struct NoHardware;
///
/// impl ClientRunner for NoHardware {
///     fn start(&mut self, _op: &mut Operation, _tag: OperationTag) -> StartOutcome {
///         StartOutcome::Started
///     }
///     fn handle_reply(&mut self, _op: &mut Operation, _tag: OperationTag, _reply: HalReply) -> ReplyAction {
///         ReplyAction::Pending
///     }
///     fn cancel(&mut self, _op: &Operation, _tag: OperationTag) {}
///     fn on_finished(&mut self, _op: &Operation, _completion: &Completion) {}
/// }
///
/// let mut scheduler = Scheduler::new(SensorId::new(1), 100);
/// let op = Operation::new(
///     RequestId::new(1),
///     ClientToken::new(),
///     OwnerId::new("com.example").unwrap(),
///     SensorId::new(1),
///     UserId::new(0),
///     OperationKind::GenerateChallenge,
/// );
///
/// scheduler.schedule(op, CompletionChain::new(), &mut NoHardware);
/// assert_eq!(scheduler.current_client().map(|c| c.request_id), Some(RequestId::new(1)));
/// ```
#[derive(Debug)]
pub struct Scheduler {
    sensor_id: SensorId,
    queue: VecDeque<Entry>,
    current: Option<Entry>,
    last_tag: OperationTag,
    history: VecDeque<HistoryRecord>,
    history_capacity: usize,
    crash_snapshots: VecDeque<CrashSnapshot>,
    completed: u64,
}

impl Scheduler {
    pub fn new(sensor_id: SensorId, history_capacity: usize) -> Self {
        Self {
            sensor_id,
            queue: VecDeque::new(),
            current: None,
            last_tag: OperationTag::new(0),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            crash_snapshots: VecDeque::new(),
            completed: 0,
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    /// Number of operations waiting behind the current one.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// Total number of completed operations.
    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    /// Enqueue an operation and start it if the sensor is idle.
    pub fn schedule<R: ClientRunner>(
        &mut self,
        operation: Operation,
        chain: CompletionChain,
        runner: &mut R,
    ) -> ScheduleOutcome {
        if self.contains(&operation.token, operation.request_id) {
            warn!(
                sensor_id = %self.sensor_id,
                request_id = %operation.request_id,
                kind = %operation.kind,
                "Duplicate operation ignored"
            );
            return ScheduleOutcome::Duplicate;
        }

        let phase = match operation.cookie {
            Some(cookie) => Phase::WaitingForCookie(cookie),
            None => Phase::Queued,
        };
        debug!(
            sensor_id = %self.sensor_id,
            request_id = %operation.request_id,
            kind = %operation.kind,
            queue_len = self.queue.len(),
            "Operation scheduled"
        );
        self.queue.push_back(Entry {
            operation,
            chain,
            phase,
            cancel: None,
            scheduled_at: Utc::now(),
            started_at: None,
        });
        self.advance(runner);
        ScheduleOutcome::Accepted
    }

    /// Release a prepared operation held by `cookie`.
    ///
    /// Returns `false` if no queued operation waits for the cookie.
    pub fn start_prepared_client<R: ClientRunner>(&mut self, cookie: Cookie, runner: &mut R) -> bool {
        let Some(entry) = self
            .queue
            .iter_mut()
            .find(|e| e.phase == Phase::WaitingForCookie(cookie))
        else {
            warn!(sensor_id = %self.sensor_id, cookie = %cookie, "No operation waiting for cookie");
            return false;
        };

        entry.phase = Phase::Queued;
        info!(
            sensor_id = %self.sensor_id,
            cookie = %cookie,
            request_id = %entry.operation.request_id,
            "Prepared operation released"
        );
        self.advance(runner);
        true
    }

    /// Cancel an authentication or detection by identity.
    pub fn cancel_authentication_or_detection<R: ClientRunner>(
        &mut self,
        token: &ClientToken,
        request_id: RequestId,
        runner: &mut R,
    ) -> CancelOutcome {
        self.cancel(
            token,
            request_id,
            CancelReason::Caller,
            OperationKind::is_authentication_or_detection,
            runner,
        )
    }

    /// Cancel an enrollment by identity.
    pub fn cancel_enrollment<R: ClientRunner>(
        &mut self,
        token: &ClientToken,
        request_id: RequestId,
        runner: &mut R,
    ) -> CancelOutcome {
        self.cancel(
            token,
            request_id,
            CancelReason::Caller,
            OperationKind::is_enrollment,
            runner,
        )
    }

    /// Cancel the operation with this identity if `applies` accepts its kind.
    ///
    /// Active operations are asked to stop and complete through the normal
    /// reply path. Operations that never reached the driver complete as
    /// cancelled immediately, without a driver call. Repeated and unmatched
    /// cancels are no-ops.
    pub fn cancel<R: ClientRunner>(
        &mut self,
        token: &ClientToken,
        request_id: RequestId,
        reason: CancelReason,
        applies: fn(&OperationKind) -> bool,
        runner: &mut R,
    ) -> CancelOutcome {
        if let Some(entry) = self.current.as_mut()
            && entry.operation.matches(token, request_id)
            && applies(&entry.operation.kind)
        {
            if entry.cancel.is_some() {
                debug!(sensor_id = %self.sensor_id, request_id = %request_id, "Cancel already requested");
                return CancelOutcome::AlreadyCancelling;
            }
            entry.cancel = Some(reason);
            match entry.phase {
                Phase::Active(tag) => {
                    info!(
                        sensor_id = %self.sensor_id,
                        request_id = %request_id,
                        reason = ?reason,
                        "Cancelling active operation"
                    );
                    runner.cancel(&entry.operation, tag);
                    return CancelOutcome::Requested;
                }
                _ => {
                    info!(
                        sensor_id = %self.sensor_id,
                        request_id = %request_id,
                        "Cancelling operation before it reached the driver"
                    );
                    self.finish_current(OperationOutcome::Cancelled(reason), runner);
                    self.advance(runner);
                    return CancelOutcome::Cancelled;
                }
            }
        }

        let position = self
            .queue
            .iter()
            .position(|e| e.operation.matches(token, request_id) && applies(&e.operation.kind));
        if let Some(mut entry) = position.and_then(|p| self.queue.remove(p)) {
            info!(
                sensor_id = %self.sensor_id,
                request_id = %request_id,
                "Removed queued operation"
            );
            entry.cancel = Some(reason);
            self.complete(entry, OperationOutcome::Cancelled(reason), runner);
            // A released head may have been held back by a cookie
            self.advance(runner);
            return CancelOutcome::Cancelled;
        }

        debug!(
            sensor_id = %self.sensor_id,
            request_id = %request_id,
            "Cancel for unknown operation ignored"
        );
        CancelOutcome::NoMatch
    }

    /// Route a driver reply to the current operation.
    pub fn on_reply<R: ClientRunner>(
        &mut self,
        tag: Option<OperationTag>,
        reply: HalReply,
        runner: &mut R,
    ) -> ReplyDisposition {
        let Some(tag) = tag else {
            return ReplyDisposition::Unsolicited(reply);
        };

        let Some(entry) = self.current.as_mut().filter(|e| e.phase == Phase::Active(tag)) else {
            debug!(
                sensor_id = %self.sensor_id,
                tag = %tag,
                reply = ?reply,
                "Reply for inactive operation dropped"
            );
            return ReplyDisposition::Stale;
        };

        match runner.handle_reply(&mut entry.operation, tag, reply) {
            ReplyAction::Pending => {}
            ReplyAction::Progress(progress) => {
                let info = entry.operation.info();
                entry.chain.progress(&info, &progress);
            }
            ReplyAction::Finished(outcome) => {
                self.finish_current(outcome, runner);
                self.advance(runner);
            }
        }
        ReplyDisposition::Handled
    }

    /// Retry starting the current operation after a connection was made.
    pub fn resume<R: ClientRunner>(&mut self, runner: &mut R) {
        self.try_start(runner);
        self.advance(runner);
    }

    /// Fail an operation that was waiting for a connection that never came.
    pub fn fail_starting<R: ClientRunner>(&mut self, error: OperationError, runner: &mut R) {
        if matches!(self.current.as_ref().map(|e| e.phase), Some(Phase::Starting(_))) {
            self.finish_current(OperationOutcome::Failed(error), runner);
            self.advance(runner);
        }
    }

    /// Fail every operation on the sensor after the driver died.
    ///
    /// Returns how many operations were failed.
    pub fn on_driver_died<R: ClientRunner>(&mut self, runner: &mut R) -> usize {
        let snapshot = CrashSnapshot {
            at: Utc::now(),
            current: self.current.as_ref().map(Entry::snapshot),
            queued: self.queue.iter().map(Entry::snapshot).collect(),
        };
        if self.crash_snapshots.len() == biogate_core::constants::MAX_CRASH_SNAPSHOTS {
            self.crash_snapshots.pop_front();
        }
        self.crash_snapshots.push_back(snapshot);

        let mut failed = 0;
        if let Some(entry) = self.current.take() {
            self.complete(entry, OperationOutcome::Failed(OperationError::DriverLost), runner);
            failed += 1;
        }
        while let Some(entry) = self.queue.pop_front() {
            self.complete(entry, OperationOutcome::Failed(OperationError::DriverLost), runner);
            failed += 1;
        }
        if failed > 0 {
            warn!(sensor_id = %self.sensor_id, failed, "Operations failed after driver death");
        }
        failed
    }

    /// Give up on a non-interactive operation whose reply never came.
    ///
    /// Returns `false` if `tag` is no longer the active operation.
    pub fn watchdog_expired<R: ClientRunner>(
        &mut self,
        tag: OperationTag,
        timeout: Duration,
        runner: &mut R,
    ) -> bool {
        let Some(entry) = self.current.as_ref().filter(|e| e.phase == Phase::Active(tag)) else {
            return false;
        };
        if entry.operation.kind.is_interactive() {
            return false;
        }

        let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        error!(
            sensor_id = %self.sensor_id,
            request_id = %entry.operation.request_id,
            kind = %entry.operation.kind,
            timeout_ms = after_ms,
            "Operation timed out waiting for driver"
        );
        runner.cancel(&entry.operation, tag);
        self.finish_current(
            OperationOutcome::Failed(OperationError::Timeout { after_ms }),
            runner,
        );
        self.advance(runner);
        true
    }

    /// The operation currently starting or active.
    pub fn current_client(&self) -> Option<OperationInfo> {
        self.current.as_ref().map(|e| e.operation.info())
    }

    /// The starting or active operation, unless a cancel is already pending.
    pub fn current_operation(&self) -> Option<&Operation> {
        self.current
            .as_ref()
            .filter(|e| {
                matches!(e.phase, Phase::Starting(_) | Phase::Active(_)) && e.cancel.is_none()
            })
            .map(|e| &e.operation)
    }

    /// Run `f` on the active operation if its request id is `request_id`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::IdentityMismatch` otherwise.
    pub fn current_client_if_matches<T>(
        &self,
        request_id: RequestId,
        f: impl FnOnce(&Operation, OperationTag) -> T,
    ) -> Result<T, SchedulerError> {
        match &self.current {
            Some(entry) if entry.operation.request_id == request_id => match entry.phase {
                Phase::Active(tag) => Ok(f(&entry.operation, tag)),
                _ => Err(SchedulerError::IdentityMismatch {
                    requested: request_id,
                    active: None,
                }),
            },
            other => Err(SchedulerError::IdentityMismatch {
                requested: request_id,
                active: other.as_ref().map(|e| e.operation.request_id),
            }),
        }
    }

    /// Snapshot for diagnostics.
    pub fn dump(&self) -> SchedulerDump {
        SchedulerDump {
            sensor_id: self.sensor_id,
            current: self.current.as_ref().map(Entry::snapshot),
            queued: self.queue.iter().map(Entry::snapshot).collect(),
            completed: self.completed,
            history: self.history.iter().cloned().collect(),
            crash_snapshots: self.crash_snapshots.iter().cloned().collect(),
        }
    }

    fn contains(&self, token: &ClientToken, request_id: RequestId) -> bool {
        self.current
            .iter()
            .chain(self.queue.iter())
            .any(|e| e.operation.matches(token, request_id))
    }

    fn next_tag(&mut self) -> OperationTag {
        self.last_tag = self.last_tag.next();
        self.last_tag
    }

    /// Start queued operations until one is in flight or the queue is blocked.
    fn advance<R: ClientRunner>(&mut self, runner: &mut R) {
        while self.current.is_none() {
            match self.queue.front().map(|e| e.phase) {
                None => return,
                Some(Phase::WaitingForCookie(cookie)) => {
                    debug!(sensor_id = %self.sensor_id, cookie = %cookie, "Head operation waiting for cookie");
                    return;
                }
                Some(_) => {}
            }
            let Some(mut entry) = self.queue.pop_front() else {
                return;
            };

            let tag = self.next_tag();
            entry.phase = Phase::Starting(tag);
            entry.started_at = Some(Utc::now());
            let info = entry.operation.info();
            entry.chain.started(&info);
            info!(
                sensor_id = %self.sensor_id,
                request_id = %info.request_id,
                user_id = %info.user_id,
                kind = info.kind,
                tag = %tag,
                "Operation started"
            );
            self.current = Some(entry);
            self.try_start(runner);
        }
    }

    fn try_start<R: ClientRunner>(&mut self, runner: &mut R) {
        let Some(entry) = self.current.as_mut() else {
            return;
        };
        let Phase::Starting(tag) = entry.phase else {
            return;
        };
        match runner.start(&mut entry.operation, tag) {
            StartOutcome::Started => entry.phase = Phase::Active(tag),
            StartOutcome::Pending => {
                debug!(sensor_id = %self.sensor_id, tag = %tag, "Operation waiting for driver");
            }
            StartOutcome::Finished(outcome) => self.finish_current(outcome, runner),
        }
    }

    fn finish_current<R: ClientRunner>(&mut self, outcome: OperationOutcome, runner: &mut R) {
        if let Some(entry) = self.current.take() {
            self.complete(entry, outcome, runner);
        }
    }

    fn complete<R: ClientRunner>(&mut self, mut entry: Entry, outcome: OperationOutcome, runner: &mut R) {
        // The driver reports every cancel the same way; keep the reason we asked with
        let outcome = match (outcome, entry.cancel) {
            (OperationOutcome::Cancelled(_), Some(reason)) => OperationOutcome::Cancelled(reason),
            (outcome, _) => outcome,
        };
        let completion = Completion {
            operation: entry.operation.info(),
            outcome,
            cancel_requested: entry.cancel.is_some(),
        };

        runner.on_finished(&entry.operation, &completion);
        if !entry.chain.finish(&completion) {
            return;
        }

        info!(
            sensor_id = %self.sensor_id,
            request_id = %completion.operation.request_id,
            kind = completion.operation.kind,
            outcome = completion.outcome.label(),
            "Operation finished"
        );
        self.completed += 1;
        if self.history_capacity > 0 {
            if self.history.len() == self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(HistoryRecord {
                completion,
                scheduled_at: entry.scheduled_at,
                started_at: entry.started_at,
                finished_at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ClientEvent, ClientEvents};
    use biogate_core::{OwnerId, UserId};

    const SENSOR: SensorId = SensorId::new(1);

    /// Runner that records calls and finishes nothing on its own.
    #[derive(Default)]
    struct FakeRunner {
        started: Vec<RequestId>,
        cancelled: Vec<RequestId>,
        finished: Vec<RequestId>,
        pending: bool,
    }

    impl ClientRunner for FakeRunner {
        fn start(&mut self, operation: &mut Operation, _tag: OperationTag) -> StartOutcome {
            if self.pending {
                return StartOutcome::Pending;
            }
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
                HalReply::Acquired => ReplyAction::Progress(Progress::Acquired),
                HalReply::ChallengeGenerated { challenge } => ReplyAction::Finished(
                    OperationOutcome::Success(crate::OperationResult::ChallengeGenerated {
                        challenge,
                    }),
                ),
                HalReply::Error { .. } => {
                    ReplyAction::Finished(OperationOutcome::Cancelled(CancelReason::Caller))
                }
                _ => ReplyAction::Pending,
            }
        }

        fn cancel(&mut self, operation: &Operation, _tag: OperationTag) {
            self.cancelled.push(operation.request_id);
        }

        fn on_finished(&mut self, operation: &Operation, _completion: &Completion) {
            self.finished.push(operation.request_id);
        }
    }

    fn op(id: u64, token: ClientToken, kind: OperationKind) -> Operation {
        Operation::new(
            RequestId::new(id),
            token,
            OwnerId::new("com.example.app").unwrap(),
            SENSOR,
            UserId::new(0),
            kind,
        )
    }

    fn auth(id: u64, token: ClientToken) -> Operation {
        op(
            id,
            token,
            OperationKind::Authenticate {
                operation_id: 0,
                allow_background: false,
            },
        )
    }

    fn observed(
        scheduler: &mut Scheduler,
        operation: Operation,
        runner: &mut FakeRunner,
    ) -> ClientEvents {
        let (observer, events) = ClientEvents::channel();
        scheduler.schedule(operation, CompletionChain::new().with(Box::new(observer)), runner);
        events
    }

    fn finished(events: &mut ClientEvents) -> Vec<Completion> {
        let mut out = Vec::new();
        while let Some(event) = events.try_recv() {
            if let ClientEvent::Finished(c) = event {
                out.push(c);
            }
        }
        out
    }

    fn active_tag(scheduler: &Scheduler) -> OperationTag {
        match scheduler.current.as_ref().map(|e| e.phase) {
            Some(Phase::Active(tag)) => tag,
            other => panic!("no active operation: {:?}", other),
        }
    }

    #[test]
    fn test_first_operation_starts_immediately() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();

        scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner);
        scheduler.schedule(auth(2, token), CompletionChain::new(), &mut runner);

        assert_eq!(runner.started, vec![RequestId::new(1)]);
        assert_eq!(scheduler.queue_len(), 1);
        assert_eq!(scheduler.dump().current.unwrap().state, ClientState::Active);
    }

    #[test]
    fn test_duplicate_is_dropped() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();

        assert_eq!(
            scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner),
            ScheduleOutcome::Accepted
        );
        assert_eq!(
            scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner),
            ScheduleOutcome::Duplicate
        );
        // Same request id from another caller is a different operation
        assert_eq!(
            scheduler.schedule(auth(1, ClientToken::new()), CompletionChain::new(), &mut runner),
            ScheduleOutcome::Accepted
        );
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[test]
    fn test_cancel_queued_never_reaches_runner() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();

        scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner);
        let mut events = observed(&mut scheduler, auth(2, token), &mut runner);

        let outcome =
            scheduler.cancel_authentication_or_detection(&token, RequestId::new(2), &mut runner);
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert!(runner.cancelled.is_empty());
        assert_eq!(runner.started, vec![RequestId::new(1)]);

        let completions = finished(&mut events);
        assert_eq!(completions.len(), 1);
        assert_eq!(
            completions[0].outcome,
            OperationOutcome::Cancelled(CancelReason::Caller)
        );
        assert!(completions[0].cancel_requested);
    }

    #[test]
    fn test_cancel_active_is_cooperative_and_idempotent() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        let mut events = observed(&mut scheduler, auth(1, token), &mut runner);

        assert_eq!(
            scheduler.cancel_authentication_or_detection(&token, RequestId::new(1), &mut runner),
            CancelOutcome::Requested
        );
        assert_eq!(
            scheduler.cancel_authentication_or_detection(&token, RequestId::new(1), &mut runner),
            CancelOutcome::AlreadyCancelling
        );
        assert_eq!(runner.cancelled, vec![RequestId::new(1)]);
        assert_eq!(scheduler.dump().current.unwrap().state, ClientState::Cancelling);
        assert!(finished(&mut events).is_empty());

        let tag = active_tag(&scheduler);
        scheduler.on_reply(Some(tag), HalReply::canceled(), &mut runner);
        // A late duplicate from the driver is stale
        assert_eq!(
            scheduler.on_reply(Some(tag), HalReply::canceled(), &mut runner),
            ReplyDisposition::Stale
        );

        let completions = finished(&mut events);
        assert_eq!(completions.len(), 1);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();

        assert_eq!(
            scheduler.cancel_authentication_or_detection(&token, RequestId::new(9), &mut runner),
            CancelOutcome::NoMatch
        );

        scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner);
        let before = scheduler.dump();
        assert_eq!(
            scheduler.cancel_authentication_or_detection(&token, RequestId::new(9), &mut runner),
            CancelOutcome::NoMatch
        );
        assert_eq!(scheduler.dump(), before);
    }

    #[test]
    fn test_cancel_respects_kind() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner);

        assert_eq!(
            scheduler.cancel_enrollment(&token, RequestId::new(1), &mut runner),
            CancelOutcome::NoMatch
        );
        assert!(runner.cancelled.is_empty());
    }

    #[test]
    fn test_completion_advances_queue() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        scheduler.schedule(op(1, token, OperationKind::GenerateChallenge), CompletionChain::new(), &mut runner);
        scheduler.schedule(op(2, token, OperationKind::GenerateChallenge), CompletionChain::new(), &mut runner);

        let tag = active_tag(&scheduler);
        scheduler.on_reply(Some(tag), HalReply::ChallengeGenerated { challenge: 1 }, &mut runner);

        assert_eq!(runner.started, vec![RequestId::new(1), RequestId::new(2)]);
        assert_ne!(active_tag(&scheduler), tag);
        assert_eq!(scheduler.completed_count(), 1);
    }

    #[test]
    fn test_progress_reaches_observers() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let mut events = observed(&mut scheduler, auth(1, ClientToken::new()), &mut runner);

        let tag = active_tag(&scheduler);
        scheduler.on_reply(Some(tag), HalReply::Acquired, &mut runner);

        assert!(matches!(events.try_recv(), Some(ClientEvent::Started(_))));
        assert_eq!(events.try_recv(), Some(ClientEvent::Progress(Progress::Acquired)));
    }

    #[test]
    fn test_unsolicited_reply_returned() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        assert_eq!(
            scheduler.on_reply(None, HalReply::LockoutCleared, &mut runner),
            ReplyDisposition::Unsolicited(HalReply::LockoutCleared)
        );
    }

    #[test]
    fn test_cookie_holds_queue_until_released() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        let cookie = Cookie::new(77).unwrap();

        scheduler.schedule(auth(1, token).with_cookie(cookie), CompletionChain::new(), &mut runner);
        scheduler.schedule(auth(2, token), CompletionChain::new(), &mut runner);
        assert!(runner.started.is_empty());
        assert_eq!(scheduler.dump().queued[0].state, ClientState::WaitingForCookie);

        assert!(!scheduler.start_prepared_client(Cookie::new(1).unwrap(), &mut runner));
        assert!(scheduler.start_prepared_client(cookie, &mut runner));
        assert_eq!(runner.started, vec![RequestId::new(1)]);
    }

    #[test]
    fn test_early_cookie_release_keeps_position() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        let cookie = Cookie::new(5).unwrap();

        scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner);
        scheduler.schedule(auth(2, token).with_cookie(cookie), CompletionChain::new(), &mut runner);
        scheduler.schedule(auth(3, token), CompletionChain::new(), &mut runner);
        assert!(scheduler.start_prepared_client(cookie, &mut runner));

        let tag = active_tag(&scheduler);
        scheduler.on_reply(Some(tag), HalReply::canceled(), &mut runner);
        assert_eq!(runner.started, vec![RequestId::new(1), RequestId::new(2)]);
    }

    #[test]
    fn test_driver_death_fails_everything() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        let mut first = observed(&mut scheduler, auth(1, token), &mut runner);
        let mut second = observed(&mut scheduler, auth(2, token), &mut runner);

        assert_eq!(scheduler.on_driver_died(&mut runner), 2);

        for events in [&mut first, &mut second] {
            let completions = finished(events);
            assert_eq!(completions.len(), 1);
            assert_eq!(
                completions[0].outcome,
                OperationOutcome::Failed(OperationError::DriverLost)
            );
        }
        assert!(scheduler.is_idle());
        let dump = scheduler.dump();
        assert_eq!(dump.crash_snapshots.len(), 1);
        assert_eq!(dump.crash_snapshots[0].queued.len(), 1);
        assert_eq!(runner.started, vec![RequestId::new(1)]);
    }

    #[test]
    fn test_pending_start_resumes_or_fails() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner {
            pending: true,
            ..Default::default()
        };
        let token = ClientToken::new();
        let mut events = observed(&mut scheduler, auth(1, token), &mut runner);
        scheduler.schedule(auth(2, token), CompletionChain::new(), &mut runner);
        assert_eq!(scheduler.dump().current.unwrap().state, ClientState::Starting);

        scheduler.fail_starting(OperationError::driver_unavailable("gone"), &mut runner);
        assert!(matches!(
            finished(&mut events)[0].outcome,
            OperationOutcome::Failed(OperationError::DriverUnavailable { .. })
        ));

        runner.pending = false;
        scheduler.resume(&mut runner);
        assert_eq!(runner.started, vec![RequestId::new(2)]);
    }

    #[test]
    fn test_cancel_while_starting_completes_immediately() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner {
            pending: true,
            ..Default::default()
        };
        let token = ClientToken::new();
        let mut events = observed(&mut scheduler, auth(1, token), &mut runner);

        assert_eq!(
            scheduler.cancel_authentication_or_detection(&token, RequestId::new(1), &mut runner),
            CancelOutcome::Cancelled
        );
        assert!(runner.cancelled.is_empty());
        assert_eq!(finished(&mut events).len(), 1);
    }

    #[test]
    fn test_current_operation_includes_starting() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner {
            pending: true,
            ..Default::default()
        };
        let token = ClientToken::new();
        scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner);

        assert_eq!(
            scheduler.current_operation().map(|op| op.request_id),
            Some(RequestId::new(1))
        );

        scheduler.cancel_authentication_or_detection(&token, RequestId::new(1), &mut runner);
        assert!(scheduler.current_operation().is_none());
    }

    #[test]
    fn test_watchdog_only_for_non_interactive() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        scheduler.schedule(auth(1, token), CompletionChain::new(), &mut runner);
        let tag = active_tag(&scheduler);
        assert!(!scheduler.watchdog_expired(tag, Duration::from_secs(1), &mut runner));

        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut events = observed(&mut scheduler, op(2, token, OperationKind::GenerateChallenge), &mut runner);
        let tag = active_tag(&scheduler);
        assert!(!scheduler.watchdog_expired(tag.next(), Duration::from_secs(1), &mut runner));
        assert!(scheduler.watchdog_expired(tag, Duration::from_secs(1), &mut runner));

        assert_eq!(
            finished(&mut events)[0].outcome,
            OperationOutcome::Failed(OperationError::Timeout { after_ms: 1000 })
        );
        assert_eq!(runner.cancelled, vec![RequestId::new(2)]);
    }

    #[test]
    fn test_current_client_if_matches() {
        let mut scheduler = Scheduler::new(SENSOR, 10);
        let mut runner = FakeRunner::default();
        scheduler.schedule(auth(4, ClientToken::new()), CompletionChain::new(), &mut runner);

        assert_eq!(
            scheduler.current_client_if_matches(RequestId::new(4), |op, _| op.request_id),
            Ok(RequestId::new(4))
        );
        assert_eq!(
            scheduler.current_client_if_matches(RequestId::new(5), |op, _| op.request_id),
            Err(SchedulerError::IdentityMismatch {
                requested: RequestId::new(5),
                active: Some(RequestId::new(4)),
            })
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let mut scheduler = Scheduler::new(SENSOR, 2);
        let mut runner = FakeRunner::default();
        let token = ClientToken::new();
        for id in 1..=3 {
            scheduler.schedule(auth(id, token), CompletionChain::new(), &mut runner);
            scheduler.cancel_authentication_or_detection(&token, RequestId::new(id), &mut runner);
            let tag = active_tag(&scheduler);
            scheduler.on_reply(Some(tag), HalReply::canceled(), &mut runner);
        }

        let dump = scheduler.dump();
        assert_eq!(dump.completed, 3);
        assert_eq!(dump.history.len(), 2);
        assert_eq!(dump.history[0].completion.operation.request_id, RequestId::new(2));
    }
}
