//! One sensor: its scheduler, session and cached per-user state.
//!
//! [`Sensor`] turns scheduler callbacks into driver primitives. It owns the
//! lockout and authenticator-id caches and the performance counters, and it
//! reports work the provider must do on its behalf (timers, follow-up
//! operations, connection attempts) through [`Effects`].

use crate::cleanup::reconcile;
use crate::error::{OperationError, SchedulerError};
use crate::observer::{BiometricStateEvent, ClientObserver, CompletionChain, StateBroadcastObserver};
use crate::operation::{
    CancelReason, Completion, Operation, OperationInfo, OperationKind, OperationOutcome,
    OperationResult, Progress,
};
use crate::scheduler::{
    CancelOutcome, ClientRunner, ReplyAction, ReplyDisposition, ScheduleOutcome, Scheduler,
    SchedulerDump, StartOutcome,
};
use crate::session::{DriverLink, Resolution, SessionHandle};
use crate::tracker::PerformanceTracker;
use biogate_core::constants::UNKNOWN_AUTHENTICATOR_ID;
use biogate_core::{
    ClientToken, Cookie, LockoutMode, OperationTag, OwnerId, RequestId, SensorId,
    SensorProperties, TemplateId, UserId,
};
use biogate_hal::{EventSink, HalErrorCode, HalReply, HalRequest, PointerContext};
use biogate_storage::TemplateStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Touch input from an under-display sensor overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    PointerDown(PointerContext),
    PointerUp(PointerContext),
    UiReady,
}

impl TouchEvent {
    fn into_request(self) -> HalRequest {
        match self {
            TouchEvent::PointerDown(pointer) => HalRequest::PointerDown(pointer),
            TouchEvent::PointerUp(pointer) => HalRequest::PointerUp(pointer),
            TouchEvent::UiReady => HalRequest::UiReady,
        }
    }
}

/// Operations a sensor asks the provider to schedule after a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUpKind {
    LoadAuthenticatorId,
    InternalCleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FollowUp {
    pub sensor_id: SensorId,
    pub user_id: UserId,
    pub kind: FollowUpKind,
}

/// Work collected while a sensor handled one message.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub follow_ups: Vec<FollowUp>,
    /// Reply deadlines to arm, as (sensor, tag).
    pub watchdogs: Vec<(SensorId, OperationTag)>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.follow_ups.is_empty() && self.watchdogs.is_empty()
    }
}

/// Provider state a sensor borrows while it handles one message.
pub(crate) struct SensorContext<'a> {
    pub link: &'a mut DriverLink,
    pub store: &'a dyn TemplateStore,
    pub effects: &'a mut Effects,
    pub reply_timeout: Option<Duration>,
}

impl SensorContext<'_> {
    fn reborrow(&mut self) -> SensorContext<'_> {
        SensorContext {
            link: &mut *self.link,
            store: self.store,
            effects: &mut *self.effects,
            reply_timeout: self.reply_timeout,
        }
    }
}

struct SensorState {
    props: SensorProperties,
    lockout: HashMap<UserId, LockoutMode>,
    authenticator_ids: HashMap<UserId, u64>,
    tracker: PerformanceTracker,
    seen_users: BTreeSet<UserId>,
    state_tx: broadcast::Sender<BiometricStateEvent>,
}

impl SensorState {
    fn sensor_id(&self) -> SensorId {
        self.props.sensor_id
    }

    fn lockout_mode(&self, user_id: UserId) -> LockoutMode {
        self.lockout.get(&user_id).copied().unwrap_or_default()
    }

    fn enrollments_changed(&self, user_id: UserId, template_id: TemplateId, has_enrollments: bool) {
        let _ = self.state_tx.send(BiometricStateEvent::EnrollmentsChanged {
            sensor_id: self.sensor_id(),
            user_id,
            template_id,
            has_enrollments,
        });
    }
}

/// Diagnostic view of one sensor.
#[derive(Debug, Clone, Serialize)]
pub struct SensorDump {
    pub properties: SensorProperties,
    pub session_open: bool,
    pub lockout: BTreeMap<UserId, LockoutMode>,
    pub authenticator_ids: BTreeMap<UserId, u64>,
    pub performance: PerformanceTracker,
    pub scheduler: SchedulerDump,
}

/// A sensor owned by a provider.
pub(crate) struct Sensor {
    scheduler: Scheduler,
    session: SessionHandle,
    state: SensorState,
}

impl Sensor {
    pub fn new(
        props: SensorProperties,
        history_capacity: usize,
        sink: EventSink,
        state_tx: broadcast::Sender<BiometricStateEvent>,
    ) -> Self {
        let sensor_id = props.sensor_id;
        Self {
            scheduler: Scheduler::new(sensor_id, history_capacity),
            session: SessionHandle::new(sensor_id, sink),
            state: SensorState {
                props,
                lockout: HashMap::new(),
                authenticator_ids: HashMap::new(),
                tracker: PerformanceTracker::new(),
                seen_users: BTreeSet::new(),
                state_tx,
            },
        }
    }

    pub fn id(&self) -> SensorId {
        self.state.sensor_id()
    }

    pub fn lockout_mode(&self, user_id: UserId) -> LockoutMode {
        self.state.lockout_mode(user_id)
    }

    pub fn authenticator_id(&self, user_id: UserId) -> u64 {
        self.state
            .authenticator_ids
            .get(&user_id)
            .copied()
            .unwrap_or(UNKNOWN_AUTHENTICATOR_ID)
    }

    /// Users this sensor has seen operations or driver state for.
    pub fn known_users(&self) -> BTreeSet<UserId> {
        let state = &self.state;
        state
            .seen_users
            .iter()
            .chain(state.lockout.keys())
            .chain(state.authenticator_ids.keys())
            .copied()
            .collect()
    }

    pub fn current_client(&self) -> Option<OperationInfo> {
        self.scheduler.current_client()
    }

    pub fn dump(&self) -> SensorDump {
        let state = &self.state;
        SensorDump {
            properties: state.props.clone(),
            session_open: self.session.is_materialized(),
            lockout: state
                .lockout
                .iter()
                .filter(|(_, mode)| mode.is_locked_out())
                .map(|(user, mode)| (*user, *mode))
                .collect(),
            authenticator_ids: state
                .authenticator_ids
                .iter()
                .map(|(user, id)| (*user, *id))
                .collect(),
            performance: state.tracker.clone(),
            scheduler: self.scheduler.dump(),
        }
    }

    pub fn schedule(
        &mut self,
        operation: Operation,
        observer: Option<Box<dyn ClientObserver>>,
        ctx: &mut SensorContext<'_>,
    ) -> ScheduleOutcome {
        self.state.seen_users.insert(operation.user_id);
        let mut chain = CompletionChain::new().with(Box::new(StateBroadcastObserver::new(
            self.state.state_tx.clone(),
        )));
        if let Some(observer) = observer {
            chain.push(observer);
        }
        self.with_runner(ctx, |scheduler, runner| {
            scheduler.schedule(operation, chain, runner)
        })
    }

    pub fn cancel(
        &mut self,
        token: &ClientToken,
        request_id: RequestId,
        applies: fn(&OperationKind) -> bool,
        ctx: &mut SensorContext<'_>,
    ) -> CancelOutcome {
        self.with_runner(ctx, |scheduler, runner| {
            scheduler.cancel(token, request_id, CancelReason::Caller, applies, runner)
        })
    }

    /// Cancel the current authentication if its owner lost the foreground.
    ///
    /// Covers an authentication still waiting for its session, so it never
    /// reaches the driver.
    ///
    /// Returns the vetoed request id.
    pub fn enforce_foreground(
        &mut self,
        foreground: &OwnerId,
        trusted_owners: &[OwnerId],
        ctx: &mut SensorContext<'_>,
    ) -> Option<RequestId> {
        let operation = self.scheduler.current_operation()?;
        let OperationKind::Authenticate {
            allow_background: false,
            ..
        } = operation.kind
        else {
            return None;
        };
        if operation.owner == *foreground || trusted_owners.contains(&operation.owner) {
            return None;
        }

        let token = operation.token;
        let request_id = operation.request_id;
        warn!(
            sensor_id = %self.id(),
            request_id = %request_id,
            owner = %operation.owner,
            foreground = %foreground,
            "Background authentication vetoed"
        );
        self.with_runner(ctx, |scheduler, runner| {
            scheduler.cancel(
                &token,
                request_id,
                CancelReason::PolicyVeto,
                OperationKind::is_authentication_or_detection,
                runner,
            )
        });
        Some(request_id)
    }

    pub fn start_prepared_client(&mut self, cookie: Cookie, ctx: &mut SensorContext<'_>) -> bool {
        self.with_runner(ctx, |scheduler, runner| {
            scheduler.start_prepared_client(cookie, runner)
        })
    }

    /// Handle a reply from this sensor's session.
    pub fn on_hal_event(
        &mut self,
        user_id: UserId,
        tag: Option<OperationTag>,
        reply: HalReply,
        ctx: &mut SensorContext<'_>,
    ) {
        let disposition =
            self.with_runner(ctx, |scheduler, runner| scheduler.on_reply(tag, reply, runner));
        if let ReplyDisposition::Unsolicited(reply) = disposition {
            self.on_unsolicited(user_id, reply);
        }
    }

    fn on_unsolicited(&mut self, user_id: UserId, reply: HalReply) {
        let sensor_id = self.id();
        let mode = match reply {
            HalReply::LockoutCleared => LockoutMode::None,
            HalReply::LockoutTimed { .. } => LockoutMode::Timed,
            HalReply::LockoutPermanent => LockoutMode::Permanent,
            other => {
                debug!(sensor_id = %sensor_id, user_id = %user_id, reply = ?other, "Unsolicited reply ignored");
                return;
            }
        };
        info!(sensor_id = %sensor_id, user_id = %user_id, mode = %mode, "Lockout changed by driver");
        if mode.is_locked_out() {
            self.state.lockout.insert(user_id, mode);
            self.state.tracker.record_lockout(user_id, mode);
        } else {
            self.state.lockout.remove(&user_id);
        }
    }

    /// Retry the current operation once a connection exists.
    pub fn resume(&mut self, ctx: &mut SensorContext<'_>) {
        self.with_runner(ctx, |scheduler, runner| scheduler.resume(runner));
    }

    /// Fail the current operation if it was waiting for a connection.
    pub fn fail_starting(&mut self, error: OperationError, ctx: &mut SensorContext<'_>) {
        self.with_runner(ctx, |scheduler, runner| scheduler.fail_starting(error, runner));
    }

    pub fn on_driver_died(&mut self, ctx: &mut SensorContext<'_>) -> usize {
        self.session.invalidate();
        self.with_runner(ctx, |scheduler, runner| scheduler.on_driver_died(runner))
    }

    pub fn watchdog_expired(&mut self, tag: OperationTag, ctx: &mut SensorContext<'_>) -> bool {
        let Some(timeout) = ctx.reply_timeout else {
            return false;
        };
        self.with_runner(ctx, |scheduler, runner| {
            scheduler.watchdog_expired(tag, timeout, runner)
        })
    }

    /// Forward touch input to the active operation.
    ///
    /// # Errors
    ///
    /// Fails if the sensor has no overlay, `request_id` is not the active
    /// operation, the operation does not take touch input, or no session is
    /// live.
    pub fn touch(
        &mut self,
        request_id: RequestId,
        event: TouchEvent,
        link: &DriverLink,
    ) -> Result<(), SchedulerError> {
        let sensor_id = self.id();
        if !self.state.props.sensor_type.is_under_display() {
            return Err(SchedulerError::TouchUnsupported(sensor_id));
        }
        let (user_id, tag) = self
            .scheduler
            .current_client_if_matches(request_id, |operation, tag| {
                if operation.kind.accepts_touch() {
                    Ok((operation.user_id, tag))
                } else {
                    Err(SchedulerError::TouchNotAccepted(request_id))
                }
            })??;
        let session = self
            .session
            .current(user_id, link)
            .ok_or(SchedulerError::NoSession(sensor_id))?;
        session.submit(tag, event.into_request()).map_err(|error| {
            warn!(sensor_id = %sensor_id, error = %error, "Touch forwarding failed");
            SchedulerError::NoSession(sensor_id)
        })
    }

    fn with_runner<T>(
        &mut self,
        ctx: &mut SensorContext<'_>,
        f: impl FnOnce(&mut Scheduler, &mut SensorRunner<'_>) -> T,
    ) -> T {
        let mut runner = SensorRunner {
            state: &mut self.state,
            session: &mut self.session,
            ctx: ctx.reborrow(),
        };
        f(&mut self.scheduler, &mut runner)
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("sensor_id", &self.id())
            .field("scheduler", &self.scheduler)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Runs operations of one sensor against its session.
struct SensorRunner<'a> {
    state: &'a mut SensorState,
    session: &'a mut SessionHandle,
    ctx: SensorContext<'a>,
}

impl SensorRunner<'_> {
    /// The primitive that starts `operation`, or an outcome when no hardware
    /// call is needed.
    fn first_request(&mut self, operation: &mut Operation) -> Result<HalRequest, OperationOutcome> {
        let sensor_id = operation.sensor_id;
        let user_id = operation.user_id;
        let failed = |error| Err(OperationOutcome::Failed(error));

        match &mut operation.kind {
            OperationKind::Enroll { hat, .. } => {
                let max = self.state.props.max_enrollments_per_user;
                let enrolled = match self.ctx.store.list(sensor_id, user_id) {
                    Ok(records) => records.len(),
                    Err(error) => return failed(OperationError::storage(&error)),
                };
                if enrolled >= max as usize {
                    info!(sensor_id = %sensor_id, user_id = %user_id, max, "Enrollment limit reached");
                    return failed(OperationError::EnrollmentLimitReached { max });
                }
                Ok(HalRequest::Enroll { hat: hat.clone() })
            }
            OperationKind::Authenticate { operation_id, .. } => {
                let mode = self.state.lockout_mode(user_id);
                if mode.is_locked_out() {
                    info!(sensor_id = %sensor_id, user_id = %user_id, mode = %mode, "Authentication refused by lockout");
                    return failed(OperationError::LockedOut { mode });
                }
                Ok(HalRequest::Authenticate {
                    operation_id: *operation_id,
                })
            }
            OperationKind::DetectInteraction => Ok(HalRequest::DetectInteraction),
            OperationKind::Remove { template_ids } => {
                if template_ids.is_empty() {
                    return Err(OperationOutcome::Success(OperationResult::Removed {
                        template_ids: Vec::new(),
                    }));
                }
                Ok(HalRequest::RemoveEnrollments {
                    template_ids: template_ids.clone(),
                })
            }
            OperationKind::RemoveAll => {
                let template_ids: Vec<TemplateId> = match self.ctx.store.list(sensor_id, user_id) {
                    Ok(records) => records.into_iter().map(|r| r.template_id).collect(),
                    Err(error) => return failed(OperationError::storage(&error)),
                };
                if template_ids.is_empty() {
                    return Err(OperationOutcome::Success(OperationResult::Removed {
                        template_ids,
                    }));
                }
                Ok(HalRequest::RemoveEnrollments { template_ids })
            }
            OperationKind::GenerateChallenge => Ok(HalRequest::GenerateChallenge),
            OperationKind::RevokeChallenge { challenge } => Ok(HalRequest::RevokeChallenge {
                challenge: *challenge,
            }),
            OperationKind::ResetLockout { hat } => {
                if hat.is_none() && self.state.props.reset_lockout_requires_hat {
                    return failed(OperationError::invalid_request(
                        "lockout reset requires a hardware auth token",
                    ));
                }
                Ok(HalRequest::ResetLockout { hat: hat.clone() })
            }
            OperationKind::LoadAuthenticatorId => Ok(HalRequest::GetAuthenticatorId),
            OperationKind::InvalidateAuthenticatorId => Ok(HalRequest::InvalidateAuthenticatorId),
            OperationKind::InternalCleanup(cleanup) => {
                cleanup.report = None;
                Ok(HalRequest::EnumerateEnrollments)
            }
        }
    }

    fn lock_out(&mut self, user_id: UserId, mode: LockoutMode) -> ReplyAction {
        warn!(sensor_id = %self.state.sensor_id(), user_id = %user_id, mode = %mode, "User locked out");
        self.state.lockout.insert(user_id, mode);
        self.state.tracker.record_lockout(user_id, mode);
        ReplyAction::Finished(OperationOutcome::Failed(OperationError::LockedOut { mode }))
    }

    fn removed(
        &mut self,
        sensor_id: SensorId,
        user_id: UserId,
        template_ids: Vec<TemplateId>,
    ) -> ReplyAction {
        for template_id in &template_ids {
            if let Err(error) = self.ctx.store.remove(sensor_id, user_id, *template_id) {
                return ReplyAction::Finished(OperationOutcome::Failed(OperationError::storage(
                    &error,
                )));
            }
        }
        ReplyAction::Finished(OperationOutcome::Success(OperationResult::Removed {
            template_ids,
        }))
    }

    fn follow_up(&mut self, operation: &Operation) {
        for kind in [FollowUpKind::LoadAuthenticatorId, FollowUpKind::InternalCleanup] {
            self.ctx.effects.follow_ups.push(FollowUp {
                sensor_id: operation.sensor_id,
                user_id: operation.user_id,
                kind,
            });
        }
    }
}

impl ClientRunner for SensorRunner<'_> {
    fn start(&mut self, operation: &mut Operation, tag: OperationTag) -> StartOutcome {
        let request = match self.first_request(operation) {
            Ok(request) => request,
            Err(outcome) => return StartOutcome::Finished(outcome),
        };

        let session = match self.session.resolve(operation.user_id, self.ctx.link) {
            Resolution::Ready(session) => session,
            Resolution::Pending => return StartOutcome::Pending,
            Resolution::Unavailable(error) => {
                warn!(sensor_id = %operation.sensor_id, error = %error, "Session unavailable");
                return StartOutcome::Finished(OperationOutcome::Failed(error.into()));
            }
        };

        debug!(
            sensor_id = %operation.sensor_id,
            tag = %tag,
            request = request.name(),
            "Submitting request"
        );
        if let Err(error) = session.submit(tag, request) {
            warn!(sensor_id = %operation.sensor_id, error = %error, "Submit failed");
            return StartOutcome::Finished(OperationOutcome::Failed(error.into()));
        }
        if self.ctx.reply_timeout.is_some() && !operation.kind.is_interactive() {
            self.ctx.effects.watchdogs.push((operation.sensor_id, tag));
        }
        StartOutcome::Started
    }

    fn handle_reply(
        &mut self,
        operation: &mut Operation,
        tag: OperationTag,
        reply: HalReply,
    ) -> ReplyAction {
        let sensor_id = operation.sensor_id;
        let user_id = operation.user_id;
        let success = |result| ReplyAction::Finished(OperationOutcome::Success(result));

        match (&mut operation.kind, reply) {
            (_, HalReply::Error {
                code: HalErrorCode::Canceled,
                ..
            }) => ReplyAction::Finished(OperationOutcome::Cancelled(CancelReason::Caller)),
            (_, HalReply::Error { code, vendor_code }) => {
                warn!(sensor_id = %sensor_id, code = %code, vendor_code, "Driver reported an error");
                ReplyAction::Finished(OperationOutcome::Failed(OperationError::Hardware {
                    code,
                    vendor_code,
                }))
            }
            (_, HalReply::Acquired) => {
                self.state.tracker.record_acquired(user_id);
                ReplyAction::Progress(Progress::Acquired)
            }
            (OperationKind::Enroll { name, .. }, HalReply::EnrollmentProgress {
                template_id,
                remaining,
            }) => {
                if remaining > 0 {
                    return ReplyAction::Progress(Progress::EnrollmentProgress { remaining });
                }
                match self
                    .ctx
                    .store
                    .add(sensor_id, user_id, template_id, name.as_deref())
                {
                    Ok(record) => success(OperationResult::Enrolled {
                        template_id,
                        name: record.name,
                    }),
                    Err(error) => {
                        ReplyAction::Finished(OperationOutcome::Failed(OperationError::storage(&error)))
                    }
                }
            }
            (OperationKind::Authenticate { .. }, HalReply::Authenticated { template_id }) => {
                success(OperationResult::Authenticated { template_id })
            }
            (OperationKind::Authenticate { .. }, HalReply::AuthenticationFailed) => {
                self.state.tracker.record_reject(user_id);
                ReplyAction::Progress(Progress::AuthenticationRejected)
            }
            (OperationKind::Authenticate { .. }, HalReply::LockoutTimed { .. }) => {
                self.lock_out(user_id, LockoutMode::Timed)
            }
            (OperationKind::Authenticate { .. }, HalReply::LockoutPermanent) => {
                self.lock_out(user_id, LockoutMode::Permanent)
            }
            (OperationKind::DetectInteraction, HalReply::InteractionDetected) => {
                success(OperationResult::InteractionDetected)
            }
            (
                OperationKind::Remove { .. } | OperationKind::RemoveAll,
                HalReply::EnrollmentsRemoved(template_ids),
            ) => self.removed(sensor_id, user_id, template_ids),
            (OperationKind::GenerateChallenge, HalReply::ChallengeGenerated { challenge }) => {
                success(OperationResult::ChallengeGenerated { challenge })
            }
            (OperationKind::RevokeChallenge { .. }, HalReply::ChallengeRevoked { challenge }) => {
                success(OperationResult::ChallengeRevoked { challenge })
            }
            (OperationKind::ResetLockout { .. }, HalReply::LockoutCleared) => {
                success(OperationResult::LockoutReset)
            }
            (OperationKind::LoadAuthenticatorId, HalReply::AuthenticatorIdRetrieved(id))
            | (
                OperationKind::InvalidateAuthenticatorId,
                HalReply::AuthenticatorIdInvalidated(id),
            ) => success(OperationResult::AuthenticatorId { id }),
            (OperationKind::InternalCleanup(cleanup), HalReply::EnrollmentsEnumerated(on_driver)) => {
                let report = match reconcile(
                    self.ctx.store,
                    sensor_id,
                    user_id,
                    &on_driver,
                    cleanup.favor_hal_enrollments,
                ) {
                    Ok(report) => report,
                    Err(error) => {
                        return ReplyAction::Finished(OperationOutcome::Failed(
                            OperationError::storage(&error),
                        ));
                    }
                };
                if report.removed_from_driver.is_empty() {
                    return success(OperationResult::Reconciled(report));
                }

                let template_ids = report.removed_from_driver.clone();
                cleanup.report = Some(report);
                let Some(session) = self.session.current(user_id, self.ctx.link) else {
                    return ReplyAction::Finished(OperationOutcome::Failed(
                        OperationError::driver_unavailable("session lost during cleanup"),
                    ));
                };
                match session.submit(tag, HalRequest::RemoveEnrollments { template_ids }) {
                    Ok(()) => ReplyAction::Pending,
                    Err(error) => ReplyAction::Finished(OperationOutcome::Failed(error.into())),
                }
            }
            (OperationKind::InternalCleanup(cleanup), HalReply::EnrollmentsRemoved(_)) => {
                match cleanup.report.take() {
                    Some(report) => success(OperationResult::Reconciled(report)),
                    None => ReplyAction::Pending,
                }
            }
            (kind, reply) => {
                debug!(
                    sensor_id = %sensor_id,
                    kind = %kind,
                    reply = ?reply,
                    "Unexpected reply ignored"
                );
                ReplyAction::Pending
            }
        }
    }

    fn cancel(&mut self, operation: &Operation, tag: OperationTag) {
        let Some(session) = self.session.current(operation.user_id, self.ctx.link) else {
            debug!(sensor_id = %operation.sensor_id, tag = %tag, "No session to cancel on");
            return;
        };
        if let Err(error) = session.cancel(tag) {
            warn!(sensor_id = %operation.sensor_id, tag = %tag, error = %error, "Cancel failed");
        }
    }

    fn on_finished(&mut self, operation: &Operation, completion: &Completion) {
        let user_id = operation.user_id;
        let OperationOutcome::Success(result) = &completion.outcome else {
            return;
        };
        match result {
            OperationResult::Enrolled { template_id, .. } => {
                self.state.enrollments_changed(user_id, *template_id, true);
                self.follow_up(operation);
            }
            OperationResult::Removed { template_ids } if !template_ids.is_empty() => {
                let has_enrollments = self
                    .ctx
                    .store
                    .list(operation.sensor_id, user_id)
                    .map(|records| !records.is_empty())
                    .unwrap_or(false);
                for template_id in template_ids {
                    self.state
                        .enrollments_changed(user_id, *template_id, has_enrollments);
                }
                self.follow_up(operation);
            }
            OperationResult::Authenticated { .. } => self.state.tracker.record_accept(user_id),
            OperationResult::LockoutReset => {
                self.state.lockout.remove(&user_id);
            }
            OperationResult::AuthenticatorId { id } => {
                self.state.authenticator_ids.insert(user_id, *id);
            }
            _ => {}
        }
    }
}
