//! Mock driver implementation for testing and development.
//!
//! The driver keeps an in-memory model of enrollments and authenticator ids
//! per (sensor, user) and either answers every request by itself
//! ([`ReplyMode::Automatic`]) or records requests and waits for the test to
//! answer them ([`ReplyMode::Manual`]).

use crate::{
    HalError, Result,
    traits::{Driver, HalConnection, HalSession},
    types::{DeathRecipient, HalReply, HalRequest, SessionCallback},
};
use biogate_core::{OperationTag, SensorId, TemplateId, UserId};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_INSTANCE_NAME: &str = "default";
const FIRST_GENERATED_VALUE: u64 = 0x5eed_0001;

/// How the mock answers submitted requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyMode {
    /// Every request is answered immediately from the in-memory model.
    #[default]
    Automatic,

    /// Requests are recorded; replies are injected through the handle.
    Manual,
}

/// A request as seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub sensor_id: SensorId,
    pub user_id: UserId,
    pub tag: OperationTag,
    pub request: HalRequest,
}

/// A cancel as seen by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedCancel {
    pub sensor_id: SensorId,
    pub user_id: UserId,
    pub tag: OperationTag,
}

struct LiveConnection {
    id: u64,
    recipient: Option<DeathRecipient>,
}

struct MockState {
    instance_name: String,
    declared: bool,
    available: bool,
    permission_granted: bool,
    link_to_death_fails: bool,
    acknowledge_cancel: bool,
    connect_delay: Option<Duration>,
    reply_mode: ReplyMode,
    connection: Option<LiveConnection>,
    next_connection_id: u64,
    connect_count: u32,
    enrollments: HashMap<(SensorId, UserId), Vec<TemplateId>>,
    authenticator_ids: HashMap<(SensorId, UserId), u64>,
    next_template_id: u32,
    next_value: u64,
    sessions: HashMap<(SensorId, UserId), SessionCallback>,
    requests: Vec<RecordedRequest>,
    cancels: Vec<RecordedCancel>,
}

impl MockState {
    fn new(instance_name: String) -> Self {
        Self {
            instance_name,
            declared: true,
            available: true,
            permission_granted: true,
            link_to_death_fails: false,
            acknowledge_cancel: true,
            connect_delay: None,
            reply_mode: ReplyMode::Automatic,
            connection: None,
            next_connection_id: 1,
            connect_count: 0,
            enrollments: HashMap::new(),
            authenticator_ids: HashMap::new(),
            next_template_id: 1,
            next_value: FIRST_GENERATED_VALUE,
            sessions: HashMap::new(),
            requests: Vec::new(),
            cancels: Vec::new(),
        }
    }

    fn is_live(&self, connection_id: u64) -> bool {
        self.connection.as_ref().map(|c| c.id) == Some(connection_id)
    }

    fn generate_value(&mut self) -> u64 {
        let value = self.next_value;
        self.next_value = self.next_value.wrapping_add(1);
        value
    }

    /// Replies the model produces for one request.
    fn automatic_replies(
        &mut self,
        sensor_id: SensorId,
        user_id: UserId,
        request: &HalRequest,
    ) -> Vec<HalReply> {
        let key = (sensor_id, user_id);
        match request {
            HalRequest::GenerateChallenge => vec![HalReply::ChallengeGenerated {
                challenge: self.generate_value(),
            }],
            HalRequest::RevokeChallenge { challenge } => vec![HalReply::ChallengeRevoked {
                challenge: *challenge,
            }],
            HalRequest::Enroll { .. } => {
                let template_id = TemplateId::new(self.next_template_id);
                self.next_template_id += 1;
                self.enrollments.entry(key).or_default().push(template_id);
                let authenticator_id = self.generate_value();
                self.authenticator_ids.insert(key, authenticator_id);
                vec![
                    HalReply::Acquired,
                    HalReply::EnrollmentProgress {
                        template_id,
                        remaining: 1,
                    },
                    HalReply::Acquired,
                    HalReply::EnrollmentProgress {
                        template_id,
                        remaining: 0,
                    },
                ]
            }
            HalRequest::Authenticate { .. } => {
                match self.enrollments.get(&key).and_then(|t| t.first()) {
                    Some(&template_id) => {
                        vec![HalReply::Acquired, HalReply::Authenticated { template_id }]
                    }
                    None => vec![HalReply::Acquired, HalReply::AuthenticationFailed],
                }
            }
            HalRequest::DetectInteraction => vec![HalReply::InteractionDetected],
            HalRequest::EnumerateEnrollments => vec![HalReply::EnrollmentsEnumerated(
                self.enrollments.get(&key).cloned().unwrap_or_default(),
            )],
            HalRequest::RemoveEnrollments { template_ids } => {
                if let Some(enrolled) = self.enrollments.get_mut(&key) {
                    enrolled.retain(|t| !template_ids.contains(t));
                }
                vec![HalReply::EnrollmentsRemoved(template_ids.clone())]
            }
            HalRequest::GetAuthenticatorId => vec![HalReply::AuthenticatorIdRetrieved(
                self.authenticator_ids.get(&key).copied().unwrap_or(0),
            )],
            HalRequest::InvalidateAuthenticatorId => {
                let id = self.generate_value();
                self.authenticator_ids.insert(key, id);
                vec![HalReply::AuthenticatorIdInvalidated(id)]
            }
            HalRequest::ResetLockout { .. } => vec![HalReply::LockoutCleared],
            HalRequest::PointerDown(_) | HalRequest::PointerUp(_) | HalRequest::UiReady => {
                Vec::new()
            }
        }
    }
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock driver for testing and development.
///
/// # Examples
///
/// ```
/// use biogate_hal::mock::MockDriver;
/// use biogate_hal::Driver;
///
/// #[tokio::main]
/// async fn main() -> biogate_hal::Result<()> {
///     let (driver, handle) = MockDriver::new();
///
///     let _connection = driver.connect().await?;
///     assert!(handle.is_connected());
///
///     assert!(handle.kill());
///     assert!(!handle.is_connected());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MockDriver {
    state: SharedState,
    instance_name: String,
}

impl MockDriver {
    /// Create a mock driver for the default instance.
    ///
    /// Returns the driver and a handle that controls it.
    pub fn new() -> (Self, MockDriverHandle) {
        Self::with_instance_name(DEFAULT_INSTANCE_NAME)
    }

    /// Create a mock driver with a custom instance name.
    pub fn with_instance_name(name: impl Into<String>) -> (Self, MockDriverHandle) {
        let instance_name = name.into();
        let state = Arc::new(Mutex::new(MockState::new(instance_name.clone())));
        let driver = Self {
            state: Arc::clone(&state),
            instance_name,
        };
        (driver, MockDriverHandle { state })
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new().0
    }
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver").finish_non_exhaustive()
    }
}

impl Driver for MockDriver {
    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn is_declared(&self) -> bool {
        lock(&self.state).declared
    }

    fn connect(&self) -> BoxFuture<'static, Result<Arc<dyn HalConnection>>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let delay = lock(&state).connect_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut guard = lock(&state);
            if !guard.available || !guard.declared {
                return Err(HalError::unavailable(guard.instance_name.clone()));
            }
            let id = guard.next_connection_id;
            guard.next_connection_id += 1;
            guard.connect_count += 1;
            guard.connection = Some(LiveConnection {
                id,
                recipient: None,
            });
            drop(guard);

            tracing::debug!(connection_id = id, "Mock driver connected");
            let connection: Arc<dyn HalConnection> = Arc::new(MockConnection { state, id });
            Ok(connection)
        })
    }
}

struct MockConnection {
    state: SharedState,
    id: u64,
}

impl HalConnection for MockConnection {
    fn create_session(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        callback: SessionCallback,
    ) -> Result<Arc<dyn HalSession>> {
        let mut state = lock(&self.state);
        if !state.is_live(self.id) {
            return Err(HalError::disconnected("connection is dead"));
        }
        if !state.permission_granted {
            return Err(HalError::permission_denied(format!(
                "no access to sensor {}",
                sensor_id
            )));
        }
        state.sessions.insert((sensor_id, user_id), callback.clone());
        Ok(Arc::new(MockSession {
            state: Arc::clone(&self.state),
            connection_id: self.id,
            sensor_id,
            user_id,
            callback,
        }))
    }

    fn link_to_death(&self, recipient: DeathRecipient) -> Result<()> {
        let mut state = lock(&self.state);
        if state.link_to_death_fails {
            return Err(HalError::link_to_death("driver refused registration"));
        }
        match state.connection.as_mut() {
            Some(connection) if connection.id == self.id => {
                connection.recipient = Some(recipient);
                Ok(())
            }
            _ => Err(HalError::link_to_death("connection is dead")),
        }
    }
}

struct MockSession {
    state: SharedState,
    connection_id: u64,
    sensor_id: SensorId,
    user_id: UserId,
    callback: SessionCallback,
}

impl HalSession for MockSession {
    fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn submit(&self, tag: OperationTag, request: HalRequest) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.is_live(self.connection_id) {
            return Err(HalError::disconnected("connection is dead"));
        }
        state.requests.push(RecordedRequest {
            sensor_id: self.sensor_id,
            user_id: self.user_id,
            tag,
            request: request.clone(),
        });
        let replies = match state.reply_mode {
            ReplyMode::Automatic => state.automatic_replies(self.sensor_id, self.user_id, &request),
            ReplyMode::Manual => Vec::new(),
        };
        drop(state);

        for reply in replies {
            self.callback.emit(Some(tag), reply);
        }
        Ok(())
    }

    fn cancel(&self, tag: OperationTag) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.is_live(self.connection_id) {
            return Err(HalError::disconnected("connection is dead"));
        }
        state.cancels.push(RecordedCancel {
            sensor_id: self.sensor_id,
            user_id: self.user_id,
            tag,
        });
        let acknowledge = state.acknowledge_cancel;
        drop(state);

        if acknowledge {
            self.callback.emit(Some(tag), HalReply::canceled());
        }
        Ok(())
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        let key = (self.sensor_id, self.user_id);
        if state.is_live(self.connection_id) {
            state.sessions.remove(&key);
        }
    }
}

/// Handle for controlling a mock driver.
///
/// # Examples
///
/// ```
/// use biogate_hal::mock::{MockDriver, ReplyMode};
/// use biogate_core::{SensorId, TemplateId, UserId};
///
/// let (_driver, handle) = MockDriver::new();
/// handle.set_reply_mode(ReplyMode::Manual);
/// handle.add_enrollment(SensorId::new(1), UserId::new(0), TemplateId::new(4));
///
/// assert_eq!(
///     handle.enrollments(SensorId::new(1), UserId::new(0)),
///     vec![TemplateId::new(4)]
/// );
/// ```
#[derive(Clone)]
pub struct MockDriverHandle {
    state: SharedState,
}

impl MockDriverHandle {
    /// Make the instance reachable or unreachable for future connects.
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    /// Declare or undeclare the instance.
    pub fn set_declared(&self, declared: bool) {
        lock(&self.state).declared = declared;
    }

    /// Grant or deny session creation.
    pub fn set_permission_granted(&self, granted: bool) {
        lock(&self.state).permission_granted = granted;
    }

    /// Make death registration fail on future connections.
    pub fn set_link_to_death_fails(&self, fails: bool) {
        lock(&self.state).link_to_death_fails = fails;
    }

    /// Whether a cancel is answered with a `Canceled` reply. A driver that
    /// ignores cancels models a stalled sensor.
    pub fn set_acknowledge_cancel(&self, acknowledge: bool) {
        lock(&self.state).acknowledge_cancel = acknowledge;
    }

    /// Delay every connect attempt.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        lock(&self.state).connect_delay = delay;
    }

    pub fn set_reply_mode(&self, mode: ReplyMode) {
        lock(&self.state).reply_mode = mode;
    }

    /// Add a template to the driver's enrollment set.
    pub fn add_enrollment(&self, sensor_id: SensorId, user_id: UserId, template_id: TemplateId) {
        let mut state = lock(&self.state);
        state
            .enrollments
            .entry((sensor_id, user_id))
            .or_default()
            .push(template_id);
        state.next_template_id = state.next_template_id.max(template_id.as_u32() + 1);
    }

    /// Templates the driver holds for a sensor and user.
    pub fn enrollments(&self, sensor_id: SensorId, user_id: UserId) -> Vec<TemplateId> {
        lock(&self.state)
            .enrollments
            .get(&(sensor_id, user_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_authenticator_id(&self, sensor_id: SensorId, user_id: UserId, id: u64) {
        lock(&self.state)
            .authenticator_ids
            .insert((sensor_id, user_id), id);
    }

    pub fn authenticator_id(&self, sensor_id: SensorId, user_id: UserId) -> Option<u64> {
        lock(&self.state)
            .authenticator_ids
            .get(&(sensor_id, user_id))
            .copied()
    }

    /// All requests submitted so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// Number of requests with the given [`HalRequest::name`].
    pub fn request_count(&self, name: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.request.name() == name)
            .count()
    }

    /// The most recent request that expects a reply.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        lock(&self.state)
            .requests
            .iter()
            .rev()
            .find(|r| r.request.expects_reply())
            .cloned()
    }

    pub fn clear_requests(&self) {
        lock(&self.state).requests.clear();
    }

    /// All cancels received so far, in order.
    pub fn cancels(&self) -> Vec<RecordedCancel> {
        lock(&self.state).cancels.clone()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> u32 {
        lock(&self.state).connect_count
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connection.is_some()
    }

    /// Inject a reply on the session for a sensor and user.
    ///
    /// # Errors
    ///
    /// Returns an error if no session is open for the pair.
    pub fn reply(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        tag: Option<OperationTag>,
        reply: HalReply,
    ) -> Result<()> {
        let callback = lock(&self.state)
            .sessions
            .get(&(sensor_id, user_id))
            .cloned()
            .ok_or_else(|| {
                HalError::Other(format!(
                    "no session for sensor {} user {}",
                    sensor_id, user_id
                ))
            })?;
        callback.emit(tag, reply);
        Ok(())
    }

    /// Answer the most recent request that expects a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing was submitted yet or its session is gone.
    pub fn reply_to_last(&self, reply: HalReply) -> Result<()> {
        let last = self
            .last_request()
            .ok_or_else(|| HalError::Other("no request to reply to".to_string()))?;
        self.reply(last.sensor_id, last.user_id, Some(last.tag), reply)
    }

    /// Kill the driver process.
    ///
    /// Drops the live connection and notifies its death recipient. Returns
    /// `false` if there was no live connection.
    pub fn kill(&self) -> bool {
        let mut state = lock(&self.state);
        let Some(connection) = state.connection.take() else {
            return false;
        };
        state.sessions.clear();
        drop(state);

        tracing::debug!(connection_id = connection.id, "Mock driver killed");
        if let Some(recipient) = connection.recipient {
            recipient.notify();
        }
        true
    }
}

impl std::fmt::Debug for MockDriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriverHandle").finish_non_exhaustive()
    }
}
