//! Public handle to a running provider.

use super::{ProviderDump, ProviderMessage, Query};
use crate::error::{ProviderError, Result};
use crate::observer::{BiometricStateEvent, ClientEvents, ClientObserver};
use crate::operation::{Operation, OperationInfo, OperationKind};
use crate::sensor::{SensorDump, TouchEvent};
use biogate_core::{
    ClientToken, Cookie, HardwareAuthToken, LockoutMode, OwnerId, RequestId, SensorId,
    SensorProperties, SensorSelector, TemplateId, UserId,
};
use biogate_hal::{Driver, PointerContext};
use biogate_storage::{TemplateRecord, TemplateStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Who is asking, and for which sensor and user.
///
/// The token identifies the caller; together with the request id it is the
/// identity cancellations and touch events are matched against.
///
/// # Examples
///
/// ```
/// use biogate_scheduler::ClientRequest;
/// use biogate_core::{Cookie, OwnerId, RequestId, SensorId, UserId};
///
/// let request = ClientRequest::new(SensorId::new(1), UserId::new(0), OwnerId::new("com.example").unwrap())
///     .with_request_id(RequestId::new(42))
///     .with_cookie(Cookie::new(7).unwrap());
/// assert_eq!(request.request_id, Some(RequestId::new(42)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub sensor_id: SensorId,
    pub user_id: UserId,
    pub token: ClientToken,
    pub owner: OwnerId,
    /// Assigned by the provider when `None`.
    pub request_id: Option<RequestId>,
    /// Hold the operation until [`ProviderHandle::start_prepared_client`].
    pub cookie: Option<Cookie>,
}

impl ClientRequest {
    pub fn new(sensor_id: SensorId, user_id: UserId, owner: OwnerId) -> Self {
        Self {
            sensor_id,
            user_id,
            token: ClientToken::new(),
            owner,
            request_id: None,
            cookie: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: ClientToken) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = Some(cookie);
        self
    }
}

/// An accepted submission and the stream of its events.
#[derive(Debug)]
pub struct ScheduledOperation {
    pub request_id: RequestId,
    pub token: ClientToken,
    pub events: ClientEvents,
}

/// Cloneable handle to a running provider.
///
/// Methods that schedule or cancel return as soon as the request is queued;
/// outcomes arrive through [`ClientEvents`]. Queries wait for the provider
/// task to answer.
#[derive(Clone)]
pub struct ProviderHandle {
    tx: mpsc::UnboundedSender<ProviderMessage>,
    sensors: Arc<[SensorProperties]>,
    request_ids: Arc<AtomicU64>,
    system_owner: OwnerId,
    driver: Arc<dyn Driver>,
    store: Arc<dyn TemplateStore>,
    state_tx: broadcast::Sender<BiometricStateEvent>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ProviderHandle {
    pub(super) fn new(
        tx: mpsc::UnboundedSender<ProviderMessage>,
        sensors: Vec<SensorProperties>,
        request_ids: Arc<AtomicU64>,
        system_owner: OwnerId,
        driver: Arc<dyn Driver>,
        store: Arc<dyn TemplateStore>,
        state_tx: broadcast::Sender<BiometricStateEvent>,
    ) -> Self {
        Self {
            tx,
            sensors: sensors.into(),
            request_ids,
            system_owner,
            driver,
            store,
            state_tx,
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub(super) fn attach(&self, task: JoinHandle<()>) {
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    fn send(&self, message: ProviderMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| ProviderError::Stopped)
    }

    fn check_sensor(&self, sensor_id: SensorId) -> Result<()> {
        if self.sensors.iter().any(|p| p.sensor_id == sensor_id) {
            Ok(())
        } else {
            Err(ProviderError::UnknownSensor(sensor_id))
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::new(self.request_ids.fetch_add(1, Ordering::Relaxed))
    }

    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(ProviderMessage::Query(build(reply)))?;
        rx.await.map_err(|_| ProviderError::Stopped)
    }

    // Scheduling

    /// Queue an operation with an optional observer.
    ///
    /// A submission with the same token and request id as one already queued
    /// or running is dropped; its observer is never called.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UnknownSensor` for a sensor this provider does
    /// not own and `ProviderError::Stopped` if the provider task has ended.
    pub fn schedule(
        &self,
        request: ClientRequest,
        kind: OperationKind,
        observer: Option<Box<dyn ClientObserver>>,
    ) -> Result<RequestId> {
        self.check_sensor(request.sensor_id)?;
        let request_id = request
            .request_id
            .unwrap_or_else(|| self.next_request_id());
        let mut operation = Operation::new(
            request_id,
            request.token,
            request.owner,
            request.sensor_id,
            request.user_id,
            kind,
        );
        operation.cookie = request.cookie;
        debug!(
            sensor_id = %operation.sensor_id,
            request_id = %request_id,
            kind = %operation.kind,
            "Submitting operation"
        );
        self.send(ProviderMessage::Schedule {
            operation,
            observer,
        })?;
        Ok(request_id)
    }

    /// Queue an operation and return a channel of its events.
    ///
    /// # Errors
    ///
    /// As [`schedule`](Self::schedule).
    pub fn schedule_with_events(
        &self,
        request: ClientRequest,
        kind: OperationKind,
    ) -> Result<ScheduledOperation> {
        let token = request.token;
        let (observer, events) = ClientEvents::channel();
        let request_id = self.schedule(request, kind, Some(Box::new(observer)))?;
        Ok(ScheduledOperation {
            request_id,
            token,
            events,
        })
    }

    /// Enroll a new template, named "Finger N" unless `name` is given.
    pub fn enroll(
        &self,
        request: ClientRequest,
        hat: HardwareAuthToken,
        name: Option<String>,
    ) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::Enroll { hat, name })
    }

    /// Authenticate the user. Unless `allow_background` is set, the operation
    /// is cancelled when its owner leaves the foreground.
    pub fn authenticate(
        &self,
        request: ClientRequest,
        operation_id: u64,
        allow_background: bool,
    ) -> Result<ScheduledOperation> {
        self.schedule_with_events(
            request,
            OperationKind::Authenticate {
                operation_id,
                allow_background,
            },
        )
    }

    pub fn detect_interaction(&self, request: ClientRequest) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::DetectInteraction)
    }

    pub fn remove(
        &self,
        request: ClientRequest,
        template_ids: Vec<TemplateId>,
    ) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::Remove { template_ids })
    }

    /// Remove every template the store lists for the request's user.
    pub fn remove_all(&self, request: ClientRequest) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::RemoveAll)
    }

    pub fn generate_challenge(&self, request: ClientRequest) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::GenerateChallenge)
    }

    pub fn revoke_challenge(
        &self,
        request: ClientRequest,
        challenge: u64,
    ) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::RevokeChallenge { challenge })
    }

    pub fn reset_lockout(
        &self,
        request: ClientRequest,
        hat: Option<HardwareAuthToken>,
    ) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::ResetLockout { hat })
    }

    /// Reload the user's authenticator id on behalf of the framework.
    pub fn load_authenticator_id(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
    ) -> Result<ScheduledOperation> {
        let request = ClientRequest::new(sensor_id, user_id, self.system_owner.clone());
        self.schedule_with_events(request, OperationKind::LoadAuthenticatorId)
    }

    pub fn invalidate_authenticator_id(&self, request: ClientRequest) -> Result<ScheduledOperation> {
        self.schedule_with_events(request, OperationKind::InvalidateAuthenticatorId)
    }

    /// Reconcile the store with the driver for one user on behalf of the framework.
    pub fn schedule_internal_cleanup(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        favor_hal_enrollments: bool,
    ) -> Result<ScheduledOperation> {
        let request = ClientRequest::new(sensor_id, user_id, self.system_owner.clone());
        self.schedule_with_events(
            request,
            OperationKind::internal_cleanup(favor_hal_enrollments),
        )
    }

    // Cancellation and coordination

    /// Cancel an authentication or detection.
    ///
    /// Unknown identities are ignored; cancelling twice is harmless.
    pub fn cancel_authentication(
        &self,
        sensor_id: SensorId,
        token: ClientToken,
        request_id: RequestId,
    ) -> Result<()> {
        self.check_sensor(sensor_id)?;
        self.send(ProviderMessage::Cancel {
            sensor_id,
            token,
            request_id,
            applies: OperationKind::is_authentication_or_detection,
        })
    }

    /// Cancel an enrollment. Same rules as
    /// [`cancel_authentication`](Self::cancel_authentication).
    pub fn cancel_enrollment(
        &self,
        sensor_id: SensorId,
        token: ClientToken,
        request_id: RequestId,
    ) -> Result<()> {
        self.check_sensor(sensor_id)?;
        self.send(ProviderMessage::Cancel {
            sensor_id,
            token,
            request_id,
            applies: OperationKind::is_enrollment,
        })
    }

    /// Release an operation scheduled with `cookie`.
    pub fn start_prepared_client(&self, sensor_id: SensorId, cookie: Cookie) -> Result<()> {
        self.check_sensor(sensor_id)?;
        self.send(ProviderMessage::StartPreparedClient { sensor_id, cookie })
    }

    fn touch(&self, sensor_id: SensorId, request_id: RequestId, event: TouchEvent) -> Result<()> {
        self.check_sensor(sensor_id)?;
        self.send(ProviderMessage::Touch {
            sensor_id,
            request_id,
            event,
        })
    }

    /// Forward a finger-down from the overlay to operation `request_id`.
    ///
    /// Dropped unless that operation is active and takes touch input on an
    /// under-display sensor.
    pub fn on_pointer_down(
        &self,
        sensor_id: SensorId,
        request_id: RequestId,
        pointer: PointerContext,
    ) -> Result<()> {
        self.touch(sensor_id, request_id, TouchEvent::PointerDown(pointer))
    }

    pub fn on_pointer_up(
        &self,
        sensor_id: SensorId,
        request_id: RequestId,
        pointer: PointerContext,
    ) -> Result<()> {
        self.touch(sensor_id, request_id, TouchEvent::PointerUp(pointer))
    }

    pub fn on_ui_ready(&self, sensor_id: SensorId, request_id: RequestId) -> Result<()> {
        self.touch(sensor_id, request_id, TouchEvent::UiReady)
    }

    /// Re-check the foreground policy against every active authentication.
    pub fn on_task_stack_changed(&self) -> Result<()> {
        self.send(ProviderMessage::TaskStackChanged)
    }

    // Properties and store

    pub fn sensor_properties(&self) -> Vec<SensorProperties> {
        self.sensors.to_vec()
    }

    /// Properties of one sensor; `Any` picks the first.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UnknownSensor` for an id this provider does
    /// not own.
    pub fn sensor_properties_for(&self, selector: SensorSelector) -> Result<SensorProperties> {
        match selector {
            SensorSelector::Any => self.sensors.first().cloned().ok_or_else(|| {
                ProviderError::config("provider has no sensors")
            }),
            SensorSelector::Id(sensor_id) => self
                .sensors
                .iter()
                .find(|p| p.sensor_id == sensor_id)
                .cloned()
                .ok_or(ProviderError::UnknownSensor(sensor_id)),
        }
    }

    /// Whether a driver instance is declared on this device.
    pub fn is_hardware_detected(&self) -> bool {
        self.driver.is_declared()
    }

    pub fn enrolled_templates(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
    ) -> Result<Vec<TemplateRecord>> {
        self.check_sensor(sensor_id)?;
        Ok(self.store.list(sensor_id, user_id)?)
    }

    pub fn rename(
        &self,
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        name: &str,
    ) -> Result<()> {
        self.check_sensor(sensor_id)?;
        Ok(self.store.rename(sensor_id, user_id, template_id, name)?)
    }

    // Queries

    /// Last authenticator id loaded for the user, or 0 if none was.
    pub async fn authenticator_id(&self, sensor_id: SensorId, user_id: UserId) -> Result<u64> {
        self.check_sensor(sensor_id)?;
        self.query(|reply| Query::AuthenticatorId {
            sensor_id,
            user_id,
            reply,
        })
        .await
    }

    pub async fn lockout_mode(&self, sensor_id: SensorId, user_id: UserId) -> Result<LockoutMode> {
        self.check_sensor(sensor_id)?;
        self.query(|reply| Query::LockoutMode {
            sensor_id,
            user_id,
            reply,
        })
        .await
    }

    /// The operation currently starting or active on the sensor.
    pub async fn current_client(&self, sensor_id: SensorId) -> Result<Option<OperationInfo>> {
        self.check_sensor(sensor_id)?;
        self.query(|reply| Query::CurrentClient { sensor_id, reply })
            .await
    }

    pub async fn dump(&self) -> Result<ProviderDump> {
        self.query(|reply| Query::Dump { reply }).await
    }

    pub async fn dump_sensor(&self, sensor_id: SensorId) -> Result<SensorDump> {
        self.check_sensor(sensor_id)?;
        self.query(|reply| Query::SensorDump { sensor_id, reply })
            .await?
            .ok_or(ProviderError::UnknownSensor(sensor_id))
    }

    /// Receive biometric state changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BiometricStateEvent> {
        self.state_tx.subscribe()
    }

    /// Stop the provider task and wait for it to end.
    ///
    /// Operations still queued are dropped without completing. Other clones
    /// of the handle get `ProviderError::Stopped` afterwards.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Stopped` if the task had already ended.
    pub async fn shutdown(self) -> Result<()> {
        self.send(ProviderMessage::Shutdown)?;
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            match task.await {
                Ok(()) => {}
                Err(error) if error.is_cancelled() => {}
                Err(error) => warn!(error = %error, "Provider task panicked"),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("sensors", &self.sensors.len())
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}
