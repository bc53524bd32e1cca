//! Provider: the sensors of one driver instance and the task that runs them.
//!
//! All scheduling state lives in a single tokio task. Callers talk to it
//! through a [`ProviderHandle`]; driver callbacks, death notices, connect
//! results and watchdog timers are posted to the same channel, so no state is
//! ever touched from two places.
//!
//! ```text
//!  ProviderHandle ──┐
//!  driver replies ──┤                ┌──► Sensor 1 (scheduler, session)
//!  death notices  ──┼──► mpsc ──► actor
//!  connect result ──┤                └──► Sensor 2 (scheduler, session)
//!  watchdogs      ──┘
//! ```
//!
//! # Driver liveness
//!
//! The driver is connected on demand, when an operation first needs a
//! session. A death notice fails every active and queued operation with
//! `DriverLost`. The next connect after a death is a reconnect: it queues
//! authenticator-id loading and internal cleanup for every known
//! (sensor, user) pair.

mod config;
mod handle;
mod policy;

pub use config::ProviderConfig;
pub use handle::{ClientRequest, ProviderHandle, ScheduledOperation};
pub use policy::{ForegroundPolicy, StaticForegroundPolicy};

use crate::error::{OperationError, ProviderError, Result};
use crate::observer::{BiometricStateEvent, ClientObserver};
use crate::operation::{Operation, OperationInfo, OperationKind};
use crate::sensor::{Effects, FollowUpKind, Sensor, SensorContext, SensorDump, TouchEvent};
use crate::session::{ConnectKind, DriverLink};
use biogate_core::constants::SYSTEM_OWNER;
use biogate_core::{
    ClientToken, Cookie, LockoutMode, OperationTag, OwnerId, RequestId, SensorId,
    SensorProperties, UserId,
};
use biogate_hal::{DeathRecipient, Driver, EventSink, HalConnection, HalError, HalEvent};
use biogate_storage::TemplateStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

const STATE_CHANNEL_CAPACITY: usize = 64;

/// Messages processed by the provider task.
pub(crate) enum ProviderMessage {
    Schedule {
        operation: Operation,
        observer: Option<Box<dyn ClientObserver>>,
    },
    Cancel {
        sensor_id: SensorId,
        token: ClientToken,
        request_id: RequestId,
        applies: fn(&OperationKind) -> bool,
    },
    StartPreparedClient {
        sensor_id: SensorId,
        cookie: Cookie,
    },
    Touch {
        sensor_id: SensorId,
        request_id: RequestId,
        event: TouchEvent,
    },
    TaskStackChanged,
    Hal(HalEvent),
    ConnectFinished {
        generation: u64,
        result: biogate_hal::Result<Arc<dyn HalConnection>>,
    },
    DriverDied {
        generation: u64,
    },
    WatchdogExpired {
        sensor_id: SensorId,
        tag: OperationTag,
    },
    Query(Query),
    Shutdown,
}

/// Read-only requests answered by the provider task.
pub(crate) enum Query {
    CurrentClient {
        sensor_id: SensorId,
        reply: oneshot::Sender<Option<OperationInfo>>,
    },
    LockoutMode {
        sensor_id: SensorId,
        user_id: UserId,
        reply: oneshot::Sender<LockoutMode>,
    },
    AuthenticatorId {
        sensor_id: SensorId,
        user_id: UserId,
        reply: oneshot::Sender<u64>,
    },
    Dump {
        reply: oneshot::Sender<ProviderDump>,
    },
    SensorDump {
        sensor_id: SensorId,
        reply: oneshot::Sender<Option<SensorDump>>,
    },
}

/// Diagnostic view of a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDump {
    pub instance_name: String,
    pub driver_connected: bool,
    pub generation: Option<u64>,
    pub death_count: u32,
    pub sensors: Vec<SensorDump>,
}

/// A provider that has been built but not started.
///
/// # Examples
///
/// ```
/// use biogate_scheduler::{ClientRequest, Provider, ProviderConfig, StaticForegroundPolicy};
/// use biogate_scheduler::OperationOutcome;
/// use biogate_core::{OwnerId, SensorId, SensorProperties, UserId};
/// use biogate_hal::mock::MockDriver;
/// use biogate_storage::InMemoryTemplateStore;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> biogate_scheduler::Result<()> {
///     let (driver, _mock) = MockDriver::new();
///     let provider = Provider::new(
///         ProviderConfig::default(),
///         vec![SensorProperties::new(SensorId::new(1))],
///         Arc::new(driver),
///         Arc::new(InMemoryTemplateStore::new()),
///         Arc::new(StaticForegroundPolicy::default()),
///     )?;
///     let handle = provider.start();
///
///     let request = ClientRequest::new(SensorId::new(1), UserId::new(0), OwnerId::new("com.example")?);
///     let mut scheduled = handle.generate_challenge(request)?;
///     let completion = scheduled.events.finished().await.expect("completed");
///     assert!(matches!(completion.outcome, OperationOutcome::Success(_)));
///
///     handle.shutdown().await
/// }
/// ```
pub struct Provider {
    actor: ProviderActor,
    tx: mpsc::UnboundedSender<ProviderMessage>,
    properties: Vec<SensorProperties>,
    state_tx: broadcast::Sender<BiometricStateEvent>,
}

impl Provider {
    /// Build a provider for `sensors`, all served by `driver`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Config` if `sensors` is empty or repeats an
    /// id, and the validation error of any sensor or of `config`.
    pub fn new(
        config: ProviderConfig,
        sensors: Vec<SensorProperties>,
        driver: Arc<dyn Driver>,
        store: Arc<dyn TemplateStore>,
        policy: Arc<dyn ForegroundPolicy>,
    ) -> Result<Self> {
        config.validate()?;
        if sensors.is_empty() {
            return Err(ProviderError::config("at least one sensor is required"));
        }
        let mut ids = BTreeSet::new();
        for props in &sensors {
            props.validate()?;
            if !ids.insert(props.sensor_id) {
                return Err(ProviderError::config(format!(
                    "duplicate sensor id {}",
                    props.sensor_id
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let weak = tx.downgrade();
        let sink: EventSink = Arc::new(move |event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(ProviderMessage::Hal(event));
            }
        });

        let sensor_map = sensors
            .iter()
            .map(|props| {
                let sensor = Sensor::new(
                    props.clone(),
                    config.history_capacity,
                    Arc::clone(&sink),
                    state_tx.clone(),
                );
                (props.sensor_id, sensor)
            })
            .collect();

        let actor = ProviderActor {
            system_owner: OwnerId::new(SYSTEM_OWNER)?,
            config,
            sensors: sensor_map,
            link: DriverLink::new(),
            effects: Effects::default(),
            driver,
            store,
            policy,
            request_ids: Arc::new(AtomicU64::new(1)),
            tx: tx.downgrade(),
            rx,
        };

        Ok(Self {
            actor,
            tx,
            properties: sensors,
            state_tx,
        })
    }

    /// Spawn the provider task. Must be called inside a tokio runtime.
    pub fn start(self) -> ProviderHandle {
        let handle = ProviderHandle::new(
            self.tx,
            self.properties,
            Arc::clone(&self.actor.request_ids),
            self.actor.system_owner.clone(),
            Arc::clone(&self.actor.driver),
            Arc::clone(&self.actor.store),
            self.state_tx,
        );
        let task = tokio::spawn(self.actor.run());
        handle.attach(task);
        handle
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("instance_name", &self.actor.config.instance_name)
            .field("sensors", &self.properties.len())
            .finish_non_exhaustive()
    }
}

struct ProviderActor {
    config: ProviderConfig,
    system_owner: OwnerId,
    sensors: BTreeMap<SensorId, Sensor>,
    link: DriverLink,
    effects: Effects,
    driver: Arc<dyn Driver>,
    store: Arc<dyn TemplateStore>,
    policy: Arc<dyn ForegroundPolicy>,
    request_ids: Arc<AtomicU64>,
    tx: mpsc::WeakUnboundedSender<ProviderMessage>,
    rx: mpsc::UnboundedReceiver<ProviderMessage>,
}

impl ProviderActor {
    async fn run(mut self) {
        info!(
            instance = %self.config.instance_name,
            sensors = self.sensors.len(),
            "Provider started"
        );
        while let Some(message) = self.rx.recv().await {
            if matches!(message, ProviderMessage::Shutdown) {
                break;
            }
            self.handle(message);
            self.flush_effects();
        }
        info!(instance = %self.config.instance_name, "Provider stopped");
    }

    fn handle(&mut self, message: ProviderMessage) {
        match message {
            ProviderMessage::Schedule {
                operation,
                observer,
            } => {
                self.with_sensor(operation.sensor_id, |sensor, ctx| {
                    sensor.schedule(operation, observer, ctx)
                });
            }
            ProviderMessage::Cancel {
                sensor_id,
                token,
                request_id,
                applies,
            } => {
                self.with_sensor(sensor_id, |sensor, ctx| {
                    sensor.cancel(&token, request_id, applies, ctx)
                });
            }
            ProviderMessage::StartPreparedClient { sensor_id, cookie } => {
                self.with_sensor(sensor_id, |sensor, ctx| {
                    sensor.start_prepared_client(cookie, ctx)
                });
            }
            ProviderMessage::Touch {
                sensor_id,
                request_id,
                event,
            } => {
                let result = self.with_sensor(sensor_id, |sensor, ctx| {
                    sensor.touch(request_id, event, &*ctx.link)
                });
                if let Some(Err(error)) = result {
                    debug!(sensor_id = %sensor_id, request_id = %request_id, error = %error, "Touch event dropped");
                }
            }
            ProviderMessage::TaskStackChanged => self.on_task_stack_changed(),
            ProviderMessage::Hal(event) => {
                self.with_sensor(event.sensor_id, |sensor, ctx| {
                    sensor.on_hal_event(event.user_id, event.tag, event.reply, ctx)
                });
            }
            ProviderMessage::ConnectFinished { generation, result } => {
                self.on_connect_finished(generation, result)
            }
            ProviderMessage::DriverDied { generation } => self.on_driver_died(generation),
            ProviderMessage::WatchdogExpired { sensor_id, tag } => {
                self.with_sensor(sensor_id, |sensor, ctx| sensor.watchdog_expired(tag, ctx));
            }
            ProviderMessage::Query(query) => self.answer(query),
            ProviderMessage::Shutdown => {}
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::CurrentClient { sensor_id, reply } => {
                let _ = reply.send(
                    self.sensors
                        .get(&sensor_id)
                        .and_then(Sensor::current_client),
                );
            }
            Query::LockoutMode {
                sensor_id,
                user_id,
                reply,
            } => {
                let mode = self
                    .sensors
                    .get(&sensor_id)
                    .map(|s| s.lockout_mode(user_id))
                    .unwrap_or_default();
                let _ = reply.send(mode);
            }
            Query::AuthenticatorId {
                sensor_id,
                user_id,
                reply,
            } => {
                let id = self
                    .sensors
                    .get(&sensor_id)
                    .map(|s| s.authenticator_id(user_id))
                    .unwrap_or(biogate_core::constants::UNKNOWN_AUTHENTICATOR_ID);
                let _ = reply.send(id);
            }
            Query::Dump { reply } => {
                let _ = reply.send(self.dump());
            }
            Query::SensorDump { sensor_id, reply } => {
                let _ = reply.send(self.sensors.get(&sensor_id).map(Sensor::dump));
            }
        }
    }

    fn dump(&self) -> ProviderDump {
        ProviderDump {
            instance_name: self.config.instance_name.clone(),
            driver_connected: self.link.is_live(),
            generation: self.link.generation(),
            death_count: self.link.death_count(),
            sensors: self.sensors.values().map(Sensor::dump).collect(),
        }
    }

    fn with_sensor<T>(
        &mut self,
        sensor_id: SensorId,
        f: impl FnOnce(&mut Sensor, &mut SensorContext<'_>) -> T,
    ) -> Option<T> {
        let Some(sensor) = self.sensors.get_mut(&sensor_id) else {
            warn!(sensor_id = %sensor_id, "Message for unknown sensor dropped");
            return None;
        };
        let mut ctx = SensorContext {
            link: &mut self.link,
            store: self.store.as_ref(),
            effects: &mut self.effects,
            reply_timeout: self.config.reply_timeout,
        };
        Some(f(sensor, &mut ctx))
    }

    fn for_each_sensor(&mut self, mut f: impl FnMut(&mut Sensor, &mut SensorContext<'_>)) {
        for sensor in self.sensors.values_mut() {
            let mut ctx = SensorContext {
                link: &mut self.link,
                store: self.store.as_ref(),
                effects: &mut self.effects,
                reply_timeout: self.config.reply_timeout,
            };
            f(sensor, &mut ctx);
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::new(self.request_ids.fetch_add(1, Ordering::Relaxed))
    }

    /// Schedule an operation owned by the framework itself.
    fn schedule_internal(&mut self, sensor_id: SensorId, user_id: UserId, kind: OperationKind) {
        let operation = Operation::new(
            self.next_request_id(),
            ClientToken::new(),
            self.system_owner.clone(),
            sensor_id,
            user_id,
            kind,
        );
        self.with_sensor(sensor_id, |sensor, ctx| sensor.schedule(operation, None, ctx));
    }

    /// Act on everything sensors asked for while handling the last message.
    fn flush_effects(&mut self) {
        loop {
            if self.link.take_connect_request() {
                self.spawn_connect();
            }
            let effects = std::mem::take(&mut self.effects);
            if effects.is_empty() {
                return;
            }
            for (sensor_id, tag) in effects.watchdogs {
                self.arm_watchdog(sensor_id, tag);
            }
            for follow_up in effects.follow_ups {
                let kind = match follow_up.kind {
                    FollowUpKind::LoadAuthenticatorId => OperationKind::LoadAuthenticatorId,
                    FollowUpKind::InternalCleanup => OperationKind::internal_cleanup(false),
                };
                self.schedule_internal(follow_up.sensor_id, follow_up.user_id, kind);
            }
        }
    }

    fn arm_watchdog(&self, sensor_id: SensorId, tag: OperationTag) {
        let Some(timeout) = self.config.reply_timeout else {
            return;
        };
        let weak = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(ProviderMessage::WatchdogExpired { sensor_id, tag });
            }
        });
    }

    fn spawn_connect(&self) {
        let generation = self.link.next_generation();
        let driver = Arc::clone(&self.driver);
        let timeout = self.config.discovery_timeout;
        let weak = self.tx.clone();
        info!(
            instance = %self.config.instance_name,
            generation,
            "Connecting to driver"
        );
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, driver.connect()).await {
                Ok(result) => result,
                Err(_) => Err(HalError::timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                )),
            };
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(ProviderMessage::ConnectFinished { generation, result });
            }
        });
    }

    fn on_connect_finished(
        &mut self,
        generation: u64,
        result: biogate_hal::Result<Arc<dyn HalConnection>>,
    ) {
        let connection = match result {
            Ok(connection) => connection,
            Err(error) => return self.connect_failed(error),
        };

        let weak = self.tx.clone();
        let recipient = DeathRecipient::new(move || {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(ProviderMessage::DriverDied { generation });
            }
        });
        if let Err(error) = connection.link_to_death(recipient) {
            return self.connect_failed(error);
        }

        let kind = self.link.connected(generation, connection);
        info!(
            instance = %self.config.instance_name,
            generation,
            reconnect = kind == ConnectKind::Reconnect,
            "Driver connected"
        );
        if kind == ConnectKind::Reconnect {
            self.resync();
        }
        self.for_each_sensor(|sensor, ctx| sensor.resume(ctx));
    }

    fn connect_failed(&mut self, error: HalError) {
        warn!(
            instance = %self.config.instance_name,
            error = %error,
            "Driver connection failed"
        );
        self.link.connect_failed();
        let error = OperationError::from(error);
        self.for_each_sensor(|sensor, ctx| sensor.fail_starting(error.clone(), ctx));
    }

    /// Reload ids and reconcile every known (sensor, user) after a restart.
    fn resync(&mut self) {
        let mut pairs = Vec::new();
        for (sensor_id, sensor) in &self.sensors {
            let mut users: BTreeSet<UserId> = self.config.users.iter().copied().collect();
            users.extend(sensor.known_users());
            match self.store.users(*sensor_id) {
                Ok(stored) => users.extend(stored),
                Err(error) => {
                    warn!(sensor_id = %sensor_id, error = %error, "Could not list stored users")
                }
            }
            pairs.extend(users.into_iter().map(|user| (*sensor_id, user)));
        }

        info!(
            instance = %self.config.instance_name,
            pairs = pairs.len(),
            "Driver restarted, resynchronizing"
        );
        let favor = self.config.favor_hal_enrollments_on_reconnect;
        for (sensor_id, user_id) in pairs {
            self.schedule_internal(sensor_id, user_id, OperationKind::LoadAuthenticatorId);
            self.schedule_internal(sensor_id, user_id, OperationKind::internal_cleanup(favor));
        }
    }

    fn on_driver_died(&mut self, generation: u64) {
        if !self.link.died(generation) {
            debug!(generation, "Stale death notice ignored");
            return;
        }
        warn!(
            instance = %self.config.instance_name,
            generation,
            deaths = self.link.death_count(),
            "Driver died"
        );
        self.for_each_sensor(|sensor, ctx| {
            sensor.on_driver_died(ctx);
        });
    }

    fn on_task_stack_changed(&mut self) {
        let Some(foreground) = self.policy.current_foreground_owner() else {
            debug!("No foreground owner, nothing to enforce");
            return;
        };
        let trusted = self.config.trusted_owners.clone();
        self.for_each_sensor(|sensor, ctx| {
            sensor.enforce_foreground(&foreground, &trusted, ctx);
        });
    }
}
