//! Shared fixtures for provider integration tests.
//!
//! Every test gets a provider wired to a [`MockDriver`], an in-memory store
//! and a hand-set foreground policy, all reachable from [`TestProvider`].

#![allow(dead_code)]

use biogate_core::{HardwareAuthToken, OwnerId, SensorId, SensorProperties, UserId};
use biogate_hal::mock::{MockDriver, MockDriverHandle};
use biogate_scheduler::{
    ClientEvent, ClientEvents, ClientRequest, Completion, OperationOutcome, Provider,
    ProviderConfig, ProviderHandle, StaticForegroundPolicy,
};
use biogate_storage::InMemoryTemplateStore;
use std::sync::Arc;
use std::time::Duration;

pub const SENSOR: SensorId = SensorId::new(1);
pub const USER: UserId = UserId::new(0);
pub const APP: &str = "com.example.app";

pub struct TestProvider {
    pub handle: ProviderHandle,
    pub mock: MockDriverHandle,
    pub store: Arc<InMemoryTemplateStore>,
    pub policy: Arc<StaticForegroundPolicy>,
}

impl TestProvider {
    pub fn start() -> Self {
        Self::with(ProviderConfig::default(), vec![SensorProperties::new(SENSOR)])
    }

    pub fn with(config: ProviderConfig, sensors: Vec<SensorProperties>) -> Self {
        let (driver, mock) = MockDriver::new();
        Self::with_driver(config, sensors, driver, mock)
    }

    /// Start with a driver the test configured before the provider exists.
    pub fn with_driver(
        config: ProviderConfig,
        sensors: Vec<SensorProperties>,
        driver: MockDriver,
        mock: MockDriverHandle,
    ) -> Self {
        let store = Arc::new(InMemoryTemplateStore::new());
        let policy = Arc::new(StaticForegroundPolicy::default());
        let handle = Provider::new(
            config,
            sensors,
            Arc::new(driver),
            store.clone(),
            policy.clone(),
        )
        .unwrap()
        .start();
        Self {
            handle,
            mock,
            store,
            policy,
        }
    }

    /// Wait until the provider task has processed everything sent so far.
    pub async fn barrier(&self) {
        self.handle.dump().await.unwrap();
    }

    /// Wait until the sensor has nothing current or queued.
    pub async fn idle(&self) {
        for _ in 0..1000 {
            let dump = self.handle.dump_sensor(SENSOR).await.unwrap();
            if dump.scheduler.current.is_none() && dump.scheduler.queued.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("sensor never became idle");
    }
}

pub fn owner(name: &str) -> OwnerId {
    OwnerId::new(name).unwrap()
}

pub fn request() -> ClientRequest {
    ClientRequest::new(SENSOR, USER, owner(APP))
}

pub fn hat() -> HardwareAuthToken {
    HardwareAuthToken::new(vec![0x42; 32]).unwrap()
}

/// Poll `condition` until it holds, sleeping between checks so paused
/// clocks can advance.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}

pub async fn finished(events: &mut ClientEvents) -> Completion {
    tokio::time::timeout(Duration::from_secs(30), events.finished())
        .await
        .expect("operation did not finish in time")
        .expect("operation dropped without completing")
}

pub async fn outcome(events: &mut ClientEvents) -> OperationOutcome {
    finished(events).await.outcome
}

/// Drain events until the completion, keeping everything seen.
pub async fn all_events(events: &mut ClientEvents) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        let done = matches!(event, ClientEvent::Finished(_));
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}
