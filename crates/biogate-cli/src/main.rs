//! `biogate` command line entry point.

mod cli;

use anyhow::{Context, Result};
use biogate_core::{
    HardwareAuthToken, OwnerId, SensorId, SensorProperties, SensorType, UserId,
};
use biogate_hal::mock::MockDriver;
use biogate_scheduler::{
    ClientEvents, ClientRequest, OperationOutcome, Provider, ProviderConfig, ProviderDump,
    ProviderHandle, StaticForegroundPolicy,
};
use biogate_storage::{InMemoryTemplateStore, JsonFileTemplateStore, TemplateStore};
use clap::Parser;
use cli::{Cli, Commands, DemoArgs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_OWNER: &str = "com.example.demo";
const IDLE_POLL_ATTEMPTS: u32 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo(args) => demo(args).await,
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&ProviderConfig::default())?);
            Ok(())
        }
    }
}

async fn demo(args: DemoArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => ProviderConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ProviderConfig::default(),
    };
    let sensors = match &args.sensors {
        Some(path) => load_sensors(path)?,
        None => vec![SensorProperties::new(SensorId::new(1)).with_sensor_type(SensorType::UdfpsOptical)],
    };
    let store: Arc<dyn TemplateStore> = match &args.store {
        Some(path) => Arc::new(
            JsonFileTemplateStore::open(path)
                .with_context(|| format!("opening template store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryTemplateStore::new()),
    };

    let sensor_id = sensors
        .first()
        .map(|props| props.sensor_id)
        .context("no sensors defined")?;
    let user_id = UserId::new(args.user);
    let (driver, mock) = MockDriver::with_instance_name(config.instance_name.clone());
    let handle = Provider::new(
        config,
        sensors,
        Arc::new(driver),
        store,
        Arc::new(StaticForegroundPolicy::default()),
    )?
    .start();

    let mut state = handle.subscribe();
    let state_task = tokio::spawn(async move {
        while let Ok(event) = state.recv().await {
            info!(?event, "State changed");
        }
    });

    let request = ClientRequest::new(sensor_id, user_id, OwnerId::new(DEMO_OWNER)?);
    let hat = HardwareAuthToken::new(vec![0x5a; 32])?;

    let enroll = handle.enroll(request.clone(), hat, None)?;
    report("enroll", enroll.events).await;

    let auth = handle.authenticate(request.clone(), 1, false)?;
    report("authenticate", auth.events).await;

    if mock.kill() {
        info!("Driver killed");
    } else {
        warn!("Driver was not connected");
    }

    // The next operation reconnects and queues the resync behind it
    let challenge = handle.generate_challenge(request)?;
    report("generate_challenge", challenge.events).await;

    let dump = wait_idle(&handle).await?;
    println!("{}", serde_json::to_string_pretty(&dump)?);

    handle.shutdown().await?;
    state_task.abort();
    Ok(())
}

fn load_sensors(path: &Path) -> Result<Vec<SensorProperties>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading sensors from {}", path.display()))?;
    let sensors: Vec<SensorProperties> = serde_json::from_str(&json)
        .with_context(|| format!("parsing sensors from {}", path.display()))?;
    Ok(sensors)
}

async fn report(name: &str, mut events: ClientEvents) {
    match events.finished().await {
        Some(completion) => match &completion.outcome {
            OperationOutcome::Success(result) => info!(operation = name, ?result, "Succeeded"),
            outcome => warn!(operation = name, ?outcome, "Did not succeed"),
        },
        None => warn!(operation = name, "Dropped without completing"),
    }
}

/// Poll the provider until no sensor has current or queued work.
async fn wait_idle(handle: &ProviderHandle) -> Result<ProviderDump> {
    for _ in 0..IDLE_POLL_ATTEMPTS {
        let dump = handle.dump().await?;
        let idle = dump
            .sensors
            .iter()
            .all(|sensor| sensor.scheduler.current.is_none() && sensor.scheduler.queued.is_empty());
        if idle {
            return Ok(dump);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    warn!("Provider still busy, dumping anyway");
    Ok(handle.dump().await?)
}
