//! # ccuhubd: ccuhub daemon
//!
//! Composition root that wires all adapters together and runs the event
//! manager until it is told to stop.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars) and initialise tracing
//! - Open the state directory (`SQLite`, migrations, writer task)
//! - Construct the controller client and discover its devices
//! - Construct the event manager, presence tracker and schedule runner
//! - Register the local listeners and load the persisted schedules
//! - Reload the state directory on SIGHUP
//! - Shut down on SIGINT/SIGTERM, releasing the subscription
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ccuhub_adapter_storage_sqlite_sqlx::{SqliteEventLog, SqliteScheduleRepository, StateDir};
use ccuhub_adapter_virtual::VirtualCcu;
use ccuhub_app::action_executor::RemoteActionExecutor;
use ccuhub_app::device_registry::DeviceRegistry;
use ccuhub_app::event_manager::EventManager;
use ccuhub_app::ports::Listener;
use ccuhub_app::presence::PresenceTracker;
use ccuhub_app::schedule_runner::ScheduleRunner;
use ccuhub_domain::time::now;

use crate::config::Config;

type Runner = ScheduleRunner<
    SqliteScheduleRepository,
    SqliteEventLog,
    RemoteActionExecutor<VirtualCcu>,
>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.logging.filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        controller = %config.controller.name,
        "starting ccuhubd"
    );

    // State directory
    let state = config
        .storage()
        .open()
        .await
        .context("opening state directory")?;

    // Controller
    let remote = Arc::new(VirtualCcu::demo().context("building virtual controller")?);

    // Devices
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&remote)));
    let report = registry.refresh().await.context("discovering devices")?;
    tracing::info!(devices = report.total, "devices discovered");
    for device in registry.low_battery_devices() {
        tracing::warn!(device = %device.address, "battery low");
    }

    // Event manager and listeners
    let manager = EventManager::new(Arc::clone(&remote), state.event_log(), config.manager());

    let tracker = Arc::new(
        PresenceTracker::new(state.event_log(), config.presence.residents.clone())
            .context("configuring residents")?,
    );
    tracker.restore().await.context("restoring presence")?;

    manager
        .register(Arc::clone(&registry) as Arc<dyn Listener>)
        .await
        .context("registering device registry")?;
    manager
        .register(Arc::clone(&tracker) as Arc<dyn Listener>)
        .await
        .context("registering presence tracker")?;

    // Schedules
    let runner = Arc::new(ScheduleRunner::new(
        state.schedule_repository(),
        state.event_log(),
        RemoteActionExecutor::new(Arc::clone(&registry)),
    ));
    let loaded = runner.load(now()).await.context("loading schedules")?;
    tracing::info!(schedules = loaded, "schedules loaded");

    let (stop, stopped) = watch::channel(false);
    let ticker = tokio::spawn(run_ticker(
        Arc::clone(&runner),
        config.tick_interval(),
        stopped.clone(),
    ));
    let reloader = tokio::spawn(run_reloader(state.clone(), stopped));

    let result = manager.run(shutdown_signal()).await;

    let _ = stop.send(true);
    let _ = ticker.await;
    let _ = reloader.await;

    tracing::info!(present = ?tracker.present_residents(), "ccuhubd stopped");
    result.context("event manager failed")
}

async fn run_ticker(runner: Arc<Runner>, every: Duration, mut stopped: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stopped.changed() => return,
            _ = interval.tick() => {
                match runner.tick(now()).await {
                    Ok(report) if report.fired() > 0 => {
                        tracing::debug!(
                            succeeded = report.succeeded.len(),
                            failed = report.failed.len(),
                            "schedules fired"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "schedule tick failed"),
                }
            }
        }
    }
}

async fn run_reloader(state: StateDir, mut stopped: watch::Receiver<bool>) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for SIGHUP, reload disabled");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = stopped.changed() => return,
            Some(()) = hangup.recv() => {
                if let Err(err) = state.reload().await {
                    tracing::error!(error = %err, "state reload failed");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown requested");
}
