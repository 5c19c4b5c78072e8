use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use haulsim_clock::{SimulationClock, SystemTimeSource, TimeSource};
use haulsim_planning::{LogisticsOrchestrator, LogisticsPlanner, MemoryStore, Repositories};
use serde_json::json;
use shared_logging::{LogLevel, Telemetry};
use shared_queue::{JournaledQueue, MemoryQueue, QueueService};

use crate::{
    config::{HaulsimConfig, LoggingSettings},
    notifier::{NoopNotifier, Notifier, WebhookNotifier},
    worker::{QueueWorker, WorkerHandle, WorkerOptions},
};

/// Builds the root telemetry handle from `[logging]`, falling back to stdout
/// when no path is set and `stdout` is enabled.
pub fn root_telemetry(settings: &LoggingSettings, stdout: bool) -> Result<Telemetry> {
    let builder = Telemetry::builder("haulsim")
        .stdout(stdout)
        .min_level(settings.level()?);
    let builder = match &settings.path {
        Some(path) => builder.log_path(path),
        None => builder,
    };
    builder.build().context("opening haulsim log sink")
}

/// Fully wired clock, store, orchestrator and worker.
pub struct Haulsim {
    config: HaulsimConfig,
    telemetry: Telemetry,
    clock: Arc<SimulationClock>,
    store: Arc<MemoryStore>,
    orchestrator: Arc<LogisticsOrchestrator>,
    worker: Arc<QueueWorker>,
}

impl Haulsim {
    /// Wires production collaborators: system time, in-memory queue (journaled
    /// when configured) and the webhook notifier when a URL is set.
    pub fn build(config: HaulsimConfig) -> Result<Self> {
        let telemetry = root_telemetry(&config.logging, true)?;
        Self::build_with_telemetry(config, telemetry)
    }

    /// Same as [`Self::build`] with an explicit log sink.
    pub fn build_with_telemetry(config: HaulsimConfig, telemetry: Telemetry) -> Result<Self> {
        let queue: Arc<dyn QueueService> = match &config.queues.journal_path {
            Some(path) => Arc::new(
                JournaledQueue::new(MemoryQueue::new(), path)
                    .with_context(|| format!("opening send journal {}", path.display()))?,
            ),
            None => Arc::new(MemoryQueue::new()),
        };
        let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
            Some(url) => Arc::new(
                WebhookNotifier::new(
                    url.clone(),
                    config.notifier.timeout(),
                    config.notifier.retry_policy(),
                    telemetry.scoped("notifier"),
                )
                .context("building webhook notifier")?,
            ),
            None => Arc::new(NoopNotifier),
        };
        Ok(Self::assemble(
            config,
            Arc::new(SystemTimeSource),
            queue,
            notifier,
            telemetry,
        ))
    }

    /// Wires the given collaborators.
    #[must_use]
    pub fn assemble(
        config: HaulsimConfig,
        time_source: Arc<dyn TimeSource>,
        queue: Arc<dyn QueueService>,
        notifier: Arc<dyn Notifier>,
        telemetry: Telemetry,
    ) -> Self {
        let clock = Arc::new(SimulationClock::new(
            config.clock.clone(),
            time_source,
            telemetry.scoped("clock"),
        ));
        let store = Arc::new(MemoryStore::with_fleet(config.fleet.clone()));
        let orchestrator = Arc::new(LogisticsOrchestrator::new(
            Repositories::from_store(Arc::clone(&store)),
            Arc::clone(&clock),
            Arc::clone(&queue),
            config.queues.names(),
            config.planning.clone(),
            telemetry.scoped("planning"),
        ));
        let worker = Arc::new(QueueWorker::new(
            Arc::clone(&orchestrator),
            queue,
            notifier,
            WorkerOptions {
                receive: config.queues.receive_options(),
                error_backoff: config.worker.error_backoff(),
                max_receive_count: config.worker.max_receive_count,
            },
            telemetry.scoped("worker"),
        ));
        Self {
            config,
            telemetry,
            clock,
            store,
            orchestrator,
            worker,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &HaulsimConfig {
        &self.config
    }

    /// Simulation clock.
    #[must_use]
    pub const fn clock(&self) -> &Arc<SimulationClock> {
        &self.clock
    }

    /// In-memory fleet, pickup and logistics store.
    #[must_use]
    pub const fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Lifecycle orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<LogisticsOrchestrator> {
        &self.orchestrator
    }

    /// Planning entry points for the payment side.
    #[must_use]
    pub fn planner(&self) -> &dyn LogisticsPlanner {
        self.orchestrator.as_ref()
    }

    /// Queue worker.
    #[must_use]
    pub const fn worker(&self) -> &Arc<QueueWorker> {
        &self.worker
    }

    /// Spawns the worker, hooks the sweep to simulated midnight and starts the clock.
    ///
    /// Call once per instance; each call registers another midnight hook.
    pub fn start(&self) -> Result<WorkerHandle> {
        let handle = self.worker.spawn();
        let trigger = handle.sweep_trigger();
        let telemetry = self.telemetry.clone();
        self.clock.on_midnight(move |day| {
            if !trigger.trigger() {
                let _ = telemetry.log(
                    LogLevel::Debug,
                    "haulsim.sweep.coalesced",
                    json!({ "day": day }),
                );
            }
            Ok(())
        });
        self.clock
            .start(
                None,
                self.config.clock.sync_endpoint.as_deref(),
                self.config.clock.tick_interval(),
            )
            .context("starting simulation clock")?;
        let _ = self.telemetry.log(
            LogLevel::Info,
            "haulsim.started",
            json!({
                "trucks": self.config.fleet.len(),
                "pickup_queue": self.config.queues.pickup_queue,
                "delivery_queue": self.config.queues.delivery_queue,
            }),
        );
        Ok(handle)
    }

    /// Starts, waits for `stop`, then drains; the drain runs even when `stop` fails.
    ///
    /// Returns what `stop` resolved to and whether the drain finished in time.
    pub async fn run_until<T, F>(&self, stop: F) -> Result<(T, bool)>
    where
        F: Future<Output = Result<T>>,
    {
        let handle = self.start()?;
        let stopped = stop.await;
        let drained = self.shutdown(handle).await;
        Ok((stopped?, drained))
    }

    /// Stops the clock, then drains the worker within the configured grace period.
    pub async fn shutdown(&self, handle: WorkerHandle) -> bool {
        self.clock.stop();
        let drained = handle.shutdown(self.config.worker.shutdown_grace()).await;
        let _ = self.telemetry.log(
            LogLevel::Info,
            "haulsim.stopped",
            json!({ "drained": drained, "stats": self.worker.stats().snapshot() }),
        );
        drained
    }
}
