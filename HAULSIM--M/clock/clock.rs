use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use shared_logging::{LogLevel, Telemetry};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};

use crate::{
    calendar::{end_of_day, is_last_minute, start_of_day},
    config::ClockConfig,
    sync::{HttpTimeSync, TimeSyncSource},
    time_source::{SystemTimeSource, TimeSource},
};

/// Errors surfaced by the clock.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// `start` was called outside a tokio runtime.
    #[error("clock tasks require a tokio runtime")]
    NoRuntime,
    /// Sync requested while no source is configured.
    #[error("time sync is disabled")]
    SyncDisabled,
    /// Sync request exceeded its timeout.
    #[error("time sync timed out after {0:?}")]
    SyncTimeout(Duration),
    /// Sync request failed in transport.
    #[error("time sync transport error: {0}")]
    SyncTransport(String),
    /// Sync response could not be interpreted.
    #[error("time sync payload error: {0}")]
    SyncPayload(String),
}

/// Callback invoked with a copy of the simulated instant.
pub type ClockCallback = Arc<dyn Fn(DateTime<Utc>) -> anyhow::Result<()> + Send + Sync>;

/// Point-in-time view of the clock.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClockStatus {
    /// Whether the tick task is running.
    pub running: bool,
    /// Current simulated instant.
    pub simulated_now: DateTime<Utc>,
    /// Simulated anchor.
    pub simulation_start: DateTime<Utc>,
    /// Wall-clock anchor.
    pub real_start: DateTime<Utc>,
    /// Simulated ms per real ms.
    pub speed_factor: f64,
    /// Whether periodic sync is active.
    pub sync_enabled: bool,
    /// Failed sync attempts since the last success.
    pub sync_failures: u32,
    /// Wall-clock instant of the last successful sync.
    pub last_synced_at: Option<DateTime<Utc>>,
}

struct ClockState {
    simulation_start: DateTime<Utc>,
    real_start: DateTime<Utc>,
    high_water: Option<DateTime<Utc>>,
    last_sim_date: Option<NaiveDate>,
    running: bool,
    sync_source: Option<Arc<dyn TimeSyncSource>>,
    sync_failures: u32,
    last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Callbacks {
    midnight: Vec<ClockCallback>,
    before_midnight: Vec<ClockCallback>,
}

#[derive(Default)]
struct Tasks {
    stop: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

/// Accelerated simulation clock.
///
/// Simulated time is derived as `simulation_start + (now - real_start) * speed`,
/// where `now` comes from the injected [`TimeSource`]. The clock is an explicit
/// service: build one per process (or per test) and share it behind an `Arc`.
pub struct SimulationClock {
    config: ClockConfig,
    speed: f64,
    time_source: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
    callbacks: Mutex<Callbacks>,
    tasks: Mutex<Tasks>,
    telemetry: Telemetry,
}

impl fmt::Debug for SimulationClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulationClock")
            .field("simulation_start", &state.simulation_start)
            .field("real_start", &state.real_start)
            .field("speed", &self.speed)
            .field("running", &state.running)
            .finish()
    }
}

impl SimulationClock {
    /// Creates a stopped clock anchored at the configured start (or default epoch).
    #[must_use]
    pub fn new(config: ClockConfig, time_source: Arc<dyn TimeSource>, telemetry: Telemetry) -> Self {
        let speed = config.speed_factor();
        let anchor = config.start_time.unwrap_or_else(ClockConfig::default_epoch);
        let real_start = time_source.now();
        Self {
            config,
            speed,
            time_source,
            state: Mutex::new(ClockState {
                simulation_start: anchor,
                real_start,
                high_water: None,
                last_sim_date: None,
                running: false,
                sync_source: None,
                sync_failures: 0,
                last_synced_at: None,
            }),
            callbacks: Mutex::new(Callbacks::default()),
            tasks: Mutex::new(Tasks::default()),
            telemetry,
        }
    }

    /// Clock reading the system wall clock with telemetry disabled.
    #[must_use]
    pub fn with_system_time(config: ClockConfig) -> Self {
        Self::new(config, Arc::new(SystemTimeSource), Telemetry::disabled())
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Simulated milliseconds per real millisecond.
    #[must_use]
    pub const fn speed_factor(&self) -> f64 {
        self.speed
    }

    /// Current wall-clock instant as seen by this clock.
    #[must_use]
    pub fn real_now(&self) -> DateTime<Utc> {
        self.time_source.now()
    }

    /// Starts ticking, optionally polling `sync_endpoint` for re-sync.
    pub fn start(
        self: &Arc<Self>,
        start_time: Option<DateTime<Utc>>,
        sync_endpoint: Option<&str>,
        tick_interval: Duration,
    ) -> Result<(), ClockError> {
        let source = match sync_endpoint {
            Some(endpoint) => Some(Arc::new(HttpTimeSync::new(
                endpoint,
                self.config.sync_timeout(),
            )?) as Arc<dyn TimeSyncSource>),
            None => None,
        };
        self.start_with_source(start_time, source, tick_interval)
    }

    /// Starts ticking with an explicit sync source.
    ///
    /// Any prior run is stopped first. Without `start_time` the clock anchors
    /// at the configured start or the default epoch.
    pub fn start_with_source(
        self: &Arc<Self>,
        start_time: Option<DateTime<Utc>>,
        sync_source: Option<Arc<dyn TimeSyncSource>>,
        tick_interval: Duration,
    ) -> Result<(), ClockError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClockError::NoRuntime)?;
        self.stop();
        let anchor = start_time
            .or(self.config.start_time)
            .unwrap_or_else(ClockConfig::default_epoch);
        let sync_label = sync_source.as_ref().map(|source| source.describe());
        {
            let mut state = self.state.lock();
            state.simulation_start = anchor;
            state.real_start = self.time_source.now();
            state.high_water = None;
            state.last_sim_date = None;
            state.running = true;
            state.sync_failures = 0;
            state.sync_source = sync_source;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = vec![runtime.spawn(tick_loop(
            Arc::downgrade(self),
            tick_interval.max(Duration::from_millis(1)),
            stop_rx.clone(),
        ))];
        if sync_label.is_some() {
            handles.push(runtime.spawn(sync_loop(
                Arc::downgrade(self),
                self.config.sync_interval().max(Duration::from_millis(1)),
                stop_rx,
            )));
        }
        {
            let mut tasks = self.tasks.lock();
            tasks.stop = Some(stop_tx);
            tasks.handles = handles;
        }
        self.log(
            LogLevel::Info,
            "clock.started",
            json!({
                "simulation_start": anchor,
                "tick_interval_ms": u64::try_from(tick_interval.as_millis()).unwrap_or(u64::MAX),
                "speed_factor": self.speed,
                "sync": sync_label,
            }),
        );
        Ok(())
    }

    /// Stops the tick and sync tasks. Anchors and callbacks are kept.
    pub fn stop(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if let Some(stop) = tasks.stop {
            let _ = stop.send(true);
        }
        let was_running = std::mem::replace(&mut self.state.lock().running, false);
        if was_running {
            self.log(LogLevel::Info, "clock.stopped", json!({}));
        }
    }

    /// Whether the tick task is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Snapshot of the current simulated instant; never earlier than a previous
    /// reading since the last `set_time`/`reset`.
    #[must_use]
    pub fn current_time(&self) -> DateTime<Utc> {
        let now = self.time_source.now();
        let mut state = self.state.lock();
        let derived = self.derive(&state, now);
        let current = match state.high_water {
            Some(previous) if previous > derived => previous,
            _ => derived,
        };
        state.high_water = Some(current);
        current
    }

    /// Re-anchors simulated time to `time` at the current wall-clock instant.
    pub fn set_time(&self, time: DateTime<Utc>) {
        {
            let mut state = self.state.lock();
            state.simulation_start = time;
            state.real_start = self.time_source.now();
            state.high_water = None;
            state.last_sim_date = None;
        }
        self.log(LogLevel::Info, "clock.set_time", json!({ "simulated": time }));
    }

    /// Stops ticking, clears sync state and re-anchors to the default epoch.
    pub fn reset(&self) {
        self.stop();
        {
            let mut state = self.state.lock();
            state.simulation_start = ClockConfig::default_epoch();
            state.real_start = self.time_source.now();
            state.high_water = None;
            state.last_sim_date = None;
            state.sync_source = None;
            state.sync_failures = 0;
            state.last_synced_at = None;
        }
        self.log(LogLevel::Info, "clock.reset", json!({}));
    }

    /// Wall-clock instant at which the clock will read `sim_instant`.
    #[must_use]
    pub fn real_world_timestamp_for_simulation_instant(
        &self,
        sim_instant: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let state = self.state.lock();
        let offset = sim_instant - state.simulation_start;
        let real_offset = scale(offset, 1.0 / self.speed);
        state.real_start + real_offset
    }

    /// Wall-clock instant of the start (00:00:00.000) of `sim_date`'s day.
    #[must_use]
    pub fn real_world_pickup_timestamp(&self, sim_date: DateTime<Utc>) -> DateTime<Utc> {
        self.real_world_timestamp_for_simulation_instant(start_of_day(sim_date))
    }

    /// Wall-clock instant of the end (23:59:59.999) of `sim_date`'s day.
    #[must_use]
    pub fn real_world_delivery_timestamp(&self, sim_date: DateTime<Utc>) -> DateTime<Utc> {
        self.real_world_timestamp_for_simulation_instant(end_of_day(sim_date))
    }

    /// Real time remaining until `real_instant`, zero when it has passed.
    #[must_use]
    pub fn delay_until(&self, real_instant: DateTime<Utc>) -> Duration {
        (real_instant - self.time_source.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Registers a callback fired once per simulated calendar-day transition.
    pub fn on_midnight<F>(&self, callback: F)
    where
        F: Fn(DateTime<Utc>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.lock().midnight.push(Arc::new(callback));
    }

    /// Registers a callback fired on every tick within the last simulated minute of a day.
    pub fn on_before_midnight<F>(&self, callback: F)
    where
        F: Fn(DateTime<Utc>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.lock().before_midnight.push(Arc::new(callback));
    }

    /// Recomputes simulated time and fires day-boundary callbacks.
    ///
    /// Called by the tick task; public so callers can drive the clock by hand.
    pub fn tick(&self) -> DateTime<Utc> {
        let now = self.current_time();
        let today = now.date_naive();
        let crossed_midnight = {
            let mut state = self.state.lock();
            let crossed = matches!(state.last_sim_date, Some(previous) if previous != today);
            state.last_sim_date = Some(today);
            crossed
        };
        if crossed_midnight {
            let callbacks = self.callbacks.lock().midnight.clone();
            self.log(
                LogLevel::Info,
                "clock.midnight",
                json!({ "simulated": now, "callbacks": callbacks.len() }),
            );
            self.fire("midnight", &callbacks, now);
        }
        if is_last_minute(now) {
            let callbacks = self.callbacks.lock().before_midnight.clone();
            self.fire("before_midnight", &callbacks, now);
        }
        now
    }

    /// Performs one sync attempt against the configured source.
    ///
    /// Failures are counted; reaching the configured threshold disables sync
    /// until a new source is installed or the clock is restarted.
    pub async fn sync_now(&self) -> Result<DateTime<Utc>, ClockError> {
        let source = self
            .state
            .lock()
            .sync_source
            .clone()
            .ok_or(ClockError::SyncDisabled)?;
        let limit = self.config.sync_timeout();
        let outcome = match timeout(limit, source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(ClockError::SyncTimeout(limit)),
        };
        match outcome {
            Ok(simulated) => {
                {
                    let mut state = self.state.lock();
                    state.simulation_start = simulated;
                    state.real_start = self.time_source.now();
                    state.sync_failures = 0;
                    state.last_synced_at = Some(state.real_start);
                }
                self.log(
                    LogLevel::Debug,
                    "clock.sync.ok",
                    json!({ "simulated": simulated, "source": source.describe() }),
                );
                Ok(simulated)
            }
            Err(err) => {
                let (failures, disabled) = {
                    let mut state = self.state.lock();
                    state.sync_failures += 1;
                    let disabled = state.sync_failures >= self.config.sync_failure_threshold;
                    if disabled {
                        state.sync_source = None;
                    }
                    (state.sync_failures, disabled)
                };
                self.log(
                    LogLevel::Warn,
                    "clock.sync.failed",
                    json!({ "error": err.to_string(), "failures": failures }),
                );
                if disabled {
                    self.log(
                        LogLevel::Error,
                        "clock.sync.disabled",
                        json!({ "source": source.describe(), "failures": failures }),
                    );
                }
                Err(err)
            }
        }
    }

    /// Installs (or clears) the sync source and resets the failure counter.
    pub fn set_sync_source(&self, source: Option<Arc<dyn TimeSyncSource>>) {
        let mut state = self.state.lock();
        state.sync_source = source;
        state.sync_failures = 0;
    }

    /// Whether a sync source is installed.
    #[must_use]
    pub fn sync_enabled(&self) -> bool {
        self.state.lock().sync_source.is_some()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ClockStatus {
        let simulated_now = self.current_time();
        let state = self.state.lock();
        ClockStatus {
            running: state.running,
            simulated_now,
            simulation_start: state.simulation_start,
            real_start: state.real_start,
            speed_factor: self.speed,
            sync_enabled: state.sync_source.is_some(),
            sync_failures: state.sync_failures,
            last_synced_at: state.last_synced_at,
        }
    }

    fn derive(&self, state: &ClockState, now: DateTime<Utc>) -> DateTime<Utc> {
        state.simulation_start + scale(now - state.real_start, self.speed)
    }

    fn fire(&self, kind: &str, callbacks: &[ClockCallback], instant: DateTime<Utc>) {
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(instant))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.log(
                    LogLevel::Error,
                    "clock.callback.failed",
                    json!({ "kind": kind, "index": index, "error": format!("{err:#}") }),
                ),
                Err(_) => self.log(
                    LogLevel::Error,
                    "clock.callback.panicked",
                    json!({ "kind": kind, "index": index }),
                ),
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        let _ = self.telemetry.log(level, message, metadata);
    }
}

impl Drop for SimulationClock {
    fn drop(&mut self) {
        if let Some(stop) = self.tasks.get_mut().stop.take() {
            let _ = stop.send(true);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scale(span: chrono::Duration, factor: f64) -> chrono::Duration {
    let micros = span
        .num_microseconds()
        .map_or_else(|| span.num_milliseconds() as f64 * 1_000.0, |us| us as f64);
    chrono::Duration::microseconds((micros * factor).round() as i64)
}

async fn tick_loop(clock: Weak<SimulationClock>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(clock) = clock.upgrade() else { break };
                clock.tick();
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

async fn sync_loop(clock: Weak<SimulationClock>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(clock) = clock.upgrade() else { break };
                if !clock.sync_enabled() {
                    break;
                }
                let _ = clock.sync_now().await;
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_source::ManualTimeSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn manual_clock() -> (Arc<SimulationClock>, Arc<ManualTimeSource>) {
        let source = Arc::new(ManualTimeSource::new(at("2024-01-01T00:00:00Z")));
        let clock = Arc::new(SimulationClock::new(
            ClockConfig::default(),
            source.clone(),
            Telemetry::disabled(),
        ));
        (clock, source)
    }

    #[test]
    fn simulated_time_advances_at_speed_factor() {
        let (clock, source) = manual_clock();
        clock.set_time(at("2025-01-01T00:00:00Z"));
        source.advance_ms(120_000);
        assert_eq!(clock.current_time(), at("2025-01-02T00:00:00Z"));
        source.advance_ms(5_000);
        assert_eq!(clock.current_time(), at("2025-01-02T01:00:00Z"));
    }

    #[test]
    fn current_time_is_monotonic_until_set() {
        let (clock, source) = manual_clock();
        clock.set_time(at("2025-01-01T12:00:00Z"));
        source.advance_ms(1_000);
        let first = clock.current_time();
        source.advance_ms(-500);
        let second = clock.current_time();
        assert!(second >= first);

        clock.set_time(at("2024-01-01T00:00:00Z"));
        assert!(clock.current_time() < first);
    }

    #[test]
    fn inverse_mapping_round_trips_day_bounds() {
        let (clock, source) = manual_clock();
        let real_anchor = source.now();
        clock.set_time(at("2025-01-01T00:00:00Z"));
        let day = at("2025-01-03T15:30:00Z");
        let pickup = clock.real_world_pickup_timestamp(day);
        assert_eq!(
            pickup,
            clock.real_world_timestamp_for_simulation_instant(at("2025-01-03T00:00:00Z"))
        );
        assert_eq!(pickup, real_anchor + chrono::Duration::minutes(4));
        assert_eq!(
            clock.real_world_delivery_timestamp(day),
            clock.real_world_timestamp_for_simulation_instant(at("2025-01-03T23:59:59.999Z"))
        );
    }

    #[test]
    fn delay_until_clamps_past_instants() {
        let (clock, source) = manual_clock();
        let now = source.now();
        assert_eq!(clock.delay_until(now - chrono::Duration::seconds(3)), Duration::ZERO);
        assert_eq!(
            clock.delay_until(now + chrono::Duration::seconds(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn midnight_fires_once_per_day_transition() {
        let (clock, source) = manual_clock();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        clock.on_midnight(move |instant| {
            sink.lock().push(instant);
            Ok(())
        });
        clock.set_time(at("2050-01-01T23:59:59Z"));
        clock.tick();
        assert!(fired.lock().is_empty());

        // 84 real ms at 720x is 60.48 simulated seconds
        source.advance_ms(84);
        clock.tick();
        clock.tick();
        let fired = fired.lock();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].date_naive(), at("2050-01-02T00:00:00Z").date_naive());
        assert_eq!(chrono::Timelike::hour(&fired[0]), 0);
        assert_eq!(chrono::Timelike::minute(&fired[0]), 0);
    }

    #[test]
    fn before_midnight_fires_in_last_minute() {
        let (clock, _source) = manual_clock();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        clock.on_before_midnight(move |instant| {
            sink.lock().push(instant);
            Ok(())
        });
        clock.set_time(at("2050-01-01T23:59:30Z"));
        clock.tick();
        clock.tick();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(chrono::Timelike::hour(&seen[0]), 23);
        assert_eq!(chrono::Timelike::minute(&seen[0]), 59);
    }

    #[test]
    fn failing_callbacks_do_not_block_others() {
        let (clock, source) = manual_clock();
        let calls = Arc::new(AtomicU32::new(0));
        clock.on_midnight(|_| anyhow::bail!("sweep unavailable"));
        clock.on_midnight(|_| panic!("callback bug"));
        let counter = Arc::clone(&calls);
        clock.on_midnight(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        clock.set_time(at("2050-01-01T23:59:59Z"));
        clock.tick();
        source.advance_ms(10);
        clock.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_time_clears_day_tracking() {
        let (clock, _source) = manual_clock();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        clock.on_midnight(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        clock.set_time(at("2050-01-01T10:00:00Z"));
        clock.tick();
        clock.set_time(at("2050-01-05T10:00:00Z"));
        clock.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reset_returns_to_epoch() {
        let (clock, _source) = manual_clock();
        clock.set_time(at("2030-06-01T00:00:00Z"));
        clock.reset();
        assert_eq!(clock.current_time(), ClockConfig::default_epoch());
        assert!(!clock.is_running());
        assert!(!clock.sync_enabled());
    }

    struct FlakySync {
        calls: AtomicU32,
        succeed: bool,
    }

    #[async_trait]
    impl TimeSyncSource for FlakySync {
        async fn fetch(&self) -> Result<DateTime<Utc>, ClockError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok("2060-01-01T00:00:00Z".parse().unwrap())
            } else {
                Err(ClockError::SyncTransport("connection refused".into()))
            }
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    #[tokio::test]
    async fn sync_disables_after_threshold() {
        let (clock, _source) = manual_clock();
        clock.set_sync_source(Some(Arc::new(FlakySync {
            calls: AtomicU32::new(0),
            succeed: false,
        })));
        for _ in 0..2 {
            assert!(clock.sync_now().await.is_err());
            assert!(clock.sync_enabled());
        }
        assert!(clock.sync_now().await.is_err());
        assert!(!clock.sync_enabled());
        assert_eq!(clock.status().sync_failures, 3);
        assert_eq!(clock.sync_now().await, Err(ClockError::SyncDisabled));
    }

    #[tokio::test]
    async fn successful_sync_reanchors() {
        let (clock, _source) = manual_clock();
        clock.set_sync_source(Some(Arc::new(FlakySync {
            calls: AtomicU32::new(0),
            succeed: true,
        })));
        clock.sync_now().await.unwrap();
        assert_eq!(clock.current_time(), at("2060-01-01T00:00:00Z"));
        let status = clock.status();
        assert_eq!(status.sync_failures, 0);
        assert!(status.last_synced_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_tick_task_until_stopped() {
        let (clock, source) = manual_clock();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        clock.on_before_midnight(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        clock
            .start_with_source(Some(at("2050-01-01T23:59:10Z")), None, Duration::from_millis(10))
            .unwrap();
        assert!(clock.is_running());
        source.advance_ms(1);
        tokio::time::sleep(Duration::from_millis(35)).await;
        clock.stop();
        let observed = calls.load(Ordering::SeqCst);
        assert!(observed >= 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), observed);
        assert!(!clock.is_running());
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (clock, _source) = manual_clock();
        assert_eq!(
            clock.start_with_source(None, None, Duration::from_secs(1)),
            Err(ClockError::NoRuntime)
        );
    }
}
