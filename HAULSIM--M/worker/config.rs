use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, ensure, Context, Result};
use haulsim_clock::ClockConfig;
use haulsim_planning::{PlanningSettings, QueueNames, Truck};
use serde::Deserialize;
use shared_logging::LogLevel;
use shared_queue::{ReceiveOptions, RetryPolicy};

/// Environment variable overriding `[notifier].webhook_url`.
pub const ENV_WEBHOOK_URL: &str = "HAULSIM_WEBHOOK_URL";
/// Environment variable overriding `[clock].sync_endpoint`.
pub const ENV_SYNC_ENDPOINT: &str = "HAULSIM_SYNC_ENDPOINT";
/// Environment variable overriding `[logging].path`.
pub const ENV_LOG_PATH: &str = "HAULSIM_LOG_PATH";

/// Largest batch a single receive may ask for.
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Full runtime configuration, one TOML table per component.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HaulsimConfig {
    /// Simulation clock.
    #[serde(default)]
    pub clock: ClockConfig,
    /// Event queues.
    #[serde(default)]
    pub queues: QueueSettings,
    /// Assignment and sweep knobs.
    #[serde(default)]
    pub planning: PlanningSettings,
    /// Outbound webhook.
    #[serde(default)]
    pub notifier: NotifierSettings,
    /// Poll loops and shutdown.
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Log sink.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Trucks seeded into the in-memory fleet.
    #[serde(default)]
    pub fleet: Vec<Truck>,
}

impl HaulsimConfig {
    /// Loads a TOML file, applies environment overrides and validates.
    ///
    /// Relative journal and log paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading haulsim config {}", path.display()))?;
        let mut config = Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&source_dir);
        config.apply_overrides(|key| env::var(key).ok());
        config
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without touching the environment.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies `HAULSIM_*` overrides read through `lookup`. Empty values clear the setting.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_WEBHOOK_URL) {
            self.notifier.webhook_url = non_empty(&url);
        }
        if let Some(endpoint) = lookup(ENV_SYNC_ENDPOINT) {
            self.clock.sync_endpoint = non_empty(&endpoint);
        }
        if let Some(path) = lookup(ENV_LOG_PATH) {
            self.logging.path = non_empty(&path).map(PathBuf::from);
        }
    }

    /// Checks cross-section value ranges.
    pub fn validate(&self) -> Result<()> {
        self.clock.validate().context("[clock]")?;
        self.planning.validate().context("[planning]")?;
        self.queues.validate().context("[queues]")?;
        self.notifier.validate().context("[notifier]")?;
        self.worker.validate().context("[worker]")?;
        self.logging.level()?;
        let mut ids: Vec<_> = self.fleet.iter().map(|truck| truck.id).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!("[[fleet]] declares truck {} twice", pair[0]);
        }
        Ok(())
    }

    fn resolve_paths(&mut self, source_dir: &Path) {
        for path in [&mut self.queues.journal_path, &mut self.logging.path]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = source_dir.join(&*path);
            }
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `[queues]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueueSettings {
    /// Queue carrying collection events.
    #[serde(default = "default_pickup_queue")]
    pub pickup_queue: String,
    /// Queue carrying delivery events.
    #[serde(default = "default_delivery_queue")]
    pub delivery_queue: String,
    /// Messages requested per receive.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Long-poll wait in seconds.
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    /// Visibility timeout in seconds.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Optional JSON-lines journal of every send.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            pickup_queue: default_pickup_queue(),
            delivery_queue: default_delivery_queue(),
            batch_size: default_batch_size(),
            wait_secs: default_wait_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            journal_path: None,
        }
    }
}

impl QueueSettings {
    /// Queue names as used by the orchestrator.
    #[must_use]
    pub fn names(&self) -> QueueNames {
        QueueNames {
            pickup: self.pickup_queue.clone(),
            delivery: self.delivery_queue.clone(),
        }
    }

    /// Receive parameters for the poll loops.
    #[must_use]
    pub const fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.batch_size,
            wait: Duration::from_secs(self.wait_secs),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_RECEIVE_BATCH).contains(&self.batch_size),
            "batch_size must be within 1..={MAX_RECEIVE_BATCH}, got {}",
            self.batch_size
        );
        ensure!(self.visibility_timeout_secs > 0, "visibility_timeout_secs must be > 0");
        ensure!(
            self.pickup_queue != self.delivery_queue,
            "pickup_queue and delivery_queue must differ"
        );
        Ok(())
    }
}

/// `[notifier]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NotifierSettings {
    /// Webhook receiving collection and delivery notices; disabled when absent.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Attempts per notice, the first included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled after each failure.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Per-request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl NotifierSettings {
    /// Backoff policy for webhook calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.max_attempts > 0, "max_attempts must be > 0");
        if let Some(url) = &self.webhook_url {
            ensure!(
                url.starts_with("http://") || url.starts_with("https://"),
                "webhook_url must be an http(s) URL, got '{url}'"
            );
        }
        Ok(())
    }
}

/// `[worker]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkerSettings {
    /// How long shutdown waits for in-flight batches.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Pause after a failed receive.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Deliveries after which a transiently failing message is given up.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace_secs(),
            error_backoff_ms: default_error_backoff_ms(),
            max_receive_count: default_max_receive_count(),
        }
    }
}

impl WorkerSettings {
    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Pause after a failed receive.
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.max_receive_count > 0, "max_receive_count must be > 0");
        Ok(())
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingSettings {
    /// JSON-lines log file; stdout when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Minimum level written.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            path: None,
            level: default_level(),
        }
    }
}

impl LoggingSettings {
    /// Parsed minimum level.
    pub fn level(&self) -> Result<LogLevel> {
        self.level
            .parse()
            .with_context(|| format!("[logging] level '{}'", self.level))
    }
}

fn default_pickup_queue() -> String {
    QueueNames::default().pickup
}

fn default_delivery_queue() -> String {
    QueueNames::default().delivery
}

const fn default_batch_size() -> usize {
    MAX_RECEIVE_BATCH
}

const fn default_wait_secs() -> u64 {
    20
}

const fn default_visibility_timeout_secs() -> u64 {
    300
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_backoff_ms() -> u64 {
    500
}

const fn default_timeout_ms() -> u64 {
    5_000
}

const fn default_shutdown_grace_secs() -> u64 {
    30
}

const fn default_max_receive_count() -> u32 {
    5
}

const fn default_error_backoff_ms() -> u64 {
    1_000
}

fn default_level() -> String {
    "info".into()
}
