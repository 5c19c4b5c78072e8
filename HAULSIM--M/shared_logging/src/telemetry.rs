use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;

use crate::{JsonLogger, LogLevel, LogRecord};

/// Builder for [`Telemetry`].
pub struct TelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    stdout: bool,
    min_level: LogLevel,
    logger: Option<Arc<JsonLogger>>,
}

impl TelemetryBuilder {
    /// Creates a new builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            stdout: false,
            min_level: LogLevel::Debug,
            logger: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Writes to stdout when no log path is set.
    #[must_use]
    pub const fn stdout(mut self, enabled: bool) -> Self {
        self.stdout = enabled;
        self
    }

    /// Drops records below the given level.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Shares an existing logger instead of opening a new one.
    #[must_use]
    pub fn logger(mut self, logger: Arc<JsonLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<Telemetry> {
        let logger = match (self.logger, self.log_path) {
            (Some(logger), _) => Some(logger),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?)),
            (None, None) if self.stdout => Some(Arc::new(JsonLogger::stdout())),
            (None, None) => None,
        };
        Ok(Telemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                min_level: self.min_level,
            }),
        })
    }
}

/// Telemetry handle shared across components; clones share the same sink.
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<JsonLogger>>,
    min_level: LogLevel,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("module", &self.inner.module)
            .field("enabled", &self.inner.logger.is_some())
            .finish()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Telemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> TelemetryBuilder {
        TelemetryBuilder::new(module)
    }

    /// Telemetry that discards every record.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: "disabled".into(),
                logger: None,
                min_level: LogLevel::Error,
            }),
        }
    }

    /// Returns a handle for another module writing to the same sink.
    #[must_use]
    pub fn scoped(&self, module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: self.inner.logger.clone(),
                min_level: self.inner.min_level,
            }),
        }
    }

    /// Module label attached to every record.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Logs a dotted event name with metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if level < self.inner.min_level {
            return Ok(());
        }
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }
}
