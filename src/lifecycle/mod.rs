//! Engine lifecycle shared by every host surface.
//!
//! A [`Lifecycle`] owns at most one running engine instance behind a single
//! lock. All mutating operations hold that lock for their whole duration,
//! engine start and close included, so a slow engine blocks status queries
//! too. `restart` takes the lock twice (once to stop, once to start) and is
//! therefore not atomic with respect to other callers.

use crate::config::{self, ConfigError, CoreConfig};
use crate::logger::{self, BreadcrumbFlags, LogLevel};
use crate::proxy::{Engine, EngineError, Instance};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Where a configuration comes from.
#[derive(Clone, Copy, Debug)]
pub enum ConfigSource<'a> {
    Json(&'a str),
    File(&'a Path),
}

impl<'a> ConfigSource<'a> {
    pub fn kind(&self) -> SourceKind {
        match self {
            ConfigSource::Json(_) => SourceKind::Json,
            ConfigSource::File(_) => SourceKind::File,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            ConfigSource::Json(text) => text.trim().is_empty(),
            ConfigSource::File(path) => path.as_os_str().is_empty(),
        }
    }

    fn load(&self) -> Result<CoreConfig, ConfigError> {
        match self {
            ConfigSource::Json(text) => config::from_str(text),
            ConfigSource::File(path) => config::load(path),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Json,
    File,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Json => f.write_str("configuration"),
            SourceKind::File => f.write_str("configuration path"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0} is empty")]
    EmptyInput(SourceKind),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("invalid {kind}: {error}")]
    Config {
        kind: SourceKind,
        #[source]
        error: ConfigError,
    },
    #[error("failed to create instance: {0}")]
    InstanceCreation(#[source] EngineError),
    #[error("failed to start instance: {0}")]
    Start(#[source] EngineError),
    #[error("failed to stop instance: {0}")]
    Stop(#[source] EngineError),
    #[error("invalid log level {0}")]
    InvalidLogLevel(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    Stopped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Running => "running",
            Status::Stopped => "stopped",
        }
    }
}

/// Placeholder system statistics; only `status` and `version` are real.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime: &'static str,
}

pub struct Lifecycle<E: Engine> {
    engine: E,
    slot: Mutex<Option<E::Instance>>,
}

impl<E: Engine> Lifecycle<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            slot: Mutex::new(None),
        }
    }

    pub fn start(&self, source: ConfigSource<'_>) -> Result<(), LifecycleError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(LifecycleError::AlreadyRunning);
        }
        if source.is_blank() {
            return Err(LifecycleError::EmptyInput(source.kind()));
        }
        let config = source.load().map_err(|error| LifecycleError::Config {
            kind: source.kind(),
            error,
        })?;
        let mut instance = self
            .engine
            .create(config)
            .map_err(LifecycleError::InstanceCreation)?;
        instance.start().map_err(LifecycleError::Start)?;
        *slot = Some(instance);
        logger::info(format!("engine {} started", self.engine.version()));
        Ok(())
    }

    /// Stops the running instance. A failed close leaves it in place and the
    /// handle still reports running, so the caller may retry.
    pub fn stop(&self) -> Result<StopOutcome, LifecycleError> {
        let mut slot = self.slot.lock();
        let Some(instance) = slot.as_mut() else {
            return Ok(StopOutcome::NotRunning);
        };
        if let Err(error) = instance.close() {
            logger::error(format!("engine close failed: {error}"));
            return Err(LifecycleError::Stop(error));
        }
        *slot = None;
        logger::breadcrumb(BreadcrumbFlags::LIFECYCLE, "engine stopped");
        Ok(StopOutcome::Stopped)
    }

    pub fn restart(&self, source: ConfigSource<'_>) -> Result<(), LifecycleError> {
        match self.stop()? {
            StopOutcome::Stopped => {
                logger::breadcrumb(BreadcrumbFlags::LIFECYCLE, "restart: previous engine stopped")
            }
            StopOutcome::NotRunning => {
                logger::breadcrumb(BreadcrumbFlags::LIFECYCLE, "restart: nothing to stop")
            }
        }
        self.start(source)
    }

    pub fn status(&self) -> Status {
        if self.is_running() {
            Status::Running
        } else {
            Status::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn version(&self) -> &'static str {
        self.engine.version()
    }

    /// Loads and builds the configuration without creating an instance.
    pub fn validate(&self, source: ConfigSource<'_>) -> Result<(), LifecycleError> {
        validate(source)
    }

    /// Placeholder: `None` while stopped, zero otherwise.
    pub fn query_stats(&self, tag: &str, name: &str) -> Option<i64> {
        if !self.is_running() {
            return None;
        }
        logger::debug(format!("stats query {tag}/{name} is not backed by counters"));
        Some(0)
    }

    pub fn system_stats(&self) -> Option<SystemStats> {
        self.is_running().then(|| SystemStats {
            status: Status::Running.as_str(),
            version: self.version(),
            uptime: "unknown",
        })
    }

    /// Runs `f` against the running instance, if any, under the lock.
    pub fn with_instance<R>(&self, f: impl FnOnce(&E::Instance) -> R) -> Option<R> {
        self.slot.lock().as_ref().map(f)
    }
}

pub fn validate(source: ConfigSource<'_>) -> Result<(), LifecycleError> {
    if source.is_blank() {
        return Err(LifecycleError::EmptyInput(source.kind()));
    }
    source
        .load()
        .map(|_| ())
        .map_err(|error| LifecycleError::Config {
            kind: source.kind(),
            error,
        })
}

/// Maps the host numbering (0=debug, 1=info, 2=warning, 3=error) onto the
/// logger and applies it.
pub fn set_log_level(level: i32) -> Result<LogLevel, LifecycleError> {
    let mapped = match level {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        other => return Err(LifecycleError::InvalidLogLevel(other)),
    };
    logger::set_level(mapped);
    Ok(mapped)
}
