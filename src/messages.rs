//! Host-visible reply strings.
//!
//! Both host surfaces answer in the same fixed phrases. Everything that turns
//! a lifecycle result into text lives here so the two surfaces cannot drift.

use crate::config::ConfigError;
use crate::lifecycle::{LifecycleError, SourceKind, Status, StopOutcome, SystemStats};

pub(crate) const STARTED: &str = "V2Ray started successfully";
pub(crate) const STOPPED: &str = "V2Ray stopped successfully";
pub(crate) const NOT_RUNNING: &str = "V2Ray is not running";
pub(crate) const CONFIG_VALID: &str = "Configuration is valid";
pub(crate) const CONFIG_FILE_VALID: &str = "Configuration file is valid";
pub(crate) const LOG_LEVEL_SET: &str = "Log level set successfully";
pub(crate) const STATS_NOT_RUNNING: &str = r#"{"error": "V2Ray is not running"}"#;

/// Which operation produced a configuration error; validation words its
/// failures differently from start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Launch,
    Validate,
}

pub(crate) fn describe(error: &LifecycleError, phase: Phase) -> String {
    match error {
        LifecycleError::EmptyInput(SourceKind::Json) => "Configuration is empty".into(),
        LifecycleError::EmptyInput(SourceKind::File) => "Configuration path is empty".into(),
        LifecycleError::AlreadyRunning => "V2Ray is already running".into(),
        LifecycleError::Config { kind, error } => config_failure(*kind, error, phase),
        LifecycleError::InstanceCreation(error) => {
            format!("Failed to create V2Ray instance: {error}")
        }
        LifecycleError::Start(error) => format!("Failed to start V2Ray: {error}"),
        LifecycleError::Stop(error) => format!("Failed to stop V2Ray: {error}"),
        LifecycleError::InvalidLogLevel(_) => {
            "Invalid log level. Use 0=debug, 1=info, 2=warning, 3=error".into()
        }
    }
}

fn config_failure(kind: SourceKind, error: &ConfigError, phase: Phase) -> String {
    let prefix = match (error, kind, phase) {
        (ConfigError::Open { .. }, _, _) => "Failed to open configuration file",
        (ConfigError::Syntax(_), SourceKind::Json, Phase::Launch) => "Failed to parse configuration",
        (ConfigError::Build(_), SourceKind::Json, Phase::Launch) => "Failed to build configuration",
        (_, SourceKind::File, Phase::Launch) => "Failed to load configuration",
        (ConfigError::Syntax(_), SourceKind::Json, Phase::Validate) => {
            "Invalid JSON configuration"
        }
        (ConfigError::Build(_), SourceKind::Json, Phase::Validate) => "Invalid configuration",
        (_, SourceKind::File, Phase::Validate) => "Invalid configuration file",
    };
    format!("{prefix}: {error}")
}

pub(crate) fn started(result: Result<(), LifecycleError>) -> String {
    match result {
        Ok(()) => STARTED.into(),
        Err(error) => describe(&error, Phase::Launch),
    }
}

pub(crate) fn stopped(result: Result<StopOutcome, LifecycleError>) -> String {
    match result {
        Ok(StopOutcome::Stopped) => STOPPED.into(),
        Ok(StopOutcome::NotRunning) => NOT_RUNNING.into(),
        Err(error) => describe(&error, Phase::Launch),
    }
}

pub(crate) fn validated(kind: SourceKind, result: Result<(), LifecycleError>) -> String {
    match (result, kind) {
        (Ok(()), SourceKind::Json) => CONFIG_VALID.into(),
        (Ok(()), SourceKind::File) => CONFIG_FILE_VALID.into(),
        (Err(error), _) => describe(&error, Phase::Validate),
    }
}

pub(crate) fn status(status: Status) -> String {
    status.as_str().into()
}

pub(crate) fn log_level<T>(result: Result<T, LifecycleError>) -> String {
    match result {
        Ok(_) => LOG_LEVEL_SET.into(),
        Err(error) => describe(&error, Phase::Launch),
    }
}

pub(crate) fn system_stats(stats: Option<SystemStats>) -> String {
    let Some(stats) = stats else {
        return STATS_NOT_RUNNING.into();
    };
    serde_json::to_string(&stats).unwrap_or_else(|error| {
        crate::logger::error(format!("system stats serialization failed: {error}"));
        STATS_NOT_RUNNING.into()
    })
}
