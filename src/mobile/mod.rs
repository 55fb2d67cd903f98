//! Object-style surface for mobile bindings.
//!
//! Every method returns the same phrases as the C ABI. Strings are owned
//! Rust values; binding layers convert them for their host runtime.

#[cfg(feature = "jni")]
mod android;

use crate::config::TEMPLATE;
use crate::lifecycle::{self, ConfigSource, Lifecycle};
use crate::logger::{self, BreadcrumbFlags};
use crate::messages;
use crate::proxy::{Engine, ProxyCore};
use std::path::Path;
use std::sync::Arc;

/// Returned by [`V2RayService::query_stats`] while nothing is running.
pub const STATS_UNAVAILABLE: i64 = -1;

pub struct V2RayService<E: Engine + 'static = ProxyCore> {
    lifecycle: Arc<Lifecycle<E>>,
}

impl V2RayService<ProxyCore> {
    /// A service bound to the process-wide lifecycle shared with the C ABI.
    pub fn new() -> Self {
        Self::with_lifecycle(crate::shared())
    }
}

impl Default for V2RayService<ProxyCore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine + 'static> Clone for V2RayService<E> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<E: Engine + 'static> V2RayService<E> {
    pub fn with_lifecycle(lifecycle: Arc<Lifecycle<E>>) -> Self {
        Self { lifecycle }
    }

    pub fn start_with_config(&self, config: &str) -> String {
        logger::breadcrumb(BreadcrumbFlags::FFI, "mobile start_with_config");
        messages::started(self.lifecycle.start(ConfigSource::Json(config)))
    }

    pub fn start_with_config_file(&self, path: &str) -> String {
        logger::breadcrumb(BreadcrumbFlags::FFI, "mobile start_with_config_file");
        messages::started(self.lifecycle.start(ConfigSource::File(Path::new(path))))
    }

    pub fn stop(&self) -> String {
        logger::breadcrumb(BreadcrumbFlags::FFI, "mobile stop");
        messages::stopped(self.lifecycle.stop())
    }

    pub fn get_status(&self) -> String {
        messages::status(self.lifecycle.status())
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn get_version(&self) -> String {
        self.lifecycle.version().to_string()
    }

    pub fn restart(&self, config: &str) -> String {
        messages::started(self.lifecycle.restart(ConfigSource::Json(config)))
    }

    pub fn restart_with_config_file(&self, path: &str) -> String {
        messages::started(self.lifecycle.restart(ConfigSource::File(Path::new(path))))
    }

    pub fn test_config(&self, config: &str) -> String {
        let source = ConfigSource::Json(config);
        messages::validated(source.kind(), self.lifecycle.validate(source))
    }

    pub fn test_config_file(&self, path: &str) -> String {
        let source = ConfigSource::File(Path::new(path));
        messages::validated(source.kind(), self.lifecycle.validate(source))
    }

    /// Counter lookup. Counters are not collected yet, so a running instance
    /// always reports zero.
    pub fn query_stats(&self, tag: &str, name: &str) -> i64 {
        self.lifecycle
            .query_stats(tag, name)
            .unwrap_or(STATS_UNAVAILABLE)
    }

    /// JSON object with status and version, or an error object when stopped.
    pub fn get_system_stats(&self) -> String {
        messages::system_stats(self.lifecycle.system_stats())
    }

    /// `0=debug, 1=info, 2=warning, 3=error`.
    pub fn set_log_level(&self, level: i32) -> String {
        messages::log_level(lifecycle::set_log_level(level))
    }

    pub fn get_config_template(&self) -> String {
        TEMPLATE.to_string()
    }
}
