#![deny(unsafe_op_in_unsafe_fn)]
//! Lifecycle bindings for an embedded proxy engine.
//!
//! Desktop hosts link the C ABI exported from this file; mobile hosts use
//! [`mobile::V2RayService`] (and its JNI exports behind the `jni` feature).
//! Both drive the same process-wide [`Lifecycle`], so an instance started
//! through one surface is visible through the other.

pub mod config;
pub mod ffi;
pub mod lifecycle;
pub mod logger;
mod messages;
pub mod mobile;
pub mod proxy;

pub use crate::config::{ConfigError, CoreConfig, TEMPLATE};
pub use crate::lifecycle::{ConfigSource, Lifecycle, LifecycleError, Status, StopOutcome};
pub use crate::proxy::{CoreOptions, Engine, EngineError, Instance, ProxyCore};

use crate::ffi::V2RayLogSink;
use crate::logger::BreadcrumbFlags;
use once_cell::sync::Lazy;
use std::ffi::{c_char, c_int, CStr};
use std::sync::Arc;

static HOST: Lazy<Arc<Lifecycle<ProxyCore>>> =
    Lazy::new(|| Arc::new(Lifecycle::new(ProxyCore::new(CoreOptions::default()))));

/// The process-wide lifecycle behind the host surfaces.
pub fn shared() -> Arc<Lifecycle<ProxyCore>> {
    Arc::clone(&HOST)
}

fn launch(source: ConfigSource<'_>) -> *mut c_char {
    ffi::into_c_string(messages::started(HOST.start(source)))
}

fn relaunch(source: ConfigSource<'_>) -> *mut c_char {
    ffi::into_c_string(messages::started(HOST.restart(source)))
}

fn check(source: ConfigSource<'_>) -> *mut c_char {
    let kind = source.kind();
    ffi::into_c_string(messages::validated(kind, lifecycle::validate(source)))
}

/// # Safety
/// `config` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn StartV2Ray(config: *const c_char) -> *mut c_char {
    logger::breadcrumb(BreadcrumbFlags::FFI, "StartV2Ray");
    let config = unsafe { ffi::read_str(config) };
    launch(ConfigSource::Json(&config))
}

/// # Safety
/// `path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn StartV2RayWithConfig(path: *const c_char) -> *mut c_char {
    logger::breadcrumb(BreadcrumbFlags::FFI, "StartV2RayWithConfig");
    let path = unsafe { ffi::read_path(path) };
    launch(ConfigSource::File(&path))
}

#[no_mangle]
pub extern "C" fn StopV2Ray() -> *mut c_char {
    logger::breadcrumb(BreadcrumbFlags::FFI, "StopV2Ray");
    ffi::into_c_string(messages::stopped(HOST.stop()))
}

#[no_mangle]
pub extern "C" fn GetV2RayStatus() -> *mut c_char {
    ffi::into_c_string(messages::status(HOST.status()))
}

/// 1 while an instance is running, 0 otherwise.
#[no_mangle]
pub extern "C" fn IsV2RayRunning() -> c_int {
    c_int::from(HOST.is_running())
}

#[no_mangle]
pub extern "C" fn GetV2RayVersion() -> *mut c_char {
    ffi::into_c_string(HOST.version())
}

/// # Safety
/// `config` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn RestartV2Ray(config: *const c_char) -> *mut c_char {
    logger::breadcrumb(BreadcrumbFlags::FFI, "RestartV2Ray");
    let config = unsafe { ffi::read_str(config) };
    relaunch(ConfigSource::Json(&config))
}

/// # Safety
/// `path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn RestartV2RayWithConfig(path: *const c_char) -> *mut c_char {
    logger::breadcrumb(BreadcrumbFlags::FFI, "RestartV2RayWithConfig");
    let path = unsafe { ffi::read_path(path) };
    relaunch(ConfigSource::File(&path))
}

/// # Safety
/// `config` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn TestV2RayConfig(config: *const c_char) -> *mut c_char {
    let config = unsafe { ffi::read_str(config) };
    check(ConfigSource::Json(&config))
}

/// # Safety
/// `path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn TestV2RayConfigFile(path: *const c_char) -> *mut c_char {
    let path = unsafe { ffi::read_path(path) };
    check(ConfigSource::File(&path))
}

#[no_mangle]
pub extern "C" fn GetConfigTemplate() -> *mut c_char {
    ffi::into_c_string(TEMPLATE)
}

/// Releases a string returned by any function in this library.
///
/// # Safety
/// `value` must be null or a pointer obtained from this library that has not
/// been freed yet.
#[no_mangle]
pub unsafe extern "C" fn FreeString(value: *mut c_char) {
    unsafe { ffi::release(value) }
}

/// Installs (or, with a null sink, removes) the host log callback. `level`
/// names the minimum level; null keeps the current one.
///
/// # Safety
/// `sink` must be null or point to a valid [`V2RayLogSink`]; `level` must be
/// null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn V2RaySetLogSink(sink: *const V2RayLogSink, level: *const c_char) -> bool {
    let sink_ref = unsafe { sink.as_ref() };
    let level_str = if level.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(level) }.to_str().ok()
    };
    logger::install_sink(sink_ref, level_str).is_ok()
}

#[no_mangle]
pub extern "C" fn V2RaySetBreadcrumbMask(mask: u32) {
    logger::set_breadcrumb_mask(mask);
}
