use crate::ffi::V2RayLogSink;
use bitflags::bitflags;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

type LogCallback = unsafe extern "C" fn(
    level: *const c_char,
    message: *const c_char,
    breadcrumbs: u32,
    context: *mut c_void,
);

static LOGGER: Lazy<LogManager> = Lazy::new(LogManager::new);

pub fn warn(message: impl Into<String>) {
    LOGGER.log(LogLevel::Warn, message.into());
}

pub fn error(message: impl Into<String>) {
    LOGGER.log(LogLevel::Error, message.into());
}

pub fn info(message: impl Into<String>) {
    LOGGER.log(LogLevel::Info, message.into());
}

pub fn debug(message: impl Into<String>) {
    LOGGER.log(LogLevel::Debug, message.into());
}

pub fn breadcrumb(flag: BreadcrumbFlags, message: impl Into<String>) {
    LOGGER.breadcrumb(flag, message.into());
}

pub fn install_sink(sink: Option<&V2RayLogSink>, level: Option<&str>) -> Result<(), &'static str> {
    LOGGER.install_sink(sink, level)
}

pub fn set_breadcrumb_mask(mask: u32) {
    LOGGER.set_breadcrumb_mask(mask);
}

/// Changes the active level without touching the installed sink.
pub fn set_level(level: LogLevel) {
    LOGGER.set_level(level);
}

pub fn level() -> LogLevel {
    LOGGER.level()
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BreadcrumbFlags: u32 {
        const LIFECYCLE = 0b0000_0001;
        const CONFIG    = 0b0000_0010;
        const ENGINE    = 0b0000_0100;
        const INBOUND   = 0b0000_1000;
        const OUTBOUND  = 0b0001_0000;
        const FFI       = 0b0010_0000;
        const ALL       = u32::MAX;
    }
}

/// Ordered from quietest to noisiest; a message is emitted when its level is
/// at or below the active one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    /// Lenient parse used for host-supplied sink levels.
    fn from_str(value: &str) -> Self {
        Self::parse(value).unwrap_or(LogLevel::Info)
    }

    /// Strict parse accepting the names used in configuration files.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" | "off" => Some(LogLevel::Off),
            "error" | "err" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" | "dbg" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            4 => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Clone, Copy)]
struct LogSinkInner {
    callback: LogCallback,
    context: *mut std::ffi::c_void,
    breadcrumbs: BreadcrumbFlags,
}

unsafe impl Send for LogSinkInner {}
unsafe impl Sync for LogSinkInner {}

struct LogManager {
    sink: Mutex<Option<LogSinkInner>>,
    min_level: AtomicU8,
    prefix: String,
}

impl LogManager {
    fn new() -> Self {
        let pid = std::process::id();
        Self {
            sink: Mutex::new(None),
            min_level: AtomicU8::new(LogLevel::Info as u8),
            prefix: format!("[v2ray-p{pid}]"),
        }
    }

    fn install_sink(
        &self,
        sink: Option<&V2RayLogSink>,
        level: Option<&str>,
    ) -> Result<(), &'static str> {
        let mut guard = self.sink.lock();
        if let Some(sink) = sink {
            let callback = match sink.log {
                Some(cb) => cb,
                None => return Err("log callback missing"),
            };
            if let Some(level) = level {
                self.set_level(LogLevel::from_str(level));
            }
            *guard = Some(LogSinkInner {
                callback,
                context: sink.context,
                breadcrumbs: BreadcrumbFlags::from_bits_truncate(sink.enabled_breadcrumbs),
            });
        } else {
            *guard = None;
        }
        Ok(())
    }

    fn set_breadcrumb_mask(&self, mask: u32) {
        if let Some(inner) = self.sink.lock().as_mut() {
            inner.breadcrumbs = BreadcrumbFlags::from_bits_truncate(mask);
        }
    }

    fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    fn log(&self, level: LogLevel, message: String) {
        if message.is_empty() {
            return;
        }
        self.dispatch(level, BreadcrumbFlags::empty(), message);
    }

    fn breadcrumb(&self, flag: BreadcrumbFlags, message: String) {
        if message.is_empty() || flag.is_empty() {
            return;
        }
        self.dispatch(LogLevel::Debug, flag, message);
    }

    fn dispatch(&self, level: LogLevel, breadcrumbs: BreadcrumbFlags, message: String) {
        let sink = {
            let guard = self.sink.lock();
            *guard
        };
        let Some(inner) = sink else { return };
        if level > self.level() && breadcrumbs.is_empty() {
            return;
        }
        if !breadcrumbs.is_empty() && !inner.breadcrumbs.intersects(breadcrumbs) {
            return;
        }

        let formatted = format_line(&self.prefix, breadcrumbs, &message);

        let level_c = match CString::new(level.as_str()) {
            Ok(val) => val,
            Err(_) => return,
        };
        let msg_c = match CString::new(formatted) {
            Ok(val) => val,
            Err(_) => return,
        };
        unsafe {
            (inner.callback)(
                level_c.as_ptr(),
                msg_c.as_ptr(),
                breadcrumbs.bits(),
                inner.context,
            );
        }
    }
}

fn format_line(prefix: &str, breadcrumbs: BreadcrumbFlags, message: &str) -> String {
    if breadcrumbs.is_empty() {
        format!("{} {}", prefix, message)
    } else {
        format!("{} [{}] {}", prefix, label_for(breadcrumbs), message)
    }
}

fn label_for(flags: BreadcrumbFlags) -> &'static str {
    if flags.contains(BreadcrumbFlags::LIFECYCLE) {
        "LIFECYCLE"
    } else if flags.contains(BreadcrumbFlags::CONFIG) {
        "CONFIG"
    } else if flags.contains(BreadcrumbFlags::ENGINE) {
        "ENGINE"
    } else if flags.contains(BreadcrumbFlags::INBOUND) {
        "INBOUND"
    } else if flags.contains(BreadcrumbFlags::OUTBOUND) {
        "OUTBOUND"
    } else if flags.contains(BreadcrumbFlags::FFI) {
        "FFI"
    } else {
        "LOG"
    }
}

// ============================================================================
// Rate-Limited Error Logging
// ============================================================================
// Accept loops and per-connection failures can repeat thousands of times per
// second (fd exhaustion, scanners). Each category is limited independently.

/// Minimum interval between logs of the same error category (in milliseconds).
const RATE_LIMIT_INTERVAL_MS: u64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Listener accept failures
    Accept,
    /// Inbound protocol handshake failures
    Handshake,
    /// Outbound dial failures
    Dial,
    /// Relay I/O errors after the handshake
    Relay,
}

impl ErrorCategory {
    fn index(self) -> usize {
        match self {
            Self::Accept => 0,
            Self::Handshake => 1,
            Self::Dial => 2,
            Self::Relay => 3,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Handshake => "HANDSHAKE",
            Self::Dial => "DIAL",
            Self::Relay => "RELAY",
        }
    }
}

struct RateLimitedLogger {
    /// Last log time (unix millis) for each error category.
    last_log_times: [AtomicU64; 4],
}

impl RateLimitedLogger {
    const fn new() -> Self {
        Self {
            last_log_times: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    fn try_log(&self, category: ErrorCategory, message: &str) -> bool {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let idx = category.index();
        let last = self.last_log_times[idx].load(Ordering::Relaxed);

        if now_ms.saturating_sub(last) < RATE_LIMIT_INTERVAL_MS {
            return false;
        }

        if self.last_log_times[idx]
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            warn(format!("[{}] {}", category.label(), message));
            true
        } else {
            false
        }
    }
}

static RATE_LIMITER: RateLimitedLogger = RateLimitedLogger::new();

/// Log a warning with rate limiting to prevent log flooding.
/// Only one log per category per second will be emitted.
/// Returns true if the log was emitted, false if suppressed.
pub fn rate_limited_error(category: ErrorCategory, message: impl Into<String>) -> bool {
    RATE_LIMITER.try_log(category, &message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_config_names() {
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("NONE"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("Debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::from_str("verbose"), LogLevel::Info);
    }

    #[test]
    fn levels_round_trip_through_storage() {
        for level in [
            LogLevel::Off,
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
        ] {
            assert_eq!(LogLevel::from_u8(level as u8), level);
        }
        assert!(LogLevel::Debug > LogLevel::Error);
        assert!(LogLevel::Error > LogLevel::Off);
    }

    #[test]
    fn breadcrumb_lines_carry_category_label() {
        let line = format_line("[p]", BreadcrumbFlags::ENGINE, "bound");
        assert_eq!(line, "[p] [ENGINE] bound");
        let plain = format_line("[p]", BreadcrumbFlags::empty(), "hello");
        assert_eq!(plain, "[p] hello");
    }

    #[test]
    fn rate_limiter_suppresses_burst() {
        let limiter = RateLimitedLogger::new();
        assert!(limiter.try_log(ErrorCategory::Relay, "first"));
        assert!(!limiter.try_log(ErrorCategory::Relay, "second"));
        assert!(limiter.try_log(ErrorCategory::Dial, "other category"));
    }
}
