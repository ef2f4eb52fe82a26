// crates/mediaport-core/src/logging.rs
//
// Process-wide logging facility. The host installs a callback; the library
// never writes anywhere else. The default sink prints
// `<LEVEL>|<UTC timestamp ms>|<file:line|message>` to stderr. A callback
// that panics is contained at this boundary so logging can never take the
// caller down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Fatal = 0,
    Critical = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Critical => "CRITICAL",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

enum Sink {
    Default,
    Disabled,
    Custom(LogCallback),
}

static SINK: Lazy<RwLock<Sink>> = Lazy::new(|| RwLock::new(Sink::Default));
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warning as u8);

/// Messages less important than `level` are suppressed.
pub fn set_log_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Install a callback for library messages. `None` silences logging
/// entirely; the default sink writes to stderr.
pub fn assign_log_callback(callback: Option<LogCallback>) {
    let mut sink = SINK.write().unwrap();
    *sink = match callback {
        Some(cb) => Sink::Custom(cb),
        None => Sink::Disabled,
    };
}

/// Restore the default stderr sink.
pub fn reset_log_callback() {
    *SINK.write().unwrap() = Sink::Default;
}

fn default_sink(level: LogLevel, message: &str) {
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
    eprintln!("{}|{}|{}", level.tag(), now, message);
}

/// Intended for internal use through the `l*!` macros.
pub fn log_message(level: LogLevel, message: &str) {
    if (level as u8) > LEVEL.load(Ordering::Relaxed) {
        return;
    }
    let sink = SINK.read().unwrap();
    let result = match &*sink {
        Sink::Disabled => return,
        Sink::Default => catch_unwind(AssertUnwindSafe(|| default_sink(level, message))),
        Sink::Custom(cb) => catch_unwind(AssertUnwindSafe(|| cb(level, message))),
    };
    // A throwing callback is the host's bug; swallow it per the contract
    // that logging is the only side channel and must not itself fail.
    drop(result);
}

#[macro_export]
macro_rules! lfatal {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Fatal,
            &format!("{}:{}|{}", file!(), line!(), format_args!($($arg)*)),
        )
    };
}

#[macro_export]
macro_rules! lcritical {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Critical,
            &format!("{}:{}|{}", file!(), line!(), format_args!($($arg)*)),
        )
    };
}

#[macro_export]
macro_rules! lwarning {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Warning,
            &format!("{}:{}|{}", file!(), line!(), format_args!($($arg)*)),
        )
    };
}

#[macro_export]
macro_rules! linfo {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Info,
            &format!("{}:{}|{}", file!(), line!(), format_args!($($arg)*)),
        )
    };
}

#[macro_export]
macro_rules! ldebug {
    ($($arg:tt)*) => {
        $crate::logging::log_message(
            $crate::logging::LogLevel::Debug,
            &format!("{}:{}|{}", file!(), line!(), format_args!($($arg)*)),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    // Single test function: the sink and level are process-wide.
    #[test]
    fn callback_filtering_and_panic_containment() {
        let seen: Arc<Mutex<Vec<(LogLevel, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        assign_log_callback(Some(Box::new(move |level, msg| {
            sink.lock().unwrap().push((level, msg.to_string()));
        })));

        set_log_level(LogLevel::Warning);
        log_message(LogLevel::Debug, "hidden");
        log_message(LogLevel::Critical, "shown");
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].0, LogLevel::Critical);
            assert_eq!(seen[0].1, "shown");
        }

        set_log_level(LogLevel::Debug);
        log_message(LogLevel::Debug, "now visible");
        assert_eq!(seen.lock().unwrap().len(), 2);

        // A panicking callback must not propagate.
        assign_log_callback(Some(Box::new(|_, _| panic!("host bug"))));
        log_message(LogLevel::Critical, "contained");

        set_log_level(LogLevel::Warning);
        reset_log_callback();
    }
}
