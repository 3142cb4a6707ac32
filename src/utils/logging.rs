//! Logging macros gated on a module-level `ENABLE_LOGS` const.
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info};
//!
//! log_info!("flush worker started");
//! ```
//!
//! `log_debug!` additionally requires verbose mode, switched on at startup
//! by `PACELOG_DEBUG`.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// `PACELOG_DEBUG=1` or `PACELOG_DEBUG=true`.
pub fn debug_env_enabled() -> bool {
    std::env::var("PACELOG_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS && $crate::utils::logging::verbose() {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::Mutex;

    const ENABLE_LOGS: bool = true;

    struct Capture(Mutex<Vec<(Level, String)>>);

    impl Log for Capture {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            self.0
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

    #[test]
    fn macros_log_at_their_own_level() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Trace);
        set_verbose(true);

        crate::log_debug!("flush detail {}", 42);
        crate::log_info!("flush summary {}", 42);

        let records = CAPTURE.0.lock().unwrap();
        assert!(records.contains(&(Level::Debug, "flush detail 42".to_string())));
        assert!(records.contains(&(Level::Info, "flush summary 42".to_string())));
    }
}
