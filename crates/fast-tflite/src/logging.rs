//! Logging utilities for fast-tflite
//!
//! The core never prints directly. Everything goes through the `log` facade so the host decides
//! where load progress, stale results and skipped frames end up.

pub use log::{debug, error, info, trace, warn};

/// Print an informational message
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        $crate::logging::info!(target: "fast_tflite", $($arg)*);
    };
}

/// Print a warning message
#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        $crate::logging::warn!(target: "fast_tflite", $($arg)*);
    };
}

/// Print an error message
#[macro_export]
macro_rules! print_err {
    ($($arg:tt)*) => {
        $crate::logging::error!(target: "fast_tflite", $($arg)*);
    };
}

/// Print a debug message
#[macro_export]
macro_rules! print_debug {
    ($($arg:tt)*) => {
        $crate::logging::debug!(target: "fast_tflite", $($arg)*);
    };
}

#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
