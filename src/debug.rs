// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Driver Logging
//!
//! This module provides the logging macros used by every subsystem of the
//! driver. They forward to the `log` facade when the `logging` feature is
//! enabled (the default) and compile to nothing otherwise, so the host
//! decides where the kernel-log equivalent ends up.
//!
//! # Usage
//!
//! ```rust,ignore
//! log_info!("syna-crtc: vblank on");
//! log_error!("syna-gem: allocation of {} bytes failed: {}", size, err);
//! ```

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            ::log::trace!($($arg)*);
        }
    }};
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            ::log::debug!($($arg)*);
        }
    }};
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            ::log::info!($($arg)*);
        }
    }};
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            ::log::warn!($($arg)*);
        }
    }};
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        {
            ::log::error!($($arg)*);
        }
    }};
}
