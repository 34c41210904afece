// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Module Parameter Parsing
//!
//! This module parses the driver's module parameters from a kernel-style
//! command line and stores them in `DriverParams`.
//!
//! # Design
//!
//! - Tokens are separated by whitespace
//! - Only keys under the `syna_drm.` prefix are considered
//! - A key without '=' is treated as a boolean set to true
//! - Malformed values keep the default and log a warning
//!
//! # Usage
//!
//! ```rust,ignore
//! let params = DriverParams::parse("syna_drm.async_flip=0 syna_drm.mode=1280x720@60");
//! assert!(!params.async_flip);
//! ```

use crate::{log_debug, log_warn};

/// ============================================================================
/// Parameter Keys
/// ============================================================================

/// Prefix every driver parameter is namespaced under
pub const PARAM_PREFIX: &str = "syna_drm.";

/// Async page-flip emulation
pub const PARAM_ASYNC_FLIP: &str = "async_flip";

/// Enable all displays by default
pub const PARAM_ENABLE_ALL: &str = "enable_all";

/// Preferred display mode
pub const PARAM_MODE: &str = "mode";

/// ============================================================================
/// Driver Parameters
/// ============================================================================

/// Driver module parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverParams {
    /// Async page-flip emulation
    pub async_flip: bool,

    /// Report every connector as connected
    pub enable_all: bool,

    /// Preferred display mode, e.g. "1920x1080" or "1280x720@60"
    pub mode: String,
}

impl Default for DriverParams {
    fn default() -> Self {
        Self {
            async_flip: true,
            enable_all: true,
            mode: String::new(),
        }
    }
}

impl DriverParams {
    /// Parse parameters from a command line
    ///
    /// Unknown keys are ignored.
    pub fn parse(cmdline: &str) -> Self {
        let mut params = Self::default();

        for token in cmdline.split_whitespace() {
            let Some(arg) = token.strip_prefix(PARAM_PREFIX) else {
                continue;
            };

            let (key, value) = match arg.split_once('=') {
                Some((k, v)) => (k, v),
                None => (arg, "1"),
            };

            match key {
                PARAM_ASYNC_FLIP => params.async_flip = parse_bool(key, value, params.async_flip),
                PARAM_ENABLE_ALL => params.enable_all = parse_bool(key, value, params.enable_all),
                PARAM_MODE => params.mode = value.to_string(),
                _ => log_debug!("syna-params: ignoring unknown parameter {}", key),
            }
        }

        params
    }
}

/// Parse a boolean parameter value
///
/// Returns `default` if the value is not recognized.
fn parse_bool(key: &str, value: &str, default: bool) -> bool {
    match value {
        "1" | "y" | "Y" | "true" | "on" => true,
        "0" | "n" | "N" | "false" | "off" => false,
        _ => {
            log_warn!("syna-params: bad boolean '{}' for {}, keeping {}", value, key, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = DriverParams::parse("");
        assert!(params.async_flip);
        assert!(params.enable_all);
        assert!(params.mode.is_empty());
    }

    #[test]
    fn test_parse_all_keys() {
        let params = DriverParams::parse(
            "console=ttyS0 syna_drm.async_flip=0 syna_drm.enable_all=off syna_drm.mode=1280x720@60",
        );
        assert!(!params.async_flip);
        assert!(!params.enable_all);
        assert_eq!(params.mode, "1280x720@60");
    }

    #[test]
    fn test_bare_key_is_true() {
        let params = DriverParams::parse("syna_drm.async_flip=n syna_drm.async_flip");
        assert!(params.async_flip);
    }

    #[test]
    fn test_malformed_bool_keeps_default() {
        let params = DriverParams::parse("syna_drm.enable_all=maybe");
        assert!(params.enable_all);
    }

    #[test]
    fn test_unknown_key_ignored() {
        let params = DriverParams::parse("syna_drm.frobnicate=3");
        assert_eq!(params, DriverParams::default());
    }
}
