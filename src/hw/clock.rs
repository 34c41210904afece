// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Pixel Clock Computation
//!
//! The VPP pixel clock is produced by a PLL fed from a fixed reference:
//!
//! ```text
//! vco = ref * mult / pre_div       (VCO_MIN_KHZ ..= VCO_MAX_KHZ)
//! out = vco / post_div
//! ```
//!
//! `compute()` searches the divider space for the setting closest to the
//! requested rate and rejects targets it cannot hit within tolerance. It is
//! pure, so the mode-set path validates the clock before touching any
//! register.

use crate::err::{Error, Result};
use crate::log_debug;

/// PLL reference clock
pub const REF_CLOCK_KHZ: u64 = 27_000;

/// Lowest VCO frequency the PLL locks at
pub const VCO_MIN_KHZ: u64 = 600_000;

/// Highest VCO frequency the PLL locks at
pub const VCO_MAX_KHZ: u64 = 1_800_000;

/// Fastest pixel clock the VPP accepts (4K@60)
pub const MAX_PIXEL_CLOCK_KHZ: u32 = 600_000;

/// Accepted deviation from the target, in parts per 10000
pub const TOLERANCE_PPTT: u64 = 50;

const PRE_DIV_MAX: u64 = 16;
const MULT_MAX: u64 = 255;
const POST_DIVS: [u64; 7] = [1, 2, 4, 8, 16, 32, 64];

/// A validated PLL setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSetting {
    /// Requested pixel clock
    pub target_khz: u32,
    /// Rate the PLL will actually produce
    pub actual_khz: u32,
    /// Reference pre-divider
    pub pre_div: u32,
    /// Feedback multiplier
    pub mult: u32,
    /// Output post-divider
    pub post_div: u32,
}

/// Compute the PLL setting for a pixel clock
pub fn compute(target_khz: u32) -> Result<ClockSetting> {
    if target_khz == 0 || target_khz > MAX_PIXEL_CLOCK_KHZ {
        return Err(Error::InvalidArgs);
    }

    let target = target_khz as u64;
    let mut best: Option<(u64, ClockSetting)> = None;

    for &post_div in POST_DIVS.iter() {
        let vco = target * post_div;
        if !(VCO_MIN_KHZ..=VCO_MAX_KHZ).contains(&vco) {
            continue;
        }

        for pre_div in 1..=PRE_DIV_MAX {
            let mult = (vco * pre_div + REF_CLOCK_KHZ / 2) / REF_CLOCK_KHZ;
            if mult == 0 || mult > MULT_MAX {
                continue;
            }

            let actual_vco = REF_CLOCK_KHZ * mult / pre_div;
            if !(VCO_MIN_KHZ..=VCO_MAX_KHZ).contains(&actual_vco) {
                continue;
            }

            let actual = actual_vco / post_div;
            let error = actual.abs_diff(target);

            if best.as_ref().map_or(true, |(e, _)| error < *e) {
                best = Some((
                    error,
                    ClockSetting {
                        target_khz,
                        actual_khz: actual as u32,
                        pre_div: pre_div as u32,
                        mult: mult as u32,
                        post_div: post_div as u32,
                    },
                ));
            }
        }
    }

    match best {
        Some((error, setting)) if error * 10_000 <= target * TOLERANCE_PPTT => {
            log_debug!(
                "syna-clk: {} kHz -> {} kHz (pre {} mult {} post {})",
                target_khz,
                setting.actual_khz,
                setting.pre_div,
                setting.mult,
                setting.post_div
            );
            Ok(setting)
        }
        _ => Err(Error::InvalidArgs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1080p60_is_exact() {
        let s = compute(148_500).unwrap();
        assert_eq!(s.actual_khz, 148_500);
        let vco = REF_CLOCK_KHZ * s.mult as u64 / s.pre_div as u64;
        assert!((VCO_MIN_KHZ..=VCO_MAX_KHZ).contains(&vco));
    }

    #[test]
    fn test_common_rates() {
        for khz in [25_175, 27_000, 74_250, 297_000, 594_000] {
            let s = compute(khz).unwrap();
            let err = (s.actual_khz as u64).abs_diff(khz as u64);
            assert!(err * 10_000 <= khz as u64 * TOLERANCE_PPTT, "{} kHz", khz);
        }
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(compute(0), Err(Error::InvalidArgs));
        assert_eq!(compute(MAX_PIXEL_CLOCK_KHZ + 1), Err(Error::InvalidArgs));
    }
}
