// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Common type aliases used throughout the driver

/// Virtual address type (consumer address spaces)
pub type VAddr = u64;

/// Physical/device address type
pub type PAddr = u64;

/// Page size shift
pub const PAGE_SHIFT: u32 = 12;

/// Page size in bytes
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Round `size` up to the page granularity
///
/// Returns `None` on overflow.
pub const fn page_align(size: usize) -> Option<usize> {
    match size.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(v & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// Check whether a value is page aligned
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE as u64 - 1) == 0
}
