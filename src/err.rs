// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Driver Error Codes
//!
//! This module provides the error type and status codes used throughout
//! the display pipeline. Status codes are negative Linux errno values,
//! since that is what the ioctl surface hands back to userspace.

/// Error code type (negative values indicate errors)
pub type Status = i32;

/// Success status code
pub const STATUS_OK: Status = 0;

/// Result type for driver operations
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Driver error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No such object (ENOENT)
    NotFound = -2,
    /// Hardware call failed (EIO)
    Io = -5,
    /// Allocation or mapping failed (ENOMEM)
    NoMemory = -12,
    /// Precondition violated by the caller (EFAULT)
    Fault = -14,
    /// Resource already in use (EBUSY)
    Busy = -16,
    /// Invalid argument (EINVAL)
    InvalidArgs = -22,
    /// Object is not in a state that allows the operation (EBADFD)
    BadState = -77,
    /// Unsupported combination (EOPNOTSUPP)
    NotSupported = -95,
}

impl Error {
    /// Convert error to status code
    pub fn to_status(self) -> Status {
        self as Status
    }

    /// Convert status code to error
    ///
    /// Unknown codes collapse to `Io`.
    pub fn from_status(status: Status) -> Self {
        match status {
            -2 => Error::NotFound,
            -5 => Error::Io,
            -12 => Error::NoMemory,
            -14 => Error::Fault,
            -16 => Error::Busy,
            -22 => Error::InvalidArgs,
            -77 => Error::BadState,
            -95 => Error::NotSupported,
            _ => Error::Io,
        }
    }

    /// Short name, as printed in diagnostics
    pub fn as_str(self) -> &'static str {
        match self {
            Error::NotFound => "ENOENT",
            Error::Io => "EIO",
            Error::NoMemory => "ENOMEM",
            Error::Fault => "EFAULT",
            Error::Busy => "EBUSY",
            Error::InvalidArgs => "EINVAL",
            Error::BadState => "EBADFD",
            Error::NotSupported => "EOPNOTSUPP",
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.to_status())
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Self::from_status(status)
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

/// Collapse a result into an ioctl status code
pub fn to_status<T>(result: Result<T>) -> Status {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.to_status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_known_codes() {
        for err in [
            Error::NotFound,
            Error::Io,
            Error::NoMemory,
            Error::Fault,
            Error::Busy,
            Error::InvalidArgs,
            Error::BadState,
            Error::NotSupported,
        ] {
            assert!(err.to_status() < 0);
            assert_eq!(Error::from_status(err.to_status()), err);
        }
    }

    #[test]
    fn test_unknown_status_is_io() {
        assert_eq!(Error::from(-1234), Error::Io);
    }

    #[test]
    fn test_to_status() {
        assert_eq!(to_status(Ok::<u32, Error>(7)), STATUS_OK);
        assert_eq!(to_status::<()>(Err(Error::Busy)), -16);
    }
}
