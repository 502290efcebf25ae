// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for native calls.

use crate::Status;

/// Errors surfaced by the device layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// A device-runtime or operator-library call returned a failure status.
    #[error("[{site}] operators error ({call}): {status}")]
    Native {
        site: &'static str,
        call: &'static str,
        status: Status,
    },

    /// A device kind name could not be parsed.
    #[error("unknown device kind: {0}")]
    UnknownDevice(String),

    /// A dtype name could not be parsed.
    #[error("unknown dtype: {0}")]
    UnknownDType(String),
}

/// Evaluate a native call returning `Result<T, Status>` and convert a
/// failure into [`DeviceError::Native`] tagged with `file:line` and the
/// call text.
///
/// ```
/// use device_rt::{native_call, DeviceError, Status};
///
/// fn failing() -> Result<u32, Status> {
///     Err(Status::BadParam)
/// }
///
/// let err = native_call!(failing()).unwrap_err();
/// assert!(matches!(err, DeviceError::Native { status: Status::BadParam, .. }));
/// assert!(err.to_string().contains("failing()"));
/// ```
#[macro_export]
macro_rules! native_call {
    ($call:expr) => {
        ($call).map_err(|status: $crate::Status| $crate::DeviceError::Native {
            site: concat!(file!(), ":", line!()),
            call: stringify!($call),
            status,
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_thing(ok: bool) -> Result<u64, Status> {
        if ok {
            Ok(7)
        } else {
            Err(Status::DeviceNotFound)
        }
    }

    #[test]
    fn test_native_call_passes_success_through() {
        assert_eq!(native_call!(create_thing(true)).unwrap(), 7);
    }

    #[test]
    fn test_native_call_records_site_and_text() {
        let err = native_call!(create_thing(false)).unwrap_err();
        match &err {
            DeviceError::Native { site, call, status } => {
                assert!(site.contains("error.rs:"));
                assert_eq!(*call, "create_thing(false)");
                assert_eq!(*status, Status::DeviceNotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.starts_with('['));
        assert!(msg.contains("operators error"));
        assert!(msg.contains(&Status::DeviceNotFound.code().to_string()));
    }
}
