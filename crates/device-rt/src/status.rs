// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Failure statuses returned by native calls.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A non-success status code from the device runtime or operator library.
///
/// Success is represented by `Ok(..)`, so there is no `Success` variant.
/// [`Status::code`] returns the numeric code of the native status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    InternalError,
    NotImplemented,
    BadParam,
    NullPointer,
    DeviceTypeNotSupported,
    DeviceNotFound,
    BadTensorDtype,
    BadTensorShape,
    BadTensorStrides,
    InsufficientWorkspace,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::InternalError => 1,
            Status::NotImplemented => 2,
            Status::BadParam => 3,
            Status::NullPointer => 4,
            Status::DeviceTypeNotSupported => 5,
            Status::DeviceNotFound => 6,
            Status::BadTensorDtype => 10,
            Status::BadTensorShape => 11,
            Status::BadTensorStrides => 12,
            Status::InsufficientWorkspace => 13,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::InternalError => "internal error",
            Status::NotImplemented => "not implemented",
            Status::BadParam => "bad param",
            Status::NullPointer => "null pointer",
            Status::DeviceTypeNotSupported => "device type not supported",
            Status::DeviceNotFound => "device not found",
            Status::BadTensorDtype => "bad tensor dtype",
            Status::BadTensorShape => "bad tensor shape",
            Status::BadTensorStrides => "bad tensor strides",
            Status::InsufficientWorkspace => "insufficient workspace",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.as_str())
    }
}
