// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-thread execution context.

use std::fmt;

use device_rt::{DeviceKind, Stream};

/// A thread's bound device, device index and execution stream.
///
/// Built by [`crate::Runtime::init_thread_context`]; the stream is owned by
/// the runtime and destroyed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    device: DeviceKind,
    device_id: usize,
    stream: Stream,
}

impl Context {
    pub(crate) fn new(device: DeviceKind, device_id: usize, stream: Stream) -> Self {
        Self {
            device,
            device_id,
            stream,
        }
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn is_cpu(&self) -> bool {
        self.device.is_cpu()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (stream {})", self.device, self.device_id, self.stream.0)
    }
}
