// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device kinds, memcpy directions and opaque device handles.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DeviceError;

/// Hardware backends a kernel can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Nvidia,
    Cambricon,
    Ascend,
    Metax,
    Moore,
    Iluvatar,
    Kunlun,
    Hygon,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 9] = [
        DeviceKind::Cpu,
        DeviceKind::Nvidia,
        DeviceKind::Cambricon,
        DeviceKind::Ascend,
        DeviceKind::Metax,
        DeviceKind::Moore,
        DeviceKind::Iluvatar,
        DeviceKind::Kunlun,
        DeviceKind::Hygon,
    ];

    /// Upper-case name, used as the suffix of registered kernel names.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Nvidia => "NVIDIA",
            DeviceKind::Cambricon => "CAMBRICON",
            DeviceKind::Ascend => "ASCEND",
            DeviceKind::Metax => "METAX",
            DeviceKind::Moore => "MOORE",
            DeviceKind::Iluvatar => "ILUVATAR",
            DeviceKind::Kunlun => "KUNLUN",
            DeviceKind::Hygon => "HYGON",
        }
    }

    pub fn is_cpu(self) -> bool {
        self == DeviceKind::Cpu
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceKind::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DeviceError::UnknownDevice(s.to_string()))
    }
}

/// Direction of a memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemcpyKind {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl MemcpyKind {
    pub fn src_on_device(self) -> bool {
        matches!(self, MemcpyKind::DeviceToHost | MemcpyKind::DeviceToDevice)
    }

    pub fn dst_on_device(self) -> bool {
        matches!(self, MemcpyKind::HostToDevice | MemcpyKind::DeviceToDevice)
    }
}

/// Address of a host or device allocation.
///
/// A `DevicePtr` is an opaque address: it is never dereferenced by the
/// core, only handed back to the [`crate::DeviceRuntime`] or
/// [`crate::OpLibrary`] that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(NonZeroUsize);

impl DevicePtr {
    pub fn new(addr: NonZeroUsize) -> Self {
        Self(addr)
    }

    /// `None` for a null address.
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    pub fn addr(self) -> usize {
        self.0.get()
    }

    /// The address `bytes` past this one, `None` on overflow.
    pub fn offset(self, bytes: usize) -> Option<Self> {
        self.0.get().checked_add(bytes).and_then(Self::from_addr)
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:#x})", self.0.get())
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// An execution stream created by [`crate::DeviceRuntime::stream_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stream(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(DeviceKind::Nvidia.to_string(), "NVIDIA");
        assert_eq!("kunlun".parse::<DeviceKind>().unwrap(), DeviceKind::Kunlun);
        assert!("tpu".parse::<DeviceKind>().is_err());
        assert!(DeviceKind::Cpu.is_cpu());
        assert!(!DeviceKind::Ascend.is_cpu());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&DeviceKind::Iluvatar).unwrap();
        assert_eq!(json, "\"iluvatar\"");
        let back: DeviceKind = serde_json::from_str("\"cpu\"").unwrap();
        assert_eq!(back, DeviceKind::Cpu);
    }

    #[test]
    fn test_memcpy_directions() {
        assert!(MemcpyKind::HostToDevice.dst_on_device());
        assert!(!MemcpyKind::HostToDevice.src_on_device());
        assert!(MemcpyKind::DeviceToHost.src_on_device());
        assert!(!MemcpyKind::HostToHost.dst_on_device());
    }

    #[test]
    fn test_device_ptr() {
        assert!(DevicePtr::from_addr(0).is_none());
        let p = DevicePtr::from_addr(0x1000).unwrap();
        assert_eq!(p.offset(16).unwrap().addr(), 0x1010);
        assert!(p.offset(usize::MAX).is_none());
        assert_eq!(p.to_string(), "0x1000");
    }
}
