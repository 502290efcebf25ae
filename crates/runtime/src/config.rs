// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! device = "cpu"
//! device_id = 0
//! workspace_size = "7G"
//! enable_profiling = true
//! ```

use std::fmt;
use std::path::Path;

use device_rt::DeviceKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::RuntimeError;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// A non-zero byte count, written as `"7G"`, `"512MB"`, `"64K"` or plain
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(usize);

impl ByteSize {
    pub const fn from_bytes(bytes: usize) -> Self {
        Self(bytes)
    }

    pub const fn from_mb(mb: usize) -> Self {
        Self(mb * MIB)
    }

    pub const fn from_gb(gb: usize) -> Self {
        Self(gb * GIB)
    }

    pub fn as_bytes(self) -> usize {
        self.0
    }

    /// Parses a size string. Suffixes are case-insensitive: `K`/`KB`,
    /// `M`/`MB`, `G`/`GB`, `B`, or none for bytes.
    pub fn parse(s: &str) -> Result<Self, RuntimeError> {
        let s = s.trim();
        let upper = s.to_ascii_uppercase();
        let (num_str, multiplier) = if upper.ends_with("GB") {
            (&s[..s.len() - 2], GIB)
        } else if upper.ends_with('G') {
            (&s[..s.len() - 1], GIB)
        } else if upper.ends_with("MB") {
            (&s[..s.len() - 2], MIB)
        } else if upper.ends_with('M') {
            (&s[..s.len() - 1], MIB)
        } else if upper.ends_with("KB") {
            (&s[..s.len() - 2], KIB)
        } else if upper.ends_with('K') {
            (&s[..s.len() - 1], KIB)
        } else if upper.ends_with('B') {
            (&s[..s.len() - 1], 1)
        } else {
            (s, 1)
        };

        let value: usize = num_str.trim().parse().map_err(|_| {
            RuntimeError::ConfigError(format!(
                "invalid size '{s}': expected a number with an optional K, M or G suffix"
            ))
        })?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| RuntimeError::ConfigError(format!("size overflow: '{s}'")))?;
        if bytes == 0 {
            return Err(RuntimeError::ConfigError(format!("size must be non-zero: '{s}'")));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b >= GIB && b % GIB == 0 {
            write!(f, "{}G", b / GIB)
        } else if b >= MIB && b % MIB == 0 {
            write!(f, "{}M", b / MIB)
        } else if b >= KIB && b % KIB == 0 {
            write!(f, "{}K", b / KIB)
        } else {
            write!(f, "{b}")
        }
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Bytes(usize),
        }
        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ByteSize::parse(&s),
            Raw::Bytes(n) => ByteSize::parse(&n.to_string()),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// Configuration for a [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Device the constructing thread binds to.
    #[serde(default = "default_device")]
    pub device: DeviceKind,
    #[serde(default)]
    pub device_id: usize,
    /// Size of the shared kernel scratch buffer.
    #[serde(default = "default_workspace")]
    pub workspace_size: ByteSize,
    /// Whether to record per-operator dispatch timings.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
}

fn default_device() -> DeviceKind {
    DeviceKind::Cpu
}

fn default_workspace() -> ByteSize {
    ByteSize::from_gb(7)
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// A config for `device` with a workspace of `workspace`.
    pub fn with_device(device: DeviceKind, workspace: ByteSize) -> Self {
        Self {
            device,
            workspace_size: workspace,
            ..Self::default()
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            device_id: 0,
            workspace_size: default_workspace(),
            enable_profiling: true,
        }
    }
}
