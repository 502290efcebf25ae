// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DeviceError;

/// Enumerates the element types a tensor can hold.
///
/// The names and byte widths follow the native operator library's dtype
/// table, so a `DType` can be handed to a tensor descriptor unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Byte,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    /// 8-bit float.
    F8,
    F16,
    F32,
    F64,
    /// Complex with 8-bit parts.
    C16,
    /// Complex with 16-bit parts.
    C32,
    /// Complex with 32-bit parts.
    C64,
    /// Complex with 64-bit parts.
    C128,
    BF16,
}

impl DType {
    pub const ALL: [DType; 19] = [
        DType::Byte,
        DType::Bool,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::F8,
        DType::F16,
        DType::F32,
        DType::F64,
        DType::C16,
        DType::C32,
        DType::C64,
        DType::C128,
        DType::BF16,
    ];

    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::Byte | DType::Bool | DType::I8 | DType::U8 | DType::F8 => 1,
            DType::I16 | DType::U16 | DType::F16 | DType::BF16 | DType::C16 => 2,
            DType::I32 | DType::U32 | DType::F32 | DType::C32 => 4,
            DType::I64 | DType::U64 | DType::F64 | DType::C64 => 8,
            DType::C128 => 16,
        }
    }

    /// Returns the upper-case label of this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Byte => "BYTE",
            DType::Bool => "BOOL",
            DType::I8 => "I8",
            DType::I16 => "I16",
            DType::I32 => "I32",
            DType::I64 => "I64",
            DType::U8 => "U8",
            DType::U16 => "U16",
            DType::U32 => "U32",
            DType::U64 => "U64",
            DType::F8 => "F8",
            DType::F16 => "F16",
            DType::F32 => "F32",
            DType::F64 => "F64",
            DType::C16 => "C16",
            DType::C32 => "C32",
            DType::C64 => "C64",
            DType::C128 => "C128",
            DType::BF16 => "BF16",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DType::F8 | DType::F16 | DType::BF16 | DType::F32 | DType::F64
        )
    }

    /// Render one element stored in native byte order.
    ///
    /// `bytes` must hold exactly [`DType::size_bytes`] bytes. Types without a
    /// host representation (F8 and the complex types) render as hex.
    pub fn format_element(self, bytes: &[u8], precision: usize) -> String {
        if bytes.len() != self.size_bytes() {
            return "?".to_string();
        }
        macro_rules! int {
            ($t:ty) => {{
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw).to_string()
            }};
        }
        match self {
            DType::Bool => (bytes[0] != 0).to_string(),
            DType::Byte | DType::U8 => bytes[0].to_string(),
            DType::I8 => (bytes[0] as i8).to_string(),
            DType::I16 => int!(i16),
            DType::I32 => int!(i32),
            DType::I64 => int!(i64),
            DType::U16 => int!(u16),
            DType::U32 => int!(u32),
            DType::U64 => int!(u64),
            DType::F32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                format!("{:.*}", precision, f32::from_ne_bytes(raw))
            }
            DType::F64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                format!("{:.*}", precision, f64::from_ne_bytes(raw))
            }
            DType::BF16 => {
                let bits = u16::from_ne_bytes([bytes[0], bytes[1]]);
                format!("{:.*}", precision, f32::from_bits((bits as u32) << 16))
            }
            DType::F16 => {
                let bits = u16::from_ne_bytes([bytes[0], bytes[1]]);
                format!("{:.*}", precision, f16_to_f32(bits))
            }
            DType::F8 | DType::C16 | DType::C32 | DType::C64 | DType::C128 => {
                let mut s = String::from("0x");
                for b in bytes.iter().rev() {
                    s.push_str(&format!("{b:02x}"));
                }
                s
            }
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DeviceError::UnknownDType(s.to_string()))
    }
}

fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) & 1) as u32;
    let exp = ((bits >> 10) & 0x1f) as u32;
    let frac = (bits & 0x3ff) as u32;
    let value = match exp {
        0 => (frac as f32) * 2f32.powi(-24),
        0x1f if frac == 0 => f32::INFINITY,
        0x1f => f32::NAN,
        _ => f32::from_bits(((exp + 112) << 23) | (frac << 13)),
    };
    if sign == 1 {
        -value
    } else {
        value
    }
}

// ── Host element types ───────────────────────────────────────────

/// A host scalar type with a fixed [`DType`], used for typed upload and
/// download of tensor data.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    /// Append the native-endian bytes of `self` to `out`.
    fn write_ne(self, out: &mut Vec<u8>);

    /// Decode one element from exactly `size_of::<Self>()` native-endian bytes.
    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $d:expr),* $(,)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = $d;

                fn write_ne(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn read_ne(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_element! {
    f32 => DType::F32,
    f64 => DType::F64,
    i8 => DType::I8,
    i16 => DType::I16,
    i32 => DType::I32,
    i64 => DType::I64,
    u8 => DType::U8,
    u16 => DType::U16,
    u32 => DType::U32,
    u64 => DType::U64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_table() {
        assert_eq!(DType::F32.size_bytes(), 4);
        assert_eq!(DType::BF16.size_bytes(), 2);
        assert_eq!(DType::C128.size_bytes(), 16);
        assert_eq!(DType::Bool.size_bytes(), 1);
        assert_eq!(DType::I64.size_bytes(), 8);
    }

    #[test]
    fn test_element_sizes_match_dtype() {
        assert_eq!(std::mem::size_of::<f32>(), f32::DTYPE.size_bytes());
        assert_eq!(std::mem::size_of::<f64>(), f64::DTYPE.size_bytes());
        assert_eq!(std::mem::size_of::<i16>(), i16::DTYPE.size_bytes());
        assert_eq!(std::mem::size_of::<u64>(), u64::DTYPE.size_bytes());
    }

    #[test]
    fn test_parse() {
        assert_eq!("f32".parse::<DType>().unwrap(), DType::F32);
        assert_eq!("BF16".parse::<DType>().unwrap(), DType::BF16);
        assert!("f128".parse::<DType>().is_err());
    }

    #[test]
    fn test_format_element() {
        let bytes = 1.5f32.to_ne_bytes();
        assert_eq!(DType::F32.format_element(&bytes, 2), "1.50");
        let bytes = (-3i32).to_ne_bytes();
        assert_eq!(DType::I32.format_element(&bytes, 2), "-3");
        // 1.0 in bf16 and f16.
        assert_eq!(DType::BF16.format_element(&0x3f80u16.to_ne_bytes(), 1), "1.0");
        assert_eq!(DType::F16.format_element(&0x3c00u16.to_ne_bytes(), 1), "1.0");
        assert_eq!(DType::F16.format_element(&0xc000u16.to_ne_bytes(), 1), "-2.0");
        assert_eq!(DType::F32.format_element(&[0u8; 3], 1), "?");
    }

    #[test]
    fn test_element_bytes() {
        let mut out = Vec::new();
        2.25f64.write_ne(&mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(f64::read_ne(&out), 2.25);
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&DType::C64).unwrap();
        let back: DType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DType::C64);
    }
}
