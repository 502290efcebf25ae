// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Built-in operator kinds.

mod elementwise_op;
mod gemm_op;
mod rms_norm_op;

pub use elementwise_op::ElementWise;
pub use gemm_op::Gemm;
pub use rms_norm_op::RmsNorm;
