// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: build a small RMSNorm + projection block with a symbolic batch
//! dimension and run it on each emulated device kind.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p runtime --example run_graph
//! ```

use device_rt::{DType, DeviceKind};
use graph_ir::{Graph, GraphBuilder, TensorId};
use runtime::{ByteSize, Runtime, RuntimeConfig};
use shape_expr::{Bindings, Expr};

const HIDDEN: usize = 8;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    for device in [DeviceKind::Cpu, DeviceKind::Nvidia, DeviceKind::Ascend] {
        let rt = Runtime::host(RuntimeConfig::with_device(device, ByteSize::from_mb(4)))?;
        let (mut graph, x, w, proj, y) = build_block()?;
        println!("{graph}");

        let mut env = Bindings::new();
        env.insert("batch".into(), 3);
        graph.topo_sort()?;
        graph.resolve(&env)?;
        rt.data_malloc(&mut graph)?;

        let rows = 3 * HIDDEN;
        let input: Vec<f32> = (0..rows).map(|i| (i % HIDDEN) as f32 - 3.5).collect();
        graph.get_tensor(x)?.write_data(&rt, &input)?;
        graph.get_tensor(w)?.write_data(&rt, &vec![1.0f32; HIDDEN])?;
        let eye: Vec<f32> = (0..HIDDEN * HIDDEN)
            .map(|i| if i / HIDDEN == i % HIDDEN { 2.0 } else { 0.0 })
            .collect();
        graph.get_tensor(proj)?.write_data(&rt, &eye)?;

        let metrics = rt.run(&graph)?;
        rt.synchronize()?;
        println!("{}", metrics.summary());
        println!("y = {}", graph.get_tensor(y)?.format_data(&rt, 8, 3)?);

        rt.data_free(&mut graph)?;
    }
    Ok(())
}

/// `y = rms_norm(x, w) @ proj` with `x: [batch, HIDDEN]`.
fn build_block() -> anyhow::Result<(Graph, TensorId, TensorId, TensorId, TensorId)> {
    let mut b = GraphBuilder::new();
    let x = b.tensor([Expr::var("batch"), Expr::constant(HIDDEN as i64)], DType::F32)?;
    let w = b.tensor([HIDDEN], DType::F32)?;
    let proj = b.tensor([HIDDEN, HIDDEN], DType::F32)?;
    let normed = b.rms_norm(x, w, 1e-6, None)?;
    let y = b.gemm(normed, proj, None, None)?;
    Ok((b.into_graph(), x, w, proj, y))
}
