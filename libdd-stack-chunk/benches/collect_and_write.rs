// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use criterion::*;
use libdd_stack_chunk::{ChunkCollector, ChunkReader, ChunkWriter, StackFrame};

/// A few call paths sharing their root-most frames, as a request handling
/// thread would produce.
fn call_paths() -> Vec<Vec<StackFrame>> {
    let root: Vec<StackFrame> = (0..20)
        .map(|i| StackFrame::new(format!("com.example.server.Layer{i}"), "handle", 100 + i))
        .collect();
    (0..16)
        .map(|path| {
            let mut stack: Vec<StackFrame> = (0..path % 7 + 1)
                .map(|i| StackFrame::new(format!("com.example.app.Handler{path}"), format!("step{i}"), i))
                .collect();
            stack.extend(root.iter().cloned());
            stack
        })
        .collect()
}

fn collect(paths: &[Vec<StackFrame>], samples: usize) -> ChunkCollector {
    let mut collector = ChunkCollector::new(1, "http-worker-1", 0);
    for sample in 0..samples {
        // Runs of identical samples, as in a thread blocked for a while.
        collector.collect(&paths[(sample / 4) % paths.len()]);
    }
    collector.close(samples as i64);
    collector
}

pub fn collect_samples(c: &mut Criterion) {
    let paths = call_paths();
    c.bench_function("collecting 10k samples", |b| {
        b.iter(|| black_box(collect(&paths, 10_000)))
    });
}

pub fn write_chunk(c: &mut Criterion) {
    let collector = collect(&call_paths(), 10_000);
    let writer = ChunkWriter::default();
    c.bench_function("writing a 10k samples chunk", |b| {
        b.iter(|| black_box(writer.write(&collector)))
    });
}

pub fn read_chunk(c: &mut Criterion) {
    let collector = collect(&call_paths(), 10_000);
    let bytes = ChunkWriter::default()
        .write(&collector)
        .unwrap()
        .unwrap();
    c.bench_function("reading a 10k samples chunk", |b| {
        b.iter(|| black_box(ChunkReader::read_all(&bytes)))
    });
}

criterion_group!(benches, collect_samples, write_chunk, read_chunk);
