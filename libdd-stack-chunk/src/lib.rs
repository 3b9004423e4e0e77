// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Compact binary encoding of the stack traces captured for one thread
//! during one profiling window.
//!
//! A [`ChunkCollector`] interns every captured frame and stack into
//! constant pools and records one run-length compressed stack pointer per
//! sample. A [`ChunkWriter`] serializes the constants reachable from the
//! samples, and a [`ChunkReader`] decodes them back.

pub mod chunk;
pub mod config;
pub mod constant_pool;
mod error;
pub mod frame;
pub mod leb128;

pub use chunk::{ChunkCollector, ChunkData, ChunkReader, ChunkWriter, StackTraceChunk};
pub use config::ChunkConfig;
pub use constant_pool::ConstantPool;
pub use error::ChunkError;
pub use frame::{FrameElement, FrameSequence, ResolvedFrame, StackFrame};
pub use leb128::{Leb128Reader, Leb128Writer};
