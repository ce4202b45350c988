// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Job execution dispatch table and sandboxed output-path resolution
//! (spec §4.5 "Job executor").

mod handlers;
mod registry;
mod safe_path;

pub use handlers::{ChunkCountHandler, EchoHandler};
pub use registry::{ExecutionContext, ExecutionOutcome, JobHandler, Registry};
pub use safe_path::safe_output_dir;
