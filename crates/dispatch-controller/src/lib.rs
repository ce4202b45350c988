// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Capability-aware scheduler, reconciler, and local fallback executor for
//! the cluster dispatch core.
//!
//! A controller process owns a [`dispatch_capability::WorkerRegistry`] and
//! wires it into a [`scheduler::Scheduler`], which tries enabled, capable
//! workers in declaration order, retries once, and falls back to
//! [`local::LocalExecutor`] when remote submission can't succeed. A
//! successful remote submit is handed to [`reconcile::Reconciler`], which
//! polls the worker to completion and downloads its artifacts.

mod local;
mod reconcile;
mod scheduler;
mod types;

pub use local::LocalExecutor;
pub use reconcile::{classify_success, normalize_exit_code, Reconciler, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POLL_TIMEOUT_SECS};
pub use scheduler::Scheduler;
pub use types::SubmitResult;
