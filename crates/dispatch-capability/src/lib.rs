// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Worker registry, node configuration, and requirement matching (spec §4.4).

mod config;
mod registry;
mod requirements;
mod secret;

pub use config::{
    load_config, schedulable_workers, validate_config, AuthConfig, ClusterConfig, ConfigError, ControllerSettings,
    NodeEntry,
};
pub use registry::{ClusterHealth, ClusterNode, WorkerHealth, WorkerRegistry};
pub use requirements::meets_requirements;
pub use secret::resolve_secret;
