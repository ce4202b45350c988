// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Shared building blocks for the `dispatchctl` binary, split out so the
//! subcommand bodies can be exercised without spawning a process.

pub mod commands;
