//! # nestbox-core
//!
//! Low-level Linux isolation primitives for the Nestbox daemon.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: mount, UTS, IPC, PID, cgroup, and time isolation
//!   entered from the calling thread under a configurable failure policy.
//! - **Filesystem**: the mount seam and forced teardown of container mounts.
//! - **Capabilities**: name/number mapping and bounding-set drops.
//! - **Processes**: signalling and reaping container init processes.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod capability;
pub mod filesystem;
pub mod namespace;
pub mod process;
