//! Filesystem management for container isolation.
//!
//! Prepares the mounts of a new container ahead of fork and forces them
//! away at teardown.

pub mod mount;
