//! Container supervisor daemon for Nestbox.
//!
//! The daemon keeps a [`registry`] of live containers, speaks a framed
//! [`protocol`] over a UNIX socket, and dispatches each session through the
//! [`orchestrator`]. Container creation runs on isolation [`worker`]
//! threads that report back through the same socket via the [`client`].

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod daemon;
pub mod init;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod spec;
pub mod worker;
