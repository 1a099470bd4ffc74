//! Code bridge: an authenticated HTTP front over one local project
//! directory.
//!
//! Callers can list, read and write files under the configured root and,
//! when `CODE_BRIDGE_ALLOW_RUN` is switched on, run shell commands inside it.

#![forbid(unsafe_code)]

pub mod config;
pub mod http;
pub mod runner;
pub mod service;
