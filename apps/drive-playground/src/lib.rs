//! Drive playground: an authenticated HTTP bridge that lists, reads and writes
//! files in exactly one Google Drive folder.
//!
//! Every read proves the file is a direct child of the configured folder, and
//! every write lands in that folder whatever the caller asks for.

#![forbid(unsafe_code)]

pub mod config;
pub mod drive;
pub mod http;
pub mod oauth;
pub mod service;
