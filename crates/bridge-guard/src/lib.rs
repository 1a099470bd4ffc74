//! Authorization and confinement layer shared by the bridge services.
//!
//! Every protected request goes through the same steps: the [`ApiKey`]
//! check, then one [`ResourceGuard`] ([`PathGuard`] for a local project root,
//! [`FolderGuard`] for a remote folder), then the [`CapabilityGate`] for
//! operations that must be switched on explicitly. All guards are pure over
//! configuration fixed at startup, so handlers can share them freely.

#![forbid(unsafe_code)]

pub mod capability;
pub mod credential;
pub mod error;
pub mod guard;
pub mod http;
pub mod path;
pub mod remote;

pub use capability::{CapabilityGate, parse_flag};
pub use credential::ApiKey;
pub use error::{AccessError, AccessResult};
pub use guard::ResourceGuard;
pub use path::PathGuard;
pub use remote::{FolderGuard, RemoteResourceRef};
