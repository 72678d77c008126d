//! Session tracking: records, the transition rule, and the durable registry.
//!
//! Events arrive pre-normalized from the protocol crate. This module owns
//! everything that happens after decoding:
//!
//! - [`types`]: the `Session` record and identity-key scheme
//! - [`transition`]: the total event-to-status mapping
//! - [`store`]: the registry with eviction, disambiguation, and persistence
//! - [`lockfile`]: the advisory lock serializing writers across processes

pub mod lockfile;
pub mod store;
pub mod transition;
pub mod types;

pub use store::{SessionStore, STORE_VERSION};
pub use transition::{apply, change_for, StatusChange};
pub use types::{
    identity_key, path_basename, Session, SessionHints, SessionSource, SessionStatus,
    WaitingReason,
};
