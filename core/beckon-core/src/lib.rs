//! # beckon-core
//!
//! Core library for Beckon, providing shared session-tracking logic for all
//! clients (daemon, hook binary, CLI invocations).
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Clients can wrap with async if needed.
//! - **Not thread-safe**: Clients provide their own synchronization (`Mutex`, `RwLock`).
//! - **Graceful degradation**: Missing files return empty/default values, not errors.
//! - **No subprocesses**: Process and multiplexer probing belongs to the daemon;
//!   this crate only touches the filesystem.

// Public modules
pub mod config;
pub mod error;
pub mod paths;
pub mod session;
pub mod team;

// Re-export commonly used items at crate root
pub use config::{load_config, load_config_from, save_config, BeckonConfig};
pub use error::{BeckonError, Result};
pub use session::{
    apply, change_for, identity_key, path_basename, Session, SessionHints, SessionSource,
    SessionStatus, SessionStore, StatusChange, WaitingReason, STORE_VERSION,
};
pub use team::{collapse_teams, PaneLocation};
