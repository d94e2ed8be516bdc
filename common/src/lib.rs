//! Shared ambient stack for the LAN file sharer: the session error
//! taxonomy (§7), the at-most-one-task concurrency guard (C3), persisted
//! local configuration (§4.12), and output-directory path confinement
//! used by the file receiver (C8).

pub mod config;
pub mod error;
pub mod guard;
pub mod path_safety;

pub use config::AppConfig;
pub use error::{Result, SessionError};
pub use guard::{ConcurrencyGuard, ConcurrencyPermit};
pub use path_safety::{resolve_output_path, sanitize_basename};
