//! Sandboxed code execution service.
//!
//! Runs user-submitted Go, Python or Bash in a throwaway Docker container
//! with no network, a memory ceiling and a CPU quota, and returns what the
//! program printed.
//!
//! - [`sandbox`]: script materialization, container lifecycle, output capture
//! - [`api`]: the HTTP front end
//! - [`config`]: process-wide configuration from the environment

pub mod api;
pub mod config;
pub mod error;
pub mod sandbox;

pub use config::Config;
pub use error::{ConfigError, ServerError};
