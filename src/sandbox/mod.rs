//! Docker execution sandbox for untrusted code.
//!
//! Each job gets its own scratch directory and its own container:
//!
//! ```text
//! (lang, code) ─▶ ScriptMaterializer ─▶ scripts/<job>/generated_script.<ext>
//!                                              │ bind mount
//!                                              ▼
//!                 SandboxManager ─▶ container <job> (no network, capped mem/cpu)
//!                                              │ logs
//!                                              ▼
//!                                         ExecOutput
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use code_exec::sandbox::{DockerBackend, SandboxConfig, SandboxManager};
//!
//! let backend = Arc::new(DockerBackend::connect().await?);
//! let manager = SandboxManager::new(SandboxConfig::default(), backend)?;
//! manager.initialize().await?;
//! let output = manager.execute("python", "print('hi')").await?;
//! assert_eq!(output.output, "hi");
//! ```

mod config;
mod container;
mod error;
mod job;
mod language;
mod manager;
mod output;
mod script;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{DEFAULT_IMAGE, ResourceLimits, SandboxConfig};
pub use container::{ContainerBackend, ContainerSpec, DockerBackend, ExitStatus, connect_docker};
pub use error::{Result, SandboxError};
pub use job::{Job, JobId, MAX_JOB_ID_LEN};
pub use language::{BASH_SHEBANG, Language};
pub use manager::SandboxManager;
pub use output::{CollectedLogs, ExecOutput, LogChunk, collect_logs, select_output, strip_control_chars};
pub use script::{CONTAINER_SCRIPTS_DIR, CONTAINER_WORKDIR, SCRIPT_STEM, ScriptFile, ScriptMaterializer};
