//! Configuration for the Docker execution sandbox.

use std::path::PathBuf;
use std::time::Duration;

/// Default sandbox image. It must provide `go`, `python3` and `bash`.
pub const DEFAULT_IMAGE: &str = "py-golang:latest";

/// Configuration for the sandbox system.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker image to use for every job.
    pub image: String,
    /// Resource ceilings applied to every container.
    pub limits: ResourceLimits,
    /// Host directory under which per-job scratch directories are created.
    pub scripts_dir: PathBuf,
    /// Log container exit status and teardown at info instead of debug.
    pub log_exit_status: bool,
    /// Remove containers after use. When off, stopped containers pile up and
    /// have to be reaped outside this process.
    pub auto_remove: bool,
    /// Whether to pull the image at startup if it is not present.
    pub auto_pull_image: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            limits: ResourceLimits::default(),
            scripts_dir: PathBuf::from("scripts"),
            log_exit_status: false,
            auto_remove: true,
            auto_pull_image: true,
        }
    }
}

/// Resource limits for container execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum memory in bytes.
    pub memory_bytes: u64,
    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: u64,
    /// Maximum time between container start and collected output.
    pub timeout: Duration,
    /// Maximum output size in bytes, split evenly between stdout and stderr.
    pub max_output_bytes: usize,
}

impl ResourceLimits {
    pub const NANO_CPUS_PER_CORE: u64 = 1_000_000_000;
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 128 * 1024 * 1024, // 128 MB
            nano_cpus: Self::NANO_CPUS_PER_CORE,
            timeout: Duration::from_secs(30),
            max_output_bytes: 64 * 1024, // 64 KB
        }
    }
}
