//! Docker container lifecycle.
//!
//! # Container Setup
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                    Docker Container (name = job id)                     │
//! │                                                                         │
//! │  Command:                                                               │
//! │    <interpreter> /app/scripts/<job id>/generated_script.<ext>           │
//! │    Working directory /app                                               │
//! │                                                                         │
//! │  Mounts:                                                                │
//! │    /app/scripts/<job id> ─▶ Host scratch directory for the job (rw)    │
//! │                                                                         │
//! │  Limits:                                                                │
//! │    Memory: 128MB (default), no swap beyond it                           │
//! │    CPU: 1 core (default)                                                │
//! │    Network mode none                                                    │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::sandbox::config::ResourceLimits;
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::job::Job;
use crate::sandbox::output::LogChunk;
use crate::sandbox::script::{CONTAINER_WORKDIR, ScriptFile};

/// Everything needed to create one job's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name; always the job id.
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub binds: Vec<String>,
    pub memory_bytes: u64,
    pub nano_cpus: u64,
}

impl ContainerSpec {
    /// Build the container spec for a job whose script is already on disk.
    pub fn for_job(job: &Job, script: &ScriptFile, image: &str, limits: &ResourceLimits) -> Self {
        Self {
            name: job.id.to_string(),
            image: image.to_string(),
            cmd: job.language.command(&script.container_path),
            working_dir: CONTAINER_WORKDIR.to_string(),
            binds: vec![script.bind()],
            memory_bytes: limits.memory_bytes,
            nano_cpus: limits.nano_cpus,
        }
    }
}

/// How a container exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i64,
    /// The kernel killed the container for exceeding its memory limit.
    pub oom_killed: bool,
}

/// Operations the sandbox needs from a container runtime.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Check that the runtime is reachable.
    async fn ping(&self) -> Result<()>;

    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> bool;

    /// Pull `image` from its registry.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Block until the container is no longer running.
    async fn wait(&self, id: &str) -> Result<ExitStatus>;

    /// Stream the container's demultiplexed stdout and stderr.
    fn logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<LogChunk>>;

    /// Force-remove a container and its anonymous volumes.
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Container backend talking to the Docker daemon through bollard.
#[derive(Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the local Docker daemon.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }

    fn create_config(spec: &ContainerSpec) -> Config<String> {
        let memory = spec.memory_bytes as i64;

        let host_config = HostConfig {
            binds: Some(spec.binds.clone()),
            network_mode: Some("none".to_string()),
            memory: Some(memory),
            // Same as memory: no swap on top of the ceiling.
            memory_swap: Some(memory),
            nano_cpus: Some(spec.nano_cpus as i64),
            // Removal is explicit so logs can be read after exit.
            auto_remove: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn oom_killed(&self, id: &str) -> bool {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(e) => {
                tracing::debug!(container = id, "Inspect after wait failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::DockerNotAvailable {
                reason: e.to_string(),
            })
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        use bollard::image::CreateImageOptions;

        tracing::info!("Pulling sandbox image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(SandboxError::ImageUnavailable {
                        image: image.to_string(),
                        reason: format!("image pull failed: {}", e),
                    });
                }
            }
        }

        tracing::info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), Self::create_config(spec))
            .await
            .map_err(|e| SandboxError::ContainerCreationFailed {
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "Docker warning: {}", warning);
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::ContainerStartFailed {
                reason: e.to_string(),
            })
    }

    async fn wait(&self, id: &str) -> Result<ExitStatus> {
        let mut wait_stream = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        let code = match wait_stream.next().await {
            Some(Ok(response)) => response.status_code,
            // bollard reports a non-zero exit as an error; it is still an exit.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                return Err(SandboxError::WaitFailed {
                    reason: e.to_string(),
                });
            }
            None => {
                return Err(SandboxError::WaitFailed {
                    reason: "container wait stream ended unexpectedly".to_string(),
                });
            }
        };

        let oom_killed = code != 0 && self.oom_killed(id).await;
        Ok(ExitStatus { code, oom_killed })
    }

    fn logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<LogChunk>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        self.docker
            .logs(id, Some(options))
            .filter_map(|result| async move {
                match result {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(LogChunk::Stdout(message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk::Stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(SandboxError::LogRetrievalFailed {
                        reason: e.to_string(),
                    })),
                }
            })
            .boxed()
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::RemovalFailed {
                reason: e.to_string(),
            })
    }
}

/// Connect to the Docker daemon.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (bollard default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker> {
    let mut attempts = Vec::new();

    match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => attempts.push(("local defaults".to_string(), e.to_string())),
        },
        Err(e) => attempts.push(("local defaults".to_string(), e.to_string())),
    }

    if let Some(home) = std::env::var_os("HOME") {
        let desktop_sock = std::path::Path::new(&home).join(".docker/run/docker.sock");
        let location = desktop_sock.display().to_string();
        if !desktop_sock.exists() {
            attempts.push((location, "socket does not exist".to_string()));
        } else {
            match Docker::connect_with_socket(&location, 120, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => match docker.ping().await {
                    Ok(_) => return Ok(docker),
                    Err(e) => attempts.push((location, e.to_string())),
                },
                Err(e) => attempts.push((location, e.to_string())),
            }
        }
    }

    Err(SandboxError::DockerNotAvailable {
        reason: describe_attempts(&attempts),
    })
}

/// Summarize failed connection attempts as `location (error); ...`.
fn describe_attempts(attempts: &[(String, String)]) -> String {
    if attempts.is_empty() {
        return "no Docker endpoint to try".to_string();
    }
    let tried: Vec<String> = attempts
        .iter()
        .map(|(location, error)| format!("{} ({})", location, error))
        .collect();
    format!("tried {}", tried.join("; "))
}
