//! Main sandbox manager coordinating scripts and containers.
//!
//! The `SandboxManager` is the entry point for executing a job. It
//! coordinates:
//! - Writing the submitted source to a per-job scratch directory
//! - Docker container creation and lifecycle
//! - Resource limits and the execution deadline
//! - Output capture and teardown
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           SandboxManager                                   │
//! │                                                                            │
//! │   execute(lang, code)                                                      │
//! │         │                                                                  │
//! │         ▼                                                                  │
//! │   ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────┐  │
//! │   │ Write Script │────▶│ Create &     │────▶│ Wait & Collect Output    │  │
//! │   │ (scratch dir)│     │ Start        │     │ (under deadline)         │  │
//! │   └──────────────┘     └──────────────┘     └──────────────────────────┘  │
//! │          │                                             │                   │
//! │          ▼                                             ▼                   │
//! │   ┌───────────────────────────────────────────────────────────────────┐   │
//! │   │ JobResources: remove container + scratch dir on every exit path    │   │
//! │   └───────────────────────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use crate::sandbox::config::SandboxConfig;
use crate::sandbox::container::{ContainerBackend, ContainerSpec, ExitStatus};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::job::{Job, JobId};
use crate::sandbox::language::Language;
use crate::sandbox::output::{ExecOutput, collect_logs};
use crate::sandbox::script::{ScriptFile, ScriptMaterializer};

/// Main sandbox manager.
///
/// Holds no per-job state, so one instance can serve any number of
/// concurrent jobs.
pub struct SandboxManager {
    config: SandboxConfig,
    backend: Arc<dyn ContainerBackend>,
    materializer: ScriptMaterializer,
}

impl SandboxManager {
    /// Create a new sandbox manager using an already connected backend.
    pub fn new(config: SandboxConfig, backend: Arc<dyn ContainerBackend>) -> Result<Self> {
        let materializer = ScriptMaterializer::new(&config.scripts_dir)?;
        Ok(Self {
            config,
            backend,
            materializer,
        })
    }

    /// Check the backend is reachable and the sandbox image is present.
    pub async fn initialize(&self) -> Result<()> {
        self.backend.ping().await?;

        if !self.backend.image_exists(&self.config.image).await {
            if self.config.auto_pull_image {
                self.backend.pull_image(&self.config.image).await?;
            } else {
                return Err(SandboxError::ImageUnavailable {
                    image: self.config.image.clone(),
                    reason: "image not found and auto_pull is disabled".to_string(),
                });
            }
        }

        if !self.config.auto_remove {
            tracing::warn!(
                "Container auto-remove is disabled; finished containers must be reaped manually"
            );
        }

        tracing::info!(image = %self.config.image, "Sandbox initialized");
        Ok(())
    }

    /// Execute `code` written in the language tagged `language` under a
    /// freshly generated job id.
    pub async fn execute(&self, language: &str, code: &str) -> Result<ExecOutput> {
        let language: Language = language.parse()?;
        self.execute_job(Job::new(language, code)).await
    }

    /// Execute a job. Whatever the outcome, the scratch directory and
    /// container this job created are gone by the time this returns.
    pub async fn execute_job(&self, job: Job) -> Result<ExecOutput> {
        tracing::debug!(job_id = %job.id, language = %job.language, "Executing job");

        // A directory that already exists belongs to another live job with
        // the same id. Nothing has been claimed yet, so there is nothing to
        // tear down.
        self.materializer.claim_dir(&job.id).await?;

        let mut resources = JobResources::new(
            job.id.clone(),
            self.materializer.clone(),
            Arc::clone(&self.backend),
            &self.config,
        );

        let result = match self.materializer.write_script(&job).await {
            Ok(script) => self.run(&job, &script, &mut resources).await,
            Err(e) => Err(e),
        };

        resources.release().await;

        match &result {
            Ok(output) => tracing::debug!(
                job_id = %job.id,
                exit_code = output.exit_code,
                duration_ms = output.duration.as_millis() as u64,
                "Job finished"
            ),
            Err(e) => tracing::warn!(job_id = %job.id, "Job failed: {}", e),
        }

        result
    }

    async fn run(
        &self,
        job: &Job,
        script: &ScriptFile,
        resources: &mut JobResources,
    ) -> Result<ExecOutput> {
        let spec = ContainerSpec::for_job(job, script, &self.config.image, &self.config.limits);

        let container_id = self.backend.create(&spec).await?;
        resources.track_container(container_id.clone());
        tracing::debug!(job_id = %job.id, "Container created");

        self.backend.start(&container_id).await?;
        tracing::debug!(job_id = %job.id, "Container started");

        let start_time = Instant::now();
        let timeout = self.config.limits.timeout;

        match tokio::time::timeout(timeout, self.wait_and_collect(job, &container_id, start_time))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SandboxError::Timeout(timeout)),
        }
    }

    async fn wait_and_collect(
        &self,
        job: &Job,
        container_id: &str,
        start_time: Instant,
    ) -> Result<ExecOutput> {
        let status = self.backend.wait(container_id).await?;
        self.log_exit(job, status);

        if status.oom_killed {
            return Err(SandboxError::ResourceLimitExceeded {
                resource: "memory".to_string(),
                limit: format!("{} bytes", self.config.limits.memory_bytes),
            });
        }

        let logs = collect_logs(
            self.backend.logs(container_id),
            self.config.limits.max_output_bytes,
        )
        .await?;

        Ok(ExecOutput::from_logs(
            status.code,
            logs,
            start_time.elapsed(),
        ))
    }

    fn log_exit(&self, job: &Job, status: ExitStatus) {
        if self.config.log_exit_status {
            tracing::info!(
                job_id = %job.id,
                exit_code = status.code,
                oom_killed = status.oom_killed,
                "Container exited"
            );
        } else {
            tracing::debug!(
                job_id = %job.id,
                exit_code = status.code,
                oom_killed = status.oom_killed,
                "Container exited"
            );
        }
    }
}

/// Transient resources owned by one job: the scratch directory it claimed
/// and, once created, its container.
///
/// `release` tears both down. If the guard is dropped without being released
/// (the job future was cancelled or panicked), `Drop` removes the directory
/// synchronously and hands container removal to the runtime.
struct JobResources {
    job_id: JobId,
    materializer: ScriptMaterializer,
    container: Option<String>,
    backend: Arc<dyn ContainerBackend>,
    auto_remove: bool,
    verbose: bool,
    released: bool,
}

impl JobResources {
    fn new(
        job_id: JobId,
        materializer: ScriptMaterializer,
        backend: Arc<dyn ContainerBackend>,
        config: &SandboxConfig,
    ) -> Self {
        Self {
            job_id,
            materializer,
            container: None,
            backend,
            auto_remove: config.auto_remove,
            verbose: config.log_exit_status,
            released: false,
        }
    }

    /// Only containers this job created are ever removed.
    fn track_container(&mut self, id: String) {
        self.container = Some(id);
    }

    /// Tear down everything. Failures are logged, never returned.
    async fn release(&mut self) {
        self.released = true;

        if let Some(container_id) = self.container.take() {
            if self.auto_remove {
                match self.backend.remove(&container_id).await {
                    Ok(()) if self.verbose => {
                        tracing::info!(job_id = %self.job_id, "Container removed")
                    }
                    Ok(()) => tracing::debug!(job_id = %self.job_id, "Container removed"),
                    Err(e) => tracing::warn!(
                        job_id = %self.job_id,
                        "Error removing container: {}",
                        e
                    ),
                }
            } else {
                tracing::debug!(
                    job_id = %self.job_id,
                    "Auto-remove disabled, leaving container {}",
                    container_id
                );
            }
        }

        if let Err(e) = self.materializer.remove(&self.job_id).await {
            tracing::warn!(job_id = %self.job_id, "Failed to remove scripts directory: {}", e);
        }
    }
}

impl Drop for JobResources {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        tracing::warn!(job_id = %self.job_id, "Job abandoned before teardown, cleaning up");

        if let Err(e) = self.materializer.remove_blocking(&self.job_id) {
            tracing::warn!(job_id = %self.job_id, "Failed to remove scripts directory: {}", e);
        }

        let Some(container_id) = self.container.take() else {
            return;
        };
        if !self.auto_remove {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = Arc::clone(&self.backend);
                let job_id = self.job_id.clone();
                handle.spawn(async move {
                    if let Err(e) = backend.remove(&container_id).await {
                        tracing::warn!(%job_id, "Error removing container: {}", e);
                    }
                });
            }
            Err(_) => tracing::error!(
                job_id = %self.job_id,
                "No runtime to remove container {}, it has leaked",
                container_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::sandbox::config::ResourceLimits;
    use crate::sandbox::fake::{FakeBackend, Fault};

    fn manager(dir: &TempDir, backend: Arc<FakeBackend>) -> SandboxManager {
        let config = SandboxConfig {
            scripts_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        SandboxManager::new(config, backend).unwrap()
    }

    fn is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_execute_returns_stdout_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().with_stdout("\u{1}\u{0}\u{0}\u{0}Hello world!\n"));
        let manager = manager(&dir, backend.clone());

        let output = manager
            .execute("python", "print(\"Hello world!\")")
            .await
            .unwrap();

        assert_eq!(output.output, "Hello world!");
        assert_eq!(output.exit_code, 0);
        assert!(backend.live_containers().is_empty());
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_container_sees_materialized_script() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new());
        let manager = manager(&dir, backend.clone());

        let job = Job::new(Language::Bash, "echo 1000").with_id(JobId::parse("bash-job").unwrap());
        manager.execute_job(job).await.unwrap();

        let created = backend.created();
        assert_eq!(created.len(), 1);
        let (spec, script) = &created[0];
        assert_eq!(spec.name, "bash-job");
        assert_eq!(
            spec.cmd,
            vec!["/bin/bash", "/app/scripts/bash-job/generated_script.sh"]
        );
        assert_eq!(
            spec.binds,
            vec![format!(
                "{}:/app/scripts/bash-job:rw",
                dir.path().join("bash-job").display()
            )]
        );
        assert_eq!(script.as_deref(), Some("#!/usr/bin/env bash\necho 1000"));
    }

    #[tokio::test]
    async fn test_stderr_fallback() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().with_stderr("NameError: x\n").with_exit_code(1));
        let manager = manager(&dir, backend);

        let output = manager.execute("python", "x").await.unwrap();
        assert_eq!(output.output, "NameError: x");
        assert_eq!(output.exit_code, 1);
    }

    #[tokio::test]
    async fn test_unsupported_language_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new());
        let manager = manager(&dir, backend.clone());

        let err = manager.execute("cobol", "DISPLAY 'HI'").await.unwrap_err();

        assert!(matches!(err, SandboxError::UnsupportedLanguage(ref l) if l == "cobol"));
        assert!(backend.calls().is_empty());
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_duplicate_job_id_leaves_live_job_alone() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().with_fault(Fault::Create));
        let manager = manager(&dir, backend.clone());
        let live = dir.path().join("dup");
        std::fs::create_dir(&live).unwrap();
        std::fs::write(live.join("generated_script.py"), "print('live')").unwrap();

        let job =
            Job::new(Language::Python, "print('second')").with_id(JobId::parse("dup").unwrap());
        let err = manager.execute_job(job).await.unwrap_err();

        assert!(matches!(
            err,
            SandboxError::InvalidJobId { ref id, ref reason }
                if id == "dup" && reason == "already in use"
        ));
        assert!(err.is_client_error());
        assert_eq!(
            std::fs::read_to_string(live.join("generated_script.py")).unwrap(),
            "print('live')"
        );
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_job_id_is_reusable_after_completion() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new());
        let manager = manager(&dir, backend.clone());

        for _ in 0..2 {
            let job = Job::new(Language::Python, "pass").with_id(JobId::parse("again").unwrap());
            manager.execute_job(job).await.unwrap();
        }

        assert_eq!(backend.created().len(), 2);
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_create_failure_cleans_scratch_dir_only() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().with_fault(Fault::Create));
        let manager = manager(&dir, backend.clone());

        let err = manager.execute("go", "package main").await.unwrap_err();

        assert!(matches!(err, SandboxError::ContainerCreationFailed { .. }));
        assert!(!backend.calls().iter().any(|c| c.starts_with("remove")));
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_failures_after_create_still_remove_container() {
        for (fault, check) in [
            (Fault::Start, "start"),
            (Fault::Wait, "wait"),
            (Fault::Logs, "logs"),
        ] {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(FakeBackend::new().with_fault(fault));
            let manager = manager(&dir, backend.clone());

            let err = manager.execute("python", "pass").await.unwrap_err();
            match check {
                "start" => assert!(matches!(err, SandboxError::ContainerStartFailed { .. })),
                "wait" => assert!(matches!(err, SandboxError::WaitFailed { .. })),
                _ => assert!(matches!(err, SandboxError::LogRetrievalFailed { .. })),
            }
            assert!(backend.live_containers().is_empty(), "{} leaked a container", check);
            assert!(is_empty(&dir), "{} leaked a scratch dir", check);
        }
    }

    #[tokio::test]
    async fn test_removal_failure_does_not_mask_result() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(
            FakeBackend::new()
                .with_stdout("ok")
                .with_fault(Fault::Remove),
        );
        let manager = manager(&dir, backend);

        let output = manager.execute("bash", "echo ok").await.unwrap();
        assert_eq!(output.output, "ok");
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_timeout_removes_hung_container() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().with_fault(Fault::Hang));
        let config = SandboxConfig {
            scripts_dir: dir.path().to_path_buf(),
            limits: ResourceLimits {
                timeout: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        };
        let manager = SandboxManager::new(config, backend.clone()).unwrap();

        let err = manager.execute("bash", "sleep infinity").await.unwrap_err();

        assert!(matches!(err, SandboxError::Timeout(d) if d == Duration::from_millis(50)));
        assert!(backend.live_containers().is_empty());
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_oom_kill_is_an_error() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().with_exit_code(137).with_oom_killed());
        let manager = manager(&dir, backend.clone());

        let err = manager.execute("python", "x = ' ' * 10**10").await.unwrap_err();

        assert!(matches!(
            err,
            SandboxError::ResourceLimitExceeded { ref resource, .. } if resource == "memory"
        ));
        assert!(backend.live_containers().is_empty());
    }

    #[tokio::test]
    async fn test_auto_remove_disabled_leaves_container() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new());
        let config = SandboxConfig {
            scripts_dir: dir.path().to_path_buf(),
            auto_remove: false,
            ..Default::default()
        };
        let manager = SandboxManager::new(config, backend.clone()).unwrap();

        manager.execute("python", "pass").await.unwrap();

        assert_eq!(backend.live_containers().len(), 1);
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_do_not_interfere() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().echo_script());
        let manager = Arc::new(manager(&dir, backend.clone()));

        let a = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.execute("python", "print('a')").await })
        };
        let b = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.execute("bash", "echo b").await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a.output, "print('a')");
        assert_eq!(b.output, "#!/usr/bin/env bashecho b");
        assert_eq!(backend.created().len(), 2);
        assert!(backend.live_containers().is_empty());
        assert!(is_empty(&dir));
    }

    #[tokio::test]
    async fn test_cancelled_job_cleans_up() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().with_fault(Fault::Hang));
        let manager = manager(&dir, backend.clone());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            manager.execute("bash", "sleep 100"),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(is_empty(&dir));

        // Container removal was handed to the runtime.
        for _ in 0..50 {
            if backend.live_containers().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(backend.live_containers().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_pulls_missing_image() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().without_image());
        let manager = manager(&dir, backend.clone());

        manager.initialize().await.unwrap();
        assert!(backend.calls().contains(&"pull py-golang:latest".to_string()));
    }

    #[tokio::test]
    async fn test_initialize_without_auto_pull_fails() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new().without_image());
        let config = SandboxConfig {
            scripts_dir: dir.path().to_path_buf(),
            auto_pull_image: false,
            ..Default::default()
        };
        let manager = SandboxManager::new(config, backend).unwrap();

        let err = manager.initialize().await.unwrap_err();
        assert!(matches!(err, SandboxError::ImageUnavailable { .. }));
    }
}
