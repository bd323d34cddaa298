//! In-memory container backend for tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::sandbox::container::{ContainerBackend, ContainerSpec, ExitStatus};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::output::LogChunk;

/// Step at which the fake backend misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Create,
    Start,
    Wait,
    Logs,
    Remove,
    /// `wait` never returns.
    Hang,
}

#[derive(Default)]
pub struct FakeBackend {
    stdout: String,
    stderr: String,
    exit_code: i64,
    oom_killed: bool,
    echo_script: bool,
    missing_image: bool,
    fault: Option<Fault>,
    calls: Mutex<Vec<String>>,
    live: Mutex<HashSet<String>>,
    created: Mutex<Vec<(ContainerSpec, Option<String>)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_oom_killed(mut self) -> Self {
        self.oom_killed = true;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn without_image(mut self) -> Self {
        self.missing_image = true;
        self
    }

    /// Report each container's script contents as its stdout.
    pub fn echo_script(mut self) -> Self {
        self.echo_script = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn live_containers(&self) -> HashSet<String> {
        self.live.lock().unwrap().clone()
    }

    /// Every container spec created, with the script found in its bind mount.
    pub fn created(&self) -> Vec<(ContainerSpec, Option<String>)> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn fails_at(&self, fault: Fault) -> bool {
        self.fault == Some(fault)
    }

    fn read_script(spec: &ContainerSpec) -> Option<String> {
        let host_dir = spec.binds.first()?.split(':').next()?;
        let entry = std::fs::read_dir(Path::new(host_dir)).ok()?.next()?.ok()?;
        std::fs::read_to_string(entry.path()).ok()
    }

    fn script_for(&self, id: &str) -> Option<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|(spec, _)| spec.name == id)
            .and_then(|(_, script)| script.clone())
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn ping(&self) -> Result<()> {
        self.record("ping".to_string());
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.record(format!("image_exists {}", image));
        !self.missing_image
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record(format!("pull {}", image));
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(format!("create {}", spec.name));
        if self.fails_at(Fault::Create) {
            return Err(SandboxError::ContainerCreationFailed {
                reason: "Conflict. The container name is already in use".to_string(),
            });
        }
        let script = Self::read_script(spec);
        self.created.lock().unwrap().push((spec.clone(), script));
        self.live.lock().unwrap().insert(spec.name.clone());
        Ok(spec.name.clone())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record(format!("start {}", id));
        if self.fails_at(Fault::Start) {
            return Err(SandboxError::ContainerStartFailed {
                reason: "no such image".to_string(),
            });
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<ExitStatus> {
        self.record(format!("wait {}", id));
        match self.fault {
            Some(Fault::Wait) => Err(SandboxError::WaitFailed {
                reason: "No such container".to_string(),
            }),
            Some(Fault::Hang) => std::future::pending().await,
            _ => Ok(ExitStatus {
                code: self.exit_code,
                oom_killed: self.oom_killed,
            }),
        }
    }

    fn logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<LogChunk>> {
        self.record(format!("logs {}", id));
        if self.fails_at(Fault::Logs) {
            return stream::iter(vec![Err(SandboxError::LogRetrievalFailed {
                reason: "connection reset".to_string(),
            })])
            .boxed();
        }

        let stdout = if self.echo_script {
            self.script_for(id).unwrap_or_default()
        } else {
            self.stdout.clone()
        };

        let mut chunks = Vec::new();
        if !stdout.is_empty() {
            chunks.push(Ok(LogChunk::Stdout(Bytes::from(stdout))));
        }
        if !self.stderr.is_empty() {
            chunks.push(Ok(LogChunk::Stderr(Bytes::from(self.stderr.clone()))));
        }
        stream::iter(chunks).boxed()
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.record(format!("remove {}", id));
        if self.fails_at(Fault::Remove) {
            return Err(SandboxError::RemovalFailed {
                reason: "device or resource busy".to_string(),
            });
        }
        self.live.lock().unwrap().remove(id);
        Ok(())
    }
}
