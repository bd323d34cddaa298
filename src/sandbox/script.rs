//! Script materialization.
//!
//! Writes submitted source into a per-job scratch directory:
//!
//! ```text
//! <scripts_dir>/<job_id>/generated_script.<ext>   (host)
//! /app/scripts/<job_id>/generated_script.<ext>    (container)
//! ```

use std::path::{Path, PathBuf};

use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::job::{Job, JobId};

/// Working directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/app";

/// Where scratch directories are mounted inside the container.
pub const CONTAINER_SCRIPTS_DIR: &str = "/app/scripts";

/// File name of every generated script, before the extension.
pub const SCRIPT_STEM: &str = "generated_script";

#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// A script written to disk for one job.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    /// Scratch directory on the host that holds the script.
    pub host_dir: PathBuf,
    /// Script path on the host.
    pub host_path: PathBuf,
    /// Scratch directory as seen from inside the container.
    pub container_dir: String,
    /// Script path as seen from inside the container.
    pub container_path: String,
}

impl ScriptFile {
    /// Bind mount spec exposing only this job's scratch directory.
    pub fn bind(&self) -> String {
        format!("{}:{}:rw", self.host_dir.display(), self.container_dir)
    }
}

/// Writes job sources into scratch directories under a fixed root.
#[derive(Debug, Clone)]
pub struct ScriptMaterializer {
    root: PathBuf,
}

impl ScriptMaterializer {
    /// Create a materializer rooted at `root`.
    ///
    /// The root is made absolute so it can be used as the host side of a
    /// bind mount. It does not need to exist yet.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = std::path::absolute(root).map_err(|e| SandboxError::filesystem(root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directory for a job on the host.
    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Claim a fresh scratch directory for a job.
    ///
    /// The root is created if needed, but the job directory itself must not
    /// exist yet: an existing directory belongs to a live job with the same
    /// id, and is left untouched.
    pub async fn claim_dir(&self, id: &JobId) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SandboxError::filesystem(&self.root, e))?;

        let host_dir = self.job_dir(id);
        match tokio::fs::create_dir(&host_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SandboxError::InvalidJobId {
                    id: id.to_string(),
                    reason: "already in use".to_string(),
                });
            }
            Err(e) => return Err(SandboxError::filesystem(&host_dir, e)),
        }
        set_mode(&host_dir, DirOrFile::Dir).await?;

        Ok(host_dir)
    }

    /// Write the job's source into its already claimed scratch directory,
    /// replacing any script at the same path.
    pub async fn write_script(&self, job: &Job) -> Result<ScriptFile> {
        let file_name = format!("{}.{}", SCRIPT_STEM, job.language.extension());
        let host_dir = self.job_dir(&job.id);
        let host_path = host_dir.join(&file_name);

        tokio::fs::write(&host_path, job.language.script_contents(&job.code))
            .await
            .map_err(|e| SandboxError::filesystem(&host_path, e))?;
        set_mode(&host_path, DirOrFile::File).await?;

        let container_dir = format!("{}/{}", CONTAINER_SCRIPTS_DIR, job.id);
        let container_path = format!("{}/{}", container_dir, file_name);

        tracing::debug!(job_id = %job.id, path = %host_path.display(), "Script written");

        Ok(ScriptFile {
            host_dir,
            host_path,
            container_dir,
            container_path,
        })
    }

    /// Claim the job's scratch directory and write its source there.
    pub async fn materialize(&self, job: &Job) -> Result<ScriptFile> {
        self.claim_dir(&job.id).await?;
        self.write_script(job).await
    }

    /// Remove a job's scratch directory. A missing directory is not an error.
    pub async fn remove(&self, id: &JobId) -> Result<()> {
        let dir = self.job_dir(id);
        ignore_missing(tokio::fs::remove_dir_all(&dir).await)
            .map_err(|e| SandboxError::filesystem(dir, e))
    }

    /// Blocking variant of [`remove`](Self::remove), for use where awaiting
    /// is not possible.
    pub fn remove_blocking(&self, id: &JobId) -> Result<()> {
        let dir = self.job_dir(id);
        ignore_missing(std::fs::remove_dir_all(&dir)).map_err(|e| SandboxError::filesystem(dir, e))
    }
}

fn ignore_missing(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

enum DirOrFile {
    Dir,
    File,
}

#[cfg(unix)]
async fn set_mode(path: &Path, kind: DirOrFile) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = match kind {
        DirOrFile::Dir => DIR_MODE,
        DirOrFile::File => FILE_MODE,
    };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| SandboxError::filesystem(path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _kind: DirOrFile) -> Result<()> {
    Ok(())
}
