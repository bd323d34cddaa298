//! Job identity.
//!
//! A job id names both the scratch directory on the host and the container,
//! so it has to be a single safe path component and a valid Docker container
//! name at the same time.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::sandbox::error::SandboxError;
use crate::sandbox::language::Language;

/// Longest accepted caller-supplied job id.
pub const MAX_JOB_ID_LEN: usize = 64;

/// Identifier of a single execution job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a caller-supplied id.
    pub fn parse(id: &str) -> Result<Self, SandboxError> {
        let invalid = |reason: &str| SandboxError::InvalidJobId {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        if id.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if id.len() > MAX_JOB_ID_LEN {
            return Err(invalid("too long"));
        }
        if !id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(invalid("must start with a letter or digit"));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(invalid(&format!("character {:?} is not allowed", c)));
        }

        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One request to execute a body of source code.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub language: Language,
    pub code: String,
}

impl Job {
    /// Create a job with a generated id.
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            id: JobId::generate(),
            language,
            code: code.into(),
        }
    }

    /// Use a specific id instead of a generated one.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }
}
