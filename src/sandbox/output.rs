//! Container output capture and sanitization.

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use regex::Regex;

use crate::sandbox::error::Result;

/// One demultiplexed frame of container log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// Raw stdout and stderr collected from a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedLogs {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Whether either stream hit its share of the output cap.
    pub truncated: bool,
}

impl CollectedLogs {
    fn push(buf: &mut Vec<u8>, chunk: &[u8], cap: usize, truncated: &mut bool) {
        let remaining = cap.saturating_sub(buf.len());
        if chunk.len() > remaining {
            *truncated = true;
        }
        buf.extend_from_slice(&chunk[..remaining.min(chunk.len())]);
    }
}

/// Drain a log stream into separate stdout and stderr buffers.
///
/// Each stream may hold at most half of `max_output` bytes; anything past
/// that is dropped and `truncated` is set. The first stream error aborts
/// collection.
pub async fn collect_logs<S>(mut stream: S, max_output: usize) -> Result<CollectedLogs>
where
    S: Stream<Item = Result<LogChunk>> + Unpin,
{
    let half_max = max_output / 2;
    let mut logs = CollectedLogs::default();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            LogChunk::Stdout(message) => {
                CollectedLogs::push(&mut logs.stdout, &message, half_max, &mut logs.truncated)
            }
            LogChunk::Stderr(message) => {
                CollectedLogs::push(&mut logs.stderr, &message, half_max, &mut logs.truncated)
            }
        }
    }

    Ok(logs)
}

/// Remove every ASCII control character.
///
/// The log transport can leave framing bytes in front of each line, so this
/// is applied to the whole text rather than just line prefixes. Newlines and
/// tabs are control characters too and are removed along with them.
pub fn strip_control_chars(text: &str) -> String {
    static RE_CNTRL: OnceLock<Regex> = OnceLock::new();
    let re = RE_CNTRL.get_or_init(|| Regex::new(r"[[:cntrl:]]").expect("valid regex"));
    re.replace_all(text, "").into_owned()
}

/// Pick the text returned to the caller: stdout, or stderr when stdout is
/// empty. Stderr is dropped whenever stdout has content.
pub fn select_output(stdout: &str, stderr: &str) -> String {
    let chosen = if stdout.is_empty() { stderr } else { stdout };
    strip_control_chars(chosen).trim().to_string()
}

/// Output from one sandboxed execution.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code of the script's interpreter.
    pub exit_code: i64,
    /// Raw standard output.
    pub stdout: String,
    /// Raw standard error.
    pub stderr: String,
    /// Sanitized text returned to callers.
    pub output: String,
    /// How long the container ran, from start to log collection.
    pub duration: Duration,
    /// Whether output was truncated.
    pub truncated: bool,
}

impl ExecOutput {
    pub fn from_logs(exit_code: i64, logs: CollectedLogs, duration: Duration) -> Self {
        let stdout = String::from_utf8_lossy(&logs.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&logs.stderr).into_owned();
        let output = select_output(&stdout, &stderr);

        Self {
            exit_code,
            stdout,
            stderr,
            output,
            duration,
            truncated: logs.truncated,
        }
    }
}
