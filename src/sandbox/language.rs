//! Supported languages and how each one is stored and run.
//!
//! This table is the only place that knows about languages. The script
//! materializer asks it for the file extension and source prefix, and the
//! container runner asks it for the interpreter command, so the two cannot
//! fall out of step.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sandbox::error::SandboxError;

/// Interpreter directive prepended to shell scripts.
pub const BASH_SHEBANG: &str = "#!/usr/bin/env bash\n";

/// A language the sandbox can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Python,
    Bash,
}

impl Language {
    /// Every supported language.
    pub const ALL: [Language; 3] = [Language::Go, Language::Python, Language::Bash];

    /// The tag callers use to select this language.
    pub fn tag(self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::Bash => "bash",
        }
    }

    /// File extension for generated scripts, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "py",
            Language::Bash => "sh",
        }
    }

    /// Interpreter command; the script path is appended as the last argument.
    pub fn interpreter(self) -> &'static [&'static str] {
        match self {
            Language::Go => &["go", "run"],
            Language::Python => &["python3"],
            Language::Bash => &["/bin/bash"],
        }
    }

    /// Text prepended to the submitted source before it is written.
    pub fn source_prefix(self) -> Option<&'static str> {
        match self {
            Language::Bash => Some(BASH_SHEBANG),
            Language::Go | Language::Python => None,
        }
    }

    /// Full container command for a script at `script_path`.
    pub fn command(self, script_path: &str) -> Vec<String> {
        self.interpreter()
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(script_path.to_string()))
            .collect()
    }

    /// Source text as it should be stored on disk.
    pub fn script_contents(self, code: &str) -> String {
        match self.source_prefix() {
            Some(prefix) => format!("{}{}", prefix, code),
            None => code.to_string(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.tag() == s)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_tags() {
        assert_eq!("go".parse::<Language>().unwrap(), Language::Go);
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("bash".parse::<Language>().unwrap(), Language::Bash);
    }

    #[test]
    fn test_parse_is_exact() {
        for tag in ["", "Python", "py", "sh", "javascript", " go"] {
            let err = tag.parse::<Language>().unwrap_err();
            assert!(matches!(err, SandboxError::UnsupportedLanguage(ref t) if t == tag));
        }
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            Language::Go.command("/app/scripts/j/generated_script.go"),
            vec!["go", "run", "/app/scripts/j/generated_script.go"]
        );
        assert_eq!(
            Language::Python.command("/s.py"),
            vec!["python3", "/s.py"]
        );
        assert_eq!(Language::Bash.command("/s.sh"), vec!["/bin/bash", "/s.sh"]);
    }

    #[test]
    fn test_only_bash_gets_a_shebang() {
        assert_eq!(
            Language::Bash.script_contents("echo hi"),
            "#!/usr/bin/env bash\necho hi"
        );
        assert_eq!(Language::Python.script_contents("print(1)"), "print(1)");
        assert_eq!(Language::Go.script_contents("package main"), "package main");
    }

    #[test]
    fn test_serde_uses_tags() {
        let json = serde_json::to_string(&Language::Python).unwrap();
        assert_eq!(json, "\"python\"");
        let lang: Language = serde_json::from_str("\"bash\"").unwrap();
        assert_eq!(lang, Language::Bash);
    }
}
