//! The request half of the protocol.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::codec::{base64_map, base64_opt};
use crate::error::ValidationError;

/// A request to run one allow-listed program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Program name, also the allow-list key.
    pub name: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Bytes piped to the program's standard input.
    #[serde(default, with = "base64_opt")]
    pub stdin: Option<Vec<u8>>,

    /// Input files staged into the workspace, keyed by plain filename.
    #[serde(default, with = "base64_map")]
    pub files: BTreeMap<String, Vec<u8>>,

    /// Glob patterns selecting which workspace files are returned.
    #[serde(default)]
    pub result_file_patterns: Vec<String>,

    /// Non-zero exit codes that are reported in the result instead of
    /// failing the call.
    #[serde(default)]
    pub non_error_exit_codes: BTreeSet<i32>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn file(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.into(), data.into());
        self
    }

    pub fn result_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.result_file_patterns.push(pattern.into());
        self
    }

    pub fn non_error_exit_code(mut self, code: i32) -> Self {
        self.non_error_exit_codes.insert(code);
        self
    }

    /// Check the command before it is allowed anywhere near a workspace.
    ///
    /// Filenames must be plain names: no `/` or `\`, and not `.` or `..`.
    /// Result patterns must be non-empty, distinct, and valid globs.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        for name in self.files.keys() {
            if name.is_empty() {
                return Err(ValidationError::EmptyFileName);
            }
            if name.contains(['/', '\\']) {
                return Err(ValidationError::PathSeparator(name.clone()));
            }
            if name == "." || name == ".." {
                return Err(ValidationError::ReservedFileName(name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for pattern in &self.result_file_patterns {
            if pattern.is_empty() {
                return Err(ValidationError::EmptyPattern);
            }
            if !seen.insert(pattern.as_str()) {
                return Err(ValidationError::DuplicatePattern(pattern.clone()));
            }
            compile_pattern(pattern)?;
        }

        Ok(())
    }

    /// Compiled result file patterns, in declaration order.
    pub fn result_patterns(&self) -> Result<Vec<Pattern>, ValidationError> {
        self.result_file_patterns
            .iter()
            .map(|pattern| compile_pattern(pattern))
            .collect()
    }
}

fn compile_pattern(pattern: &str) -> Result<Pattern, ValidationError> {
    Pattern::new(pattern).map_err(|e| ValidationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.msg.to_string(),
    })
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return f.write_str(&self.name);
        }
        write!(f, "{} {}", self.name, self.args.join(" "))
    }
}
