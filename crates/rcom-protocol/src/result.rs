//! The response half of the protocol.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CallId;
use crate::codec::base64_map;
use crate::error::ResultFileError;

/// Outcome of one completed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub call_id: CallId,
    pub exit_code: i32,
    /// Standard output and standard error interleaved in arrival order.
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    /// Workspace files that matched a result pattern.
    #[serde(default, with = "base64_map")]
    pub files: BTreeMap<String, Vec<u8>>,
}

impl CallResult {
    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Write the result file called `name` to `path`.
    ///
    /// A missing or empty result file is an error: callers use this for
    /// outputs the program is expected to produce.
    pub fn write_file_to(&self, name: &str, path: &Path) -> Result<(), ResultFileError> {
        let data = self.files.get(name).ok_or_else(|| ResultFileError::Missing {
            name: name.to_string(),
            call_id: self.call_id,
        })?;
        if data.is_empty() {
            return Err(ResultFileError::Empty {
                name: name.to_string(),
                call_id: self.call_id,
            });
        }
        std::fs::write(path, data).map_err(|source| ResultFileError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
