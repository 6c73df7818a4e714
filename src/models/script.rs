//! Script catalog entries and target validation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::target::{Target, TargetKind};
use crate::{AppError, Result};

/// Target kind a script declares it accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRequirement {
    /// Only files.
    File,
    /// Only directories.
    Directory,
    /// Either.
    #[default]
    Any,
}

/// A pre-approved automation script as resolved by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScriptSpec {
    /// Stable identifier used by `start`.
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: String,
    /// Executable to launch. Relative paths containing a separator are
    /// resolved against `working_dir`; bare names are looked up on `PATH`.
    pub executable: PathBuf,
    /// Arguments placed before the target path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory of the child process.
    pub working_dir: PathBuf,
    /// Declared target kind.
    #[serde(default)]
    pub target: TargetRequirement,
    /// Allowed file extensions when the target is a file (empty = all).
    #[serde(default)]
    pub file_extensions: Vec<String>,
}

impl ScriptSpec {
    /// Display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Lower-cased extensions with a leading dot; blanks dropped.
    #[must_use]
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.file_extensions
            .iter()
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .collect()
    }

    /// Check that `target` satisfies the declared requirement and extension filter.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidTarget`] describing the mismatch.
    pub fn check_target(&self, target: &Target) -> Result<()> {
        match (self.target, target.kind) {
            (TargetRequirement::File, TargetKind::Directory) => {
                return Err(AppError::InvalidTarget(format!(
                    "'{}' expects a file, got directory {}",
                    self.display_name(),
                    target.path.display()
                )));
            }
            (TargetRequirement::Directory, TargetKind::File) => {
                return Err(AppError::InvalidTarget(format!(
                    "'{}' expects a directory, got file {}",
                    self.display_name(),
                    target.path.display()
                )));
            }
            _ => {}
        }

        if target.kind == TargetKind::File {
            let allowed = self.normalized_extensions();
            if !allowed.is_empty() {
                let name = target
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if !allowed.iter().any(|ext| name.ends_with(ext.as_str())) {
                    return Err(AppError::InvalidTarget(format!(
                        "'{}' expects {} file(s)",
                        self.display_name(),
                        allowed.join(", ")
                    )));
                }
            }
        }

        Ok(())
    }
}
