//! Script invocation target: the selected file or directory.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Whether the target is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

impl TargetKind {
    /// Name passed to scripts in `FSCP_TARGET_KIND`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The path a script is invoked against, plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Absolute path of the selection.
    pub path: PathBuf,
    /// File or directory.
    pub kind: TargetKind,
}

impl Target {
    /// Construct a target without touching the file system.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: TargetKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Resolve a selected path into a target by inspecting the file system.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidTarget`] if the path does not exist or
    /// cannot be canonicalized.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let canonical = path.canonicalize().map_err(|err| {
            AppError::InvalidTarget(format!("{} is not accessible: {err}", path.display()))
        })?;
        let kind = if canonical.is_dir() {
            TargetKind::Directory
        } else {
            TargetKind::File
        };
        Ok(Self {
            path: canonical,
            kind,
        })
    }

    /// Shortened label for process listings: the last two path components,
    /// prefixed with `…/` when anything was cut.
    #[must_use]
    pub fn short_label(&self) -> String {
        shorten_path(&self.path)
    }
}

/// Shorten `path` to its last two normal components.
#[must_use]
pub fn shorten_path(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.len() <= 2 {
        return path.display().to_string();
    }

    format!("…/{}", parts[parts.len() - 2..].join("/"))
}
