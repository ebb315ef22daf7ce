//! Input file discovery
//!
//! A file is "completed" once it has been renamed with a leading dot. Those
//! files still match most glob patterns, so discovery filters them out; this
//! is what makes a second run over the same directory a no-op.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Filename prefix marking a fully drained file
pub const COMPLETED_PREFIX: &str = ".";

/// An input file and the path it is renamed to once drained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub completed_path: PathBuf,
}

impl InputFile {
    /// `None` when the path has no file name or is already marked completed
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?;

        if is_completed_name(name) {
            return None;
        }

        let completed_path = path.with_file_name(format!("{}{}", COMPLETED_PREFIX, name));
        Some(Self {
            path,
            completed_path,
        })
    }

    /// Rename the file to its completed marker
    pub fn mark_completed(&self) -> std::io::Result<()> {
        std::fs::rename(&self.path, &self.completed_path)
    }
}

impl std::fmt::Display for InputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

fn is_completed_name(name: &str) -> bool {
    name.starts_with(COMPLETED_PREFIX)
}

/// Resolve `pattern` into the files still waiting to be loaded
pub fn discover(pattern: &str) -> Result<Vec<InputFile>> {
    let paths = glob::glob(pattern).with_context(|| format!("Invalid glob pattern '{}'", pattern))?;

    let mut files = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %e.path().display(), error = %e.error(), "Skipping unreadable path");
                continue;
            },
        };

        if !path.is_file() {
            continue;
        }

        match InputFile::new(path) {
            Some(file) => files.push(file),
            None => debug!("Skipping completed file"),
        }
    }

    Ok(files)
}
