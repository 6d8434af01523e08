//! Source file enumeration

use crate::config::EngineConfig;
use crate::error::DriverError;
use globset::GlobSet;
use logshift_transform::is_source_path;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A discovered source file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceEntry {
    /// Root-relative path with forward slashes
    pub relative: String,
    /// Absolute path
    pub path: PathBuf,
}

/// Walks a project tree, skipping excluded directories and the logger module
#[derive(Debug, Clone)]
pub struct Discovery {
    root: PathBuf,
    exclude_dirs: BTreeSet<String>,
    logger_module: PathBuf,
}

impl Discovery {
    /// Build from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            root: config.project_root.clone(),
            exclude_dirs: config.exclude_dirs.iter().cloned().collect(),
            logger_module: config.logger_module_path(),
        }
    }

    /// Project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is the logger module itself
    #[must_use]
    pub fn is_logger_module(&self, path: &Path) -> bool {
        path == self.logger_module
            || path.with_extension("") == self.logger_module
            || path
                .parent()
                .is_some_and(|dir| dir == self.logger_module && path.file_stem().is_some_and(|s| s == "index"))
    }

    /// Every migratable source file under the root, sorted
    ///
    /// # Errors
    /// `DriverError::Discovery` if the walk fails.
    pub fn sources(&self) -> Result<Vec<SourceEntry>, DriverError> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !self
                        .exclude_dirs
                        .contains(e.file_name().to_string_lossy().as_ref())
            });

        for entry in walker {
            let entry = entry.map_err(|e| DriverError::Discovery {
                root: self.root.clone(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !is_source_path(path) || self.is_logger_module(path) {
                continue;
            }
            let rel = path.strip_prefix(&self.root).unwrap_or(path);
            out.push(SourceEntry {
                relative: rel.to_string_lossy().replace('\\', "/"),
                path: path.to_path_buf(),
            });
        }
        out.sort();
        Ok(out)
    }

    /// Source files whose relative path matches `globs`
    ///
    /// # Errors
    /// `DriverError::Discovery` if the walk fails.
    pub fn matching(&self, globs: &GlobSet) -> Result<Vec<SourceEntry>, DriverError> {
        Ok(self
            .sources()?
            .into_iter()
            .filter(|e| globs.is_match(&e.relative))
            .collect())
    }
}
