//! Resolution of directive-relative paths.

use std::path::{Path, PathBuf};

use crate::error::{TemplateError, TemplateResult};

/// How paths referenced from a template are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMode {
    /// Paths are handed to the filesystem unchanged and therefore resolve
    /// against the process working directory.
    #[default]
    WorkingDirectory,
    /// Paths resolve against the directory containing the current template.
    TemplateRelative,
}

/// Resolves paths referenced by templates and directives.
///
/// The mode is fixed for a whole run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver {
    mode: PathMode,
}

impl PathResolver {
    pub fn new(mode: PathMode) -> Self {
        Self { mode }
    }

    /// A resolver that resolves against the template directory.
    pub fn relative() -> Self {
        Self::new(PathMode::TemplateRelative)
    }

    pub fn mode(&self) -> PathMode {
        self.mode
    }

    /// Resolve `path` as referenced from the template at `template_location`.
    pub fn resolve(&self, path: impl AsRef<Path>, template_location: &Path) -> PathBuf {
        match self.mode {
            PathMode::WorkingDirectory => path.as_ref().to_path_buf(),
            PathMode::TemplateRelative => self.base_dir(template_location).join(path),
        }
    }

    /// The directory glob patterns and relative lookups start from.
    pub fn base_dir(&self, template_location: &Path) -> PathBuf {
        match self.mode {
            PathMode::WorkingDirectory => PathBuf::new(),
            PathMode::TemplateRelative => template_location
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }

    /// Expand a glob pattern referenced from `template_location`, in
    /// lexical order. Unreadable entries are skipped.
    pub fn glob(&self, pattern: &str, template_location: &Path) -> TemplateResult<Vec<PathBuf>> {
        let full = self.base_dir(template_location).join(pattern.trim());
        let full = full.to_string_lossy();
        let paths = glob::glob(&full).map_err(|e| TemplateError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(paths.filter_map(Result::ok).collect())
    }

    /// Like [`PathResolver::glob`] but only regular files.
    pub fn glob_files(
        &self,
        pattern: &str,
        template_location: &Path,
    ) -> TemplateResult<Vec<PathBuf>> {
        Ok(self
            .glob(pattern, template_location)?
            .into_iter()
            .filter(|path| path.is_file())
            .collect())
    }
}

/// Split a comma-separated or sequence-valued pattern list.
pub fn pattern_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|pattern| !pattern.is_empty())
            .map(String::from)
            .collect(),
        serde_json::Value::Array(entries) => entries.iter().flat_map(pattern_list).collect(),
        _ => Vec::new(),
    }
}
