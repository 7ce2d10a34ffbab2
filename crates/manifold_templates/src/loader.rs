//! Template unit discovery.
//!
//! A template unit is a directory holding `template.yaml` (or `template.yml`)
//! with an optional `manifest.yaml` and an optional `schema.json` or
//! `schema.yaml` beside it.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{TemplateError, TemplateResult};

const TEMPLATE_FILES: [&str; 2] = ["template.yaml", "template.yml"];
const MANIFEST_FILES: [&str; 2] = ["manifest.yaml", "manifest.yml"];
const SCHEMA_FILES: [&str; 2] = ["schema.json", "schema.yaml"];

/// One template to run, with its optional manifest and schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateUnit {
    pub template: PathBuf,
    pub manifest: Option<PathBuf>,
    pub schema: Option<PathBuf>,
}

impl TemplateUnit {
    /// A bare template file, rendered without a manifest.
    pub fn bare(template: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            manifest: None,
            schema: None,
        }
    }

    /// Parse the `template,manifest[,schema]` form.
    pub fn from_list(list: &str) -> TemplateResult<Self> {
        let parts: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        match parts.as_slice() {
            [template] => Ok(Self::bare(template)),
            [template, manifest] => Ok(Self {
                template: PathBuf::from(template),
                manifest: Some(PathBuf::from(manifest)),
                schema: None,
            }),
            [template, manifest, schema] => Ok(Self {
                template: PathBuf::from(template),
                manifest: Some(PathBuf::from(manifest)),
                schema: Some(PathBuf::from(schema)),
            }),
            _ => Err(TemplateError::NotFound(PathBuf::from(list))),
        }
    }

    /// Directory the unit lives in.
    pub fn dir(&self) -> &Path {
        self.template.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn first_existing(dir: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Discovers template units under an input path.
pub struct TemplateLoader {
    input: PathBuf,
}

impl TemplateLoader {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Whether `dir` is a template unit.
    pub fn is_unit(dir: &Path) -> bool {
        dir.is_dir() && first_existing(dir, &TEMPLATE_FILES).is_some()
    }

    /// Resolve the input into the units it names.
    ///
    /// A comma list or a file yields one unit; a unit directory yields
    /// itself; any other directory yields the units one level below it, in
    /// name order.
    pub fn load_all(&self) -> TemplateResult<Vec<TemplateUnit>> {
        let raw = self.input.to_string_lossy();
        if raw.contains(',') {
            return Ok(vec![TemplateUnit::from_list(&raw)?]);
        }
        if self.input.is_file() {
            return Ok(vec![TemplateUnit::bare(&self.input)]);
        }
        if !self.input.exists() {
            return Err(TemplateError::NotFound(self.input.clone()));
        }
        if Self::is_unit(&self.input) {
            return Ok(vec![self.load_unit(&self.input)?]);
        }

        let mut units = Vec::new();
        for entry in WalkDir::new(&self.input)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if Self::is_unit(path) {
                let unit = self.load_unit(path)?;
                info!("Discovered template unit {:?}", path);
                units.push(unit);
            }
        }

        if units.is_empty() {
            warn!("No template units found in {:?}", self.input);
        }
        Ok(units)
    }

    /// Load the unit in `dir`.
    pub fn load_unit(&self, dir: &Path) -> TemplateResult<TemplateUnit> {
        let template = first_existing(dir, &TEMPLATE_FILES)
            .ok_or_else(|| TemplateError::NotFound(dir.join("template.yaml")))?;
        let unit = TemplateUnit {
            template,
            manifest: first_existing(dir, &MANIFEST_FILES),
            schema: first_existing(dir, &SCHEMA_FILES),
        };
        debug!("Loaded template unit {:?}", unit);
        Ok(unit)
    }
}
