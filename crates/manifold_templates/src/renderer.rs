//! Template compilation and rendering.
//!
//! A template is a Tera document that renders, for one manifest item, into a
//! stream of YAML directive documents. The item's fields are top-level
//! variables; the values context is available as `values`, with the
//! template's own location under `values["$template"]`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tera::{Context, Tera};
use tracing::{debug, warn};

use crate::error::{TemplateError, TemplateResult};
use crate::helpers::{register_helpers, HelperOptions};
use crate::imports::{apply_import_block, extract_import_blocks};
use crate::manifest::parse_documents;
use crate::values::ValuesContext;

/// Name of the directive body inside a compiled template.
const BODY: &str = "body";

/// Context key the values tree is exposed under.
pub const VALUES_KEY: &str = "values";

fn import_name(index: usize) -> String {
    format!("import_{}", index)
}

/// A template compiled for repeated rendering.
pub struct CompiledTemplate {
    location: PathBuf,
    tera: Tera,
    imports: usize,
    options: HelperOptions,
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("location", &self.location)
            .field("imports", &self.imports)
            .finish()
    }
}

impl CompiledTemplate {
    /// Compile `source` as the template found at `location`.
    pub fn compile(source: &str, location: &Path, options: HelperOptions) -> TemplateResult<Self> {
        let (body, blocks) = extract_import_blocks(source);
        let compilation_failed = |error: tera::Error| TemplateError::CompilationFailed {
            template: location.to_path_buf(),
            message: describe_tera_error(&error),
        };

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        register_helpers(&mut tera, location, options);

        for (index, block) in blocks.iter().enumerate() {
            tera.add_raw_template(&import_name(index), block)
                .map_err(compilation_failed)?;
        }
        tera.add_raw_template(BODY, &body)
            .map_err(compilation_failed)?;

        debug!(
            "Compiled template {:?} with {} import block(s)",
            location,
            blocks.len()
        );
        Ok(Self {
            location: location.to_path_buf(),
            tera,
            imports: blocks.len(),
            options,
        })
    }

    /// Read and compile the template file at `location`.
    pub fn from_file(location: &Path, options: HelperOptions) -> TemplateResult<Self> {
        if !location.is_file() {
            return Err(TemplateError::NotFound(location.to_path_buf()));
        }
        let source = fs::read_to_string(location)?;
        Self::compile(&source, location, options)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Apply the import blocks for `item` to `values`, then render the body.
    pub fn render_text(&self, item: &Value, values: &ValuesContext) -> TemplateResult<String> {
        for index in 0..self.imports {
            let rendered = self.render_named(&import_name(index), item, values)?;
            apply_import_block(&rendered, values, &self.options.resolver, &self.location)?;
        }
        self.render_named(BODY, item, values)
    }

    /// Render `item` into its directive documents.
    pub fn render(&self, item: &Value, values: &ValuesContext) -> TemplateResult<Vec<Value>> {
        let text = self.render_text(item, values)?;
        parse_documents(&text).map_err(|e| TemplateError::RenderingFailed {
            template: self.location.clone(),
            message: format!("output is not valid YAML: {}", e),
        })
    }

    fn render_named(&self, name: &str, item: &Value, values: &ValuesContext) -> TemplateResult<String> {
        let context = build_context(item, values);
        self.tera
            .render(name, &context)
            .map_err(|error| TemplateError::RenderingFailed {
                template: self.location.clone(),
                message: describe_tera_error(&error),
            })
    }
}

/// Item fields as top-level variables, plus the values tree.
///
/// `values` is reserved: an item field of that name is not visible to the
/// template.
fn build_context(item: &Value, values: &ValuesContext) -> Context {
    let mut context = Context::new();
    if let Value::Object(fields) = item {
        for (key, value) in fields {
            if key == VALUES_KEY {
                warn!(
                    "Item field '{}' is shadowed by the values context",
                    VALUES_KEY
                );
                continue;
            }
            context.insert(key.as_str(), value);
        }
    }
    context.insert(VALUES_KEY, &values.to_value());
    context
}

/// Flatten a Tera error and its sources into one readable message.
pub fn describe_tera_error(error: &tera::Error) -> String {
    use std::error::Error;

    let mut messages = vec![error.to_string()];
    let mut current: Option<&dyn Error> = error.source();
    while let Some(err) = current {
        messages.push(err.to_string());
        current = err.source();
    }

    messages
        .into_iter()
        .map(|msg| msg.trim().to_string())
        .filter(|msg| !msg.is_empty())
        .collect::<Vec<_>>()
        .join("\n  → ")
}
