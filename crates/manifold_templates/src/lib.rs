//! # manifold_templates
//!
//! Templates, manifests and values for manifold.
//!
//! This crate holds everything needed to turn one manifest item into its
//! directive documents:
//!
//! - Deep merge of JSON-like trees
//! - Manifest loading and merge-by-name
//! - Path resolution relative to the working directory or the template
//! - The values context shared by an expansion tree
//! - Tera-based template compilation with import blocks and helpers
//! - JSON-Schema validation with declared defaults
//! - Template unit discovery
//!
//! ## Example
//!
//! ```rust,no_run
//! use manifold_templates::{
//!     CompiledTemplate, HelperOptions, ManifestMerger, ManifestSource, ValuesContext,
//! };
//! use std::path::Path;
//!
//! let location = Path::new("units/service/template.yaml");
//! let template = CompiledTemplate::from_file(location, HelperOptions::default()).unwrap();
//! let items = ManifestMerger::default()
//!     .merge(&[ManifestSource::File("units/service/manifest.yaml".into())], location)
//!     .unwrap();
//!
//! let values = ValuesContext::default().at_template(location);
//! for item in &items {
//!     let directives = template.render(item, &values).unwrap();
//!     println!("{} directive(s)", directives.len());
//! }
//! ```

pub mod error;
pub mod helpers;
pub mod imports;
pub mod loader;
pub mod manifest;
pub mod merge;
pub mod paths;
pub mod renderer;
pub mod schema;
pub mod values;

pub use error::{TemplateError, TemplateResult};
pub use helpers::HelperOptions;
pub use loader::{TemplateLoader, TemplateUnit};
pub use manifest::{
    item_name, load_documents, load_items, parse_documents, ManifestMerger, ManifestSource,
};
pub use merge::{merge, merge_all, merge_maps};
pub use paths::{pattern_list, PathMode, PathResolver};
pub use renderer::{describe_tera_error, CompiledTemplate};
pub use schema::{SchemaValidator, SchemaViolation};
pub use values::{ValuesContext, ValuesMode, TEMPLATE_KEY};
