//! # manifold_core
//!
//! Directive interpreter and recursive expansion engine for manifold.
//!
//! A run renders every manifest item of a template into directive documents
//! and executes them: writing serialized payloads, copying and concatenating
//! files, running shell steps, and expanding nested templates over nested
//! manifests.
//!
//! # Architecture
//!
//! - **RunContext**: options, counters, input and template caches, output sink
//! - **Engine**: the expansion loop and the directive interpreter
//! - **Directive**: classification of a rendered document into one action
//! - **OutputSink**: disk and archive writes, or a dry-run record of them
//! - **Codecs**: YAML, JSON and XML documents
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use manifold_core::{Engine, RunContext, RunOptions};
//! use manifold_templates::{TemplateLoader, ValuesContext};
//!
//! # async fn run() -> manifold_core::EngineResult<()> {
//! let ctx = Arc::new(RunContext::new(RunOptions::new().dry_run()));
//! let engine = Engine::new(Arc::clone(&ctx));
//! let values = ValuesContext::default();
//!
//! for unit in TemplateLoader::new("units").load_all()? {
//!     let expansion = engine.unit_expansion(&unit, &values, false)?;
//!     engine.expand(expansion).await?;
//! }
//!
//! let summary = ctx.finish()?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod codec;
pub mod context;
pub mod directive;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod shell;
pub mod sink;

pub use archive::{ArchiveKind, ArchiveRegistry, FinishedArchive};
pub use codec::Format;
pub use context::{RunContext, RunOptions, RunStats, RunSummary, DEFAULT_MAX_DEPTH};
pub use directive::{Directive, DirectiveAction};
pub use engine::{DirectiveScope, Engine, Expansion};
pub use error::{EngineError, EngineResult};
pub use sink::{DryRunSink, FsSink, OutputSink, OutputTarget, PlannedOutput};
