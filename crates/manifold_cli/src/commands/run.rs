//! Run command - Expand every input template unit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use manifold_core::{Engine, RunContext, RunOptions, RunSummary, DEFAULT_MAX_DEPTH};
use manifold_templates::{TemplateLoader, ValuesContext};
use thiserror::Error;
use tracing::{error, info};

use crate::matcher::ItemMatcher;
use crate::values;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("No input specified (use --input)")]
    NoInput,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Template unit, directory of units, template file or `template,manifest[,schema]`
    #[arg(short, long = "input")]
    pub input: Vec<String>,

    /// Values as a querystring (`key=value&other=value`)
    #[arg(short = 'v', long = "values")]
    pub values: Vec<String>,

    /// YAML value file, merged under `name` (default: the file stem)
    #[arg(short = 'f', long = "valueFile", alias = "value-file", value_name = "[NAME=]PATH")]
    pub value_files: Vec<String>,

    /// Log intended writes instead of performing them
    #[arg(long, env = "MANIFOLD_DRY")]
    pub dry: bool,

    /// Allow `$exec` directives and the `exec` template helper
    #[arg(long, env = "MANIFOLD_ENABLE_EXEC")]
    pub enable_exec: bool,

    /// Archive (.zip, .tar, .tgz) receiving every top-level output
    #[arg(long, env = "MANIFOLD_ARCHIVE")]
    pub archive: Option<PathBuf>,

    /// Resolve template-referenced paths against the referencing template
    #[arg(long, alias = "relativeToManifest", env = "MANIFOLD_RELATIVE")]
    pub relative: bool,

    /// Render units without a manifest once for `{name: Base}`
    #[arg(long)]
    pub base: bool,

    /// Filter top-level items by `field<op>value[&...]`; repeat for alternatives
    #[arg(long = "match", value_name = "EXPR")]
    pub matches: Vec<String>,

    /// Let all items share one values tree instead of isolated copies
    #[arg(long)]
    pub share_values: bool,

    /// Maximum nesting of `$template` expansions
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,
}

impl RunArgs {
    pub fn options(&self) -> RunOptions {
        let mut options = RunOptions::new().with_max_depth(self.max_depth);
        if self.dry {
            options = options.dry_run();
        }
        if self.enable_exec {
            options = options.enable_exec();
        }
        if self.relative {
            options = options.relative();
        }
        if self.share_values {
            options = options.share_values();
        }
        if let Some(archive) = &self.archive {
            options = options.with_archive(archive);
        }
        options
    }
}

pub async fn execute(args: &RunArgs) -> Result<RunSummary> {
    if args.input.is_empty() {
        return Err(RunError::NoInput.into());
    }

    let values = values::assemble(&args.values, &args.value_files)?;
    let matcher = ItemMatcher::parse(&args.matches)?;

    let ctx = Arc::new(RunContext::new(args.options()));
    let engine = Engine::new(Arc::clone(&ctx));

    let outcome = expand_inputs(&engine, args, &values, &matcher).await;
    let summary = ctx.finish().context("Failed to finalize outputs");
    if let (Err(_), Err(finish)) = (&outcome, &summary) {
        error!("{:#}", finish);
    }
    outcome?;
    summary
}

async fn expand_inputs(
    engine: &Engine,
    args: &RunArgs,
    values: &ValuesContext,
    matcher: &ItemMatcher,
) -> Result<()> {
    for input in &args.input {
        let units = TemplateLoader::new(input)
            .load_all()
            .with_context(|| format!("Failed to load templates from {}", input))?;

        for unit in units {
            info!("Expanding {}", unit.template.display());
            let mut expansion = engine
                .unit_expansion(&unit, values, args.base)
                .with_context(|| format!("Failed to prepare {}", unit.template.display()))?;
            if !matcher.is_empty() {
                expansion.items.retain(|item| matcher.matches(item));
            }
            engine
                .expand(expansion)
                .await
                .with_context(|| format!("Failed to expand {}", unit.template.display()))?;
        }
    }
    Ok(())
}
