//! Directive execution.
//!
//! Preparatory steps (`$mkdir`, `$chdir`, `$rm`) run first, in that order,
//! then the directive's terminal action.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use manifold_templates::{merge, ManifestMerger, ManifestSource, SchemaValidator};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::codec;
use crate::directive::{Directive, DirectiveAction};
use crate::engine::{DirectiveScope, Engine, Expansion};
use crate::error::{EngineError, EngineResult};
use crate::shell;
use crate::sink::OutputTarget;

fn warn_if_parallel(scope: &DirectiveScope, key: &str) {
    if scope.parallel {
        warn!("Parallel execution not supported for {}", key);
    }
}

impl Engine {
    /// Execute one rendered directive document.
    pub async fn execute(&self, document: &Value, scope: &DirectiveScope) -> EngineResult<()> {
        let Some(directive) = Directive::classify(document)? else {
            return Ok(());
        };
        debug!("Executing {} directive from {:?}", directive.action.name(), scope.template);

        self.prepare(&directive, scope).await?;

        match &directive.action {
            DirectiveAction::None => Ok(()),
            DirectiveAction::Expand {
                template,
                manifest,
                schema,
            } => {
                self.expand_nested(&directive, template, manifest, schema.as_deref(), scope)
                    .await
            }
            DirectiveAction::Copy { patterns } => self.copy(&directive, patterns, scope).await,
            DirectiveAction::Exec { command } => self.exec(command).await,
            DirectiveAction::Text { text } => match &directive.out {
                Some(out) => {
                    let content = directive.replace.apply(text);
                    self.ctx
                        .write(&self.target(&directive, out, scope), content.as_bytes())
                        .await
                }
                None => Ok(()),
            },
            DirectiveAction::Merge {
                patterns,
                separator,
            } => self.concatenate(&directive, patterns, separator, scope).await,
            DirectiveAction::Output { input } => {
                self.output(&directive, input.as_deref(), scope).await
            }
        }
    }

    fn target(&self, directive: &Directive, out: &str, scope: &DirectiveScope) -> OutputTarget {
        OutputTarget::new(out, archive_of(directive, scope).as_deref())
    }

    async fn prepare(&self, directive: &Directive, scope: &DirectiveScope) -> EngineResult<()> {
        let resolver = self.ctx.resolver();
        let dry_run = self.ctx.is_dry_run();

        if !directive.mkdir.is_empty() {
            warn_if_parallel(scope, "$mkdir");
            for dir in &directive.mkdir {
                let path = resolver.resolve(dir, &scope.template);
                if dry_run {
                    info!("Would create directory {:?}", path);
                } else {
                    tokio::fs::create_dir_all(&path).await?;
                }
            }
        }

        if let Some(dir) = &directive.chdir {
            warn_if_parallel(scope, "$chdir");
            let path = resolver.resolve(dir, &scope.template);
            if dry_run {
                info!("Would change directory to {:?}", path);
            } else {
                tokio::fs::create_dir_all(&path).await?;
                std::env::set_current_dir(&path)?;
                debug!("Changed directory to {:?}", path);
            }
        }

        if !directive.rm.is_empty() {
            warn_if_parallel(scope, "$rm");
            let paths: Vec<PathBuf> = directive
                .rm
                .iter()
                .map(|path| resolver.resolve(path, &scope.template))
                .collect();
            if dry_run {
                info!("Would remove {:?}", paths);
            } else {
                fs_extra::remove_items(&paths)?;
            }
        }

        Ok(())
    }

    async fn expand_nested(
        &self,
        directive: &Directive,
        template: &Path,
        manifest: &Value,
        schema: Option<&Path>,
        scope: &DirectiveScope,
    ) -> EngineResult<()> {
        let resolver = self.ctx.resolver();
        let location = resolver.resolve(template, &scope.template);
        let compiled = self.ctx.template(&location)?;

        let sources = ManifestSource::from_directive(manifest);
        let items = ManifestMerger::new(resolver).merge(&sources, &scope.template)?;
        let schema = match schema {
            Some(schema) => self.ctx.schema(&resolver.resolve(schema, &scope.template))?,
            None => Arc::new(SchemaValidator::named_items()?),
        };

        let mut additional: Map<String, Value> = scope.item.as_object().cloned().unwrap_or_default();
        if let Value::Object(payload) = &directive.payload {
            for (key, value) in payload {
                additional.insert(key.clone(), value.clone());
            }
        }

        self.expand(Expansion {
            template: compiled,
            items,
            schema,
            values: scope.values.clone(),
            additional: Some(additional),
            archive: archive_of(directive, scope),
            parallel: true,
            depth: scope.depth + 1,
        })
        .await
    }

    async fn copy(
        &self,
        directive: &Directive,
        patterns: &[String],
        scope: &DirectiveScope,
    ) -> EngineResult<()> {
        let resolver = self.ctx.resolver();
        let archive = archive_of(directive, scope);

        for pattern in patterns {
            let files = resolver.glob_files(pattern, &scope.template)?;
            if files.is_empty() {
                warn!("Could not find any file matching {}, skipping", pattern);
            }
            for file in files {
                let Some(name) = file.file_name() else {
                    continue;
                };
                let target = OutputTarget::in_dir(
                    directive.out.as_deref(),
                    &name.to_string_lossy(),
                    archive.as_deref(),
                );
                self.ctx.copy(&file, &target).await?;
            }
        }
        Ok(())
    }

    async fn exec(&self, command: &str) -> EngineResult<()> {
        if !self.ctx.options().enable_exec {
            return Err(EngineError::ExecDisabled(command.to_string()));
        }
        if self.ctx.is_dry_run() {
            info!("Would run `{}`", command);
            return Ok(());
        }
        shell::run(command).await.map(|_| ())
    }

    async fn concatenate(
        &self,
        directive: &Directive,
        patterns: &[String],
        separator: &str,
        scope: &DirectiveScope,
    ) -> EngineResult<()> {
        warn_if_parallel(scope, "$merge");
        let resolver = self.ctx.resolver();

        let mut merged = String::new();
        for pattern in patterns {
            let files = resolver.glob_files(pattern, &scope.template)?;
            if files.is_empty() {
                warn!("Could not find any file matching {}, skipping", pattern);
            }
            for file in files {
                merged.push_str(&tokio::fs::read_to_string(&file).await?);
                merged.push_str(separator);
            }
        }

        let Some(out) = &directive.out else {
            return Ok(());
        };
        let content = directive.replace.apply(&merged);
        self.ctx
            .write(&self.target(directive, out, scope), content.as_bytes())
            .await
    }

    async fn output(
        &self,
        directive: &Directive,
        input: Option<&Path>,
        scope: &DirectiveScope,
    ) -> EngineResult<()> {
        let Some(out) = &directive.out else {
            return Ok(());
        };

        let tree = match (input, &directive.payload) {
            (Some(input), payload @ Value::Object(_)) => {
                let resolved = self.ctx.resolver().resolve(input, &scope.template);
                let base = self.ctx.load_input(&resolved).await?;
                let mut tree = (*base).clone();
                if tree.is_object() {
                    merge(&mut tree, payload);
                    tree
                } else {
                    payload.clone()
                }
            }
            (_, payload) => payload.clone(),
        };

        let serialized = codec::serialize(&tree, out)?;
        let content = directive.replace.apply(&serialized);
        self.ctx
            .write(&self.target(directive, out, scope), content.as_bytes())
            .await
    }
}

/// The archive a directive writes into: its own `$archive`, else the one
/// inherited from the expansion.
fn archive_of(directive: &Directive, scope: &DirectiveScope) -> Option<PathBuf> {
    directive.archive.clone().or_else(|| scope.archive.clone())
}
