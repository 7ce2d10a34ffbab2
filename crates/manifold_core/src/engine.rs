//! Recursive expansion.
//!
//! An [`Expansion`] is one template applied to one manifest. Every item is
//! given its defaults and values, validated, rendered into directive
//! documents and handed to the interpreter. `$template` directives re-enter
//! [`Engine::expand`] with a nested expansion one level deeper.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use manifold_templates::{
    item_name, load_items, CompiledTemplate, SchemaValidator, SchemaViolation, TemplateUnit,
    ValuesContext,
};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::context::RunContext;
use crate::error::{EngineError, EngineResult};

/// One template applied to one manifest.
pub struct Expansion {
    pub template: Arc<CompiledTemplate>,
    pub items: Vec<Value>,
    pub schema: Arc<SchemaValidator>,
    /// Values of the caller; each item derives its own from these.
    pub values: ValuesContext,
    /// Defaults every item starts from; item fields win.
    pub additional: Option<Map<String, Value>>,
    /// Archive outputs go to unless a directive names its own.
    pub archive: Option<PathBuf>,
    /// Run each item's directives concurrently.
    pub parallel: bool,
    pub depth: usize,
}

/// Everything a directive needs to know about where it was rendered.
#[derive(Debug, Clone)]
pub struct DirectiveScope {
    pub item: Value,
    pub values: ValuesContext,
    pub template: PathBuf,
    pub archive: Option<PathBuf>,
    pub parallel: bool,
    pub depth: usize,
}

/// Drives expansions and interprets their directives.
#[derive(Clone)]
pub struct Engine {
    pub(crate) ctx: Arc<RunContext>,
}

impl Engine {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Build the top-level expansion for a template unit.
    ///
    /// Manifest items are taken as listed; names are left to the schema, so
    /// a name may come from a schema default. Without a manifest the unit
    /// renders once, for an empty item or for `{name: "Base"}` when `base` is
    /// set, and any object is accepted.
    pub fn unit_expansion(
        &self,
        unit: &TemplateUnit,
        values: &ValuesContext,
        base: bool,
    ) -> EngineResult<Expansion> {
        let template = self.ctx.template(&unit.template)?;

        let (items, schema) = match &unit.manifest {
            Some(manifest) => {
                debug!("Loading manifest from {:?}", manifest);
                let items = load_items(manifest)?;
                let schema = match &unit.schema {
                    Some(schema) => self.ctx.schema(schema)?,
                    None => Arc::new(SchemaValidator::named_items()?),
                };
                (items, schema)
            }
            None => {
                let item = if base { json!({"name": "Base"}) } else { json!({}) };
                (vec![item], Arc::new(SchemaValidator::any_object()?))
            }
        };

        Ok(Expansion {
            template,
            items,
            schema,
            values: values.clone(),
            additional: None,
            archive: self.ctx.options().archive.clone(),
            parallel: false,
            depth: 0,
        })
    }

    /// Run an expansion to completion.
    ///
    /// Items are processed in order. An item that fails validation is
    /// reported and counted, and the remaining items still run.
    pub fn expand(&self, expansion: Expansion) -> BoxFuture<'_, EngineResult<()>> {
        async move {
            let location = expansion.template.location().to_path_buf();
            if expansion.depth > self.ctx.options().max_depth {
                return Err(EngineError::ExpansionTooDeep {
                    depth: expansion.depth,
                    template: location,
                });
            }
            debug!(
                "Expanding {:?} over {} item(s) at depth {}",
                location,
                expansion.items.len(),
                expansion.depth
            );

            let mode = self.ctx.options().values_mode;
            for item in expansion.items {
                let index = self.ctx.stats().record_processed();
                let mut item = with_defaults(item, expansion.additional.as_ref());
                let values = expansion.values.for_item(mode).at_template(&location);

                if let Err(violations) = expansion.schema.validate(&mut item) {
                    report_failure(&location, &item, index, &violations);
                    self.ctx.stats().record_failed();
                    continue;
                }

                let documents = expansion.template.render(&item, &values)?;
                let scope = DirectiveScope {
                    item,
                    values,
                    template: location.clone(),
                    archive: expansion.archive.clone(),
                    parallel: expansion.parallel,
                    depth: expansion.depth,
                };
                self.run_directives(&documents, &scope).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Execute an item's directives, in order or all at once.
    ///
    /// Concurrent directives all run to completion before the first error,
    /// if any, is returned.
    async fn run_directives(&self, documents: &[Value], scope: &DirectiveScope) -> EngineResult<()> {
        if scope.parallel {
            let results = join_all(documents.iter().map(|doc| self.execute(doc, scope))).await;
            results.into_iter().collect::<EngineResult<Vec<()>>>()?;
        } else {
            for document in documents {
                self.execute(document, scope).await?;
            }
        }
        Ok(())
    }
}

/// `additional` overlaid with the item's own fields.
fn with_defaults(item: Value, additional: Option<&Map<String, Value>>) -> Value {
    match (additional, item) {
        (Some(defaults), Value::Object(fields)) => {
            let mut merged = defaults.clone();
            for (key, value) in fields {
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, item) => item,
    }
}

fn report_failure(template: &Path, item: &Value, index: usize, violations: &[SchemaViolation]) {
    let name = item_name(item).unwrap_or_else(|| format!("$[{}]", index));
    error!("Error occurred on \"{}\" in {}", name, template.display());
    for violation in violations {
        error!("  {}", violation);
    }
}
