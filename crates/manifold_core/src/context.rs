//! Run-wide state: options, counters, caches and the output sink.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use manifold_templates::{
    CompiledTemplate, HelperOptions, PathMode, PathResolver, SchemaValidator, ValuesMode,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::archive::FinishedArchive;
use crate::codec;
use crate::error::EngineResult;
use crate::sink::{DryRunSink, FsSink, OutputSink, OutputTarget, PlannedOutput};

/// Nesting limit for `$template` expansions.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Options fixed for a whole run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Log intended side effects instead of performing them
    pub dry_run: bool,
    /// Permit `$exec` directives and the `exec` template helper
    pub enable_exec: bool,
    /// How template-referenced paths resolve
    pub path_mode: PathMode,
    /// Whether manifest items work on copies of the values
    pub values_mode: ValuesMode,
    /// Archive every top-level output is written into
    pub archive: Option<PathBuf>,
    /// Maximum nesting of `$template` expansions
    pub max_depth: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            enable_exec: false,
            path_mode: PathMode::default(),
            values_mode: ValuesMode::default(),
            archive: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn enable_exec(mut self) -> Self {
        self.enable_exec = true;
        self
    }

    /// Resolve paths against the referencing template.
    pub fn relative(mut self) -> Self {
        self.path_mode = PathMode::TemplateRelative;
        self
    }

    /// Let every item mutate one values tree.
    pub fn share_values(mut self) -> Self {
        self.values_mode = ValuesMode::Shared;
        self
    }

    pub fn with_archive(mut self, archive: impl Into<PathBuf>) -> Self {
        self.archive = Some(archive.into());
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(self.path_mode)
    }

    pub fn helper_options(&self) -> HelperOptions {
        HelperOptions {
            resolver: self.resolver(),
            dry_run: self.dry_run,
            enable_exec: self.enable_exec,
        }
    }
}

/// Counters shared by every level of a run.
#[derive(Debug, Default)]
pub struct RunStats {
    processed: AtomicUsize,
    failed: AtomicUsize,
    written: AtomicUsize,
}

impl RunStats {
    /// Count an item and return its zero-based run-wide index.
    pub fn record_processed(&self) -> usize {
        self.processed.fetch_add(1, Ordering::SeqCst)
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_written(&self) {
        self.written.fetch_add(1, Ordering::SeqCst);
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
    pub written: usize,
    pub elapsed: Duration,
    pub archives: Vec<FinishedArchive>,
    pub planned: Vec<PlannedOutput>,
}

impl RunSummary {
    /// Whether every item passed validation.
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} items, {} failed. {} files emitted. Time to emit: {}ms",
            self.processed,
            self.failed,
            self.written,
            self.elapsed.as_millis()
        )
    }
}

/// Cache key for an input-side path.
fn cache_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// State threaded through every level of one run.
pub struct RunContext {
    options: RunOptions,
    stats: RunStats,
    sink: Box<dyn OutputSink>,
    inputs: Mutex<HashMap<PathBuf, Arc<Value>>>,
    templates: Mutex<HashMap<PathBuf, Arc<CompiledTemplate>>>,
    schemas: Mutex<HashMap<PathBuf, Arc<SchemaValidator>>>,
    started: Instant,
}

impl RunContext {
    /// Create a context with the sink the options call for.
    pub fn new(options: RunOptions) -> Self {
        let sink: Box<dyn OutputSink> = if options.dry_run {
            Box::new(DryRunSink::new())
        } else {
            Box::new(FsSink::new())
        };
        Self::with_sink(options, sink)
    }

    pub fn with_sink(options: RunOptions, sink: Box<dyn OutputSink>) -> Self {
        Self {
            options,
            stats: RunStats::default(),
            sink,
            inputs: Mutex::new(HashMap::new()),
            templates: Mutex::new(HashMap::new()),
            schemas: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn resolver(&self) -> PathResolver {
        self.options.resolver()
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Write `content` to `target` and count it.
    pub async fn write(&self, target: &OutputTarget, content: &[u8]) -> EngineResult<()> {
        self.sink.write(target, content).await?;
        self.stats.record_written();
        Ok(())
    }

    /// Copy the file at `source` to `target` and count it.
    pub async fn copy(&self, source: &Path, target: &OutputTarget) -> EngineResult<()> {
        self.sink.copy(source, target).await?;
        self.stats.record_written();
        Ok(())
    }

    /// The parsed document at `path`, read once per run.
    pub async fn load_input(&self, path: &Path) -> EngineResult<Arc<Value>> {
        let key = cache_key(path);
        if let Some(document) = self.inputs.lock().get(&key) {
            return Ok(Arc::clone(document));
        }

        debug!("Loading input document {:?}", path);
        let text = tokio::fs::read_to_string(path).await?;
        let document = Arc::new(codec::parse(&text, path)?);
        Ok(Arc::clone(
            self.inputs.lock().entry(key).or_insert(document),
        ))
    }

    /// The compiled template at `path`, compiled once per run.
    pub fn template(&self, path: &Path) -> EngineResult<Arc<CompiledTemplate>> {
        let key = cache_key(path);
        if let Some(template) = self.templates.lock().get(&key) {
            return Ok(Arc::clone(template));
        }

        let template = Arc::new(CompiledTemplate::from_file(
            path,
            self.options.helper_options(),
        )?);
        Ok(Arc::clone(
            self.templates.lock().entry(key).or_insert(template),
        ))
    }

    /// The compiled schema at `path`, compiled once per run.
    pub fn schema(&self, path: &Path) -> EngineResult<Arc<SchemaValidator>> {
        let key = cache_key(path);
        if let Some(schema) = self.schemas.lock().get(&key) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(SchemaValidator::from_file(path)?);
        Ok(Arc::clone(self.schemas.lock().entry(key).or_insert(schema)))
    }

    /// Finalize archives and report the run.
    pub fn finish(&self) -> EngineResult<RunSummary> {
        let archives = self.sink.finish()?;
        Ok(RunSummary {
            processed: self.stats.processed(),
            failed: self.stats.failed(),
            written: self.stats.written(),
            elapsed: self.started.elapsed(),
            archives,
            planned: self.sink.planned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_options_builder() {
        let options = RunOptions::new()
            .dry_run()
            .relative()
            .share_values()
            .with_archive("out.zip")
            .with_max_depth(4);

        assert!(options.dry_run);
        assert!(!options.enable_exec);
        assert_eq!(options.path_mode, PathMode::TemplateRelative);
        assert_eq!(options.values_mode, ValuesMode::Shared);
        assert_eq!(options.archive, Some(PathBuf::from("out.zip")));
        assert_eq!(options.max_depth, 4);
        assert!(options.helper_options().dry_run);
    }

    #[test]
    fn test_summary_line() {
        let summary = RunSummary {
            processed: 3,
            failed: 1,
            written: 2,
            elapsed: Duration::from_millis(15),
            archives: Vec::new(),
            planned: Vec::new(),
        };
        assert_eq!(
            summary.to_string(),
            "Processed 3 items, 1 failed. 2 files emitted. Time to emit: 15ms"
        );
        assert!(!summary.succeeded());
    }

    #[tokio::test]
    async fn test_input_documents_are_cached() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.yaml");
        fs::write(&path, "a: 1\n").unwrap();

        let ctx = RunContext::new(RunOptions::default());
        let first = ctx.load_input(&path).await.unwrap();
        fs::write(&path, "a: 2\n").unwrap();
        let second = ctx.load_input(&path).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second["a"], serde_json::json!(1));
    }

    #[test]
    fn test_counters() {
        let stats = RunStats::default();
        assert_eq!(stats.record_processed(), 0);
        assert_eq!(stats.record_processed(), 1);
        stats.record_failed();
        stats.record_written();
        assert_eq!((stats.processed(), stats.failed(), stats.written()), (2, 1, 1));
    }
}
