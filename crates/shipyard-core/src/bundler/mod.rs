//! Front-end asset pipeline.
//!
//! ## Usage
//!
//! ```ignore
//! use shipyard_core::{BuildConfig, Pipeline};
//!
//! let config = BuildConfig::load(Path::new("."))?;
//! let mut pipeline = Pipeline::new(config)?;
//! let report = pipeline.build()?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolution** - Map import specifiers to files (aliases, extension probing)
//! 2. **Loading** - Route each file through its rule's transform stages
//! 3. **Graph** - Breadth-first discovery from the entry, transforms in parallel
//! 4. **Chunks** - Entry, async, shared and runtime chunks with single ownership
//! 5. **Emit** - Serialize chunks, render HTML, publish to a clean directory

mod chunks;
mod emit;
mod esm;
mod graph;
mod imports;
mod loader;
mod plugin;
mod resolve;
mod stages;
mod template;
pub mod watch;

pub use chunks::{
    Chunk, ChunkGraph, ChunkId, ChunkKind, ChunkSetViolation, ChunkSplitter, SplitOptions,
};
pub use emit::{
    Asset, AssetEmitter, RenderedBuild, ScriptTemplates, CHUNK_QUEUE, DEFAULT_HTML_TEMPLATE,
};
pub use esm::{lower_module, rewrite_specifiers};
pub use graph::{
    CachedModule, Dependency, GraphBuild, ModuleGraph, ModuleGraphBuilder, ModuleId, ModuleRecord,
    ResolvedImport, TransformCache, ENTRY_MODULE,
};
pub use imports::{scan_imports, Import, ImportKind};
pub use loader::{
    EmittedResource, ExcludePattern, LoaderDispatcher, LoaderError, LoaderRule, RuleAction, Stage,
    StageError, StageInput, StageLink, StageOutput, TransformOutput, ANY_CONTENT, SCRIPT_CONTENT,
};
pub use plugin::{
    Definitions, DefinePlugin, HookResult, HtmlAsset, HtmlPlugin, Plugin, PluginContext,
    PluginError, PluginHost,
};
pub use resolve::{Alias, PathResolver, ResolveError};
pub use stages::{CssStage, JsonStage, RawStage, ScriptStage, StageRegistry, StyleInjectStage};
pub use template::{public_url, OutputTemplate, TemplateVars};
pub use watch::{run_watch_loop, CancelHandle, FileChange, WatchError, COALESCE_WINDOW_MS};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codes;
use crate::config::BuildConfig;
use crate::error::{BuildError, ConfigError};

/// A non-fatal diagnostic. The build still succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Modules forming a static import cycle, as root-relative paths.
    Cycle { modules: Vec<String> },
    /// A script asset larger than the production budget.
    SizeBudget { asset: String, size: u64, limit: u64 },
}

impl Warning {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cycle { .. } => codes::BUNDLE_CYCLE_WARNING,
            Self::SizeBudget { .. } => codes::BUNDLE_SIZE_BUDGET_WARNING,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle { modules } => write!(f, "import cycle: {}", modules.join(" -> ")),
            Self::SizeBudget { asset, size, limit } => {
                write!(f, "asset {asset} is {size} bytes, over the {limit} byte budget")
            }
        }
    }
}

/// `path` relative to `root` with `/` separators, or the full path when it
/// lies outside `root`.
pub(crate) fn display_path(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().replace('\\', "/"),
    }
}

/// One emitted chunk in a [`BuildReport`].
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    pub file: String,
    pub size: usize,
    pub hash: String,
    pub modules: usize,
}

/// Summary of a successful build.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub ok: bool,
    pub mode: &'static str,
    pub out_dir: String,
    pub chunks: Vec<ChunkReport>,
    pub resources: Vec<String>,
    pub html: String,
    pub warnings: Vec<Warning>,
    /// Modules in the graph.
    pub modules: usize,
    /// Modules transformed in this pass, root-relative.
    pub transformed: Vec<String>,
    /// Modules taken from the transform cache.
    pub reused: usize,
    pub duration_ms: u64,
}

/// Resolver, loaders, plugins and caches for one project.
///
/// The transform cache and last graph are only replaced after a build has
/// been published, so a failed or cancelled pass leaves both untouched.
pub struct Pipeline {
    config: BuildConfig,
    resolver: PathResolver,
    loader: LoaderDispatcher,
    plugins: PluginHost,
    templates: ScriptTemplates,
    splitter: ChunkSplitter,
    pool: rayon::ThreadPool,
    cache: TransformCache,
    last_graph: Option<ModuleGraph>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("root", &self.config.root)
            .field("mode", &self.config.mode)
            .field("plugins", &self.plugins.names())
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline with the built-in stages.
    pub fn new(config: BuildConfig) -> Result<Self, ConfigError> {
        Self::with_registry(config, &StageRegistry::with_builtins())
    }

    /// Pipeline whose rules name stages from `registry`.
    pub fn with_registry(mut config: BuildConfig, registry: &StageRegistry) -> Result<Self, ConfigError> {
        if let Ok(root) = dunce::canonicalize(&config.root) {
            config.root = root;
        }

        let loader = LoaderDispatcher::from_config(&config, registry)?;
        let resolver =
            PathResolver::from_config(&config.root, &config.resolve.alias, &config.resolve.extensions)
                .recognize(loader.extensions());
        let templates = ScriptTemplates::from_config(&config)?;
        let splitter = ChunkSplitter::new(SplitOptions {
            min_chunks: config.optimization.split_chunks.min_chunks,
            runtime_chunk: config.optimization.runtime_chunk,
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|i| format!("shipyard-worker-{i}"))
            .build()
            .map_err(|e| ConfigError::WorkerPool(e.to_string()))?;

        let mut plugins = PluginHost::new(PluginContext {
            root: config.root.clone(),
            mode: config.mode,
            public_path: config.output.public_path.clone(),
        });
        plugins.add(Box::new(HtmlPlugin::new(config.html.title.clone())));
        plugins.add(Box::new(DefinePlugin));

        debug!(
            root = %config.root.display(),
            mode = config.mode.as_str(),
            threads = pool.current_num_threads(),
            "pipeline ready"
        );

        Ok(Self {
            config,
            resolver,
            loader,
            plugins,
            templates,
            splitter,
            pool,
            cache: TransformCache::default(),
            last_graph: None,
        })
    }

    /// Add a plugin. Hooks run after the built-in HTML and define plugins.
    pub fn plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.add(plugin);
        self
    }

    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Graph of the last published build.
    #[must_use]
    pub fn graph(&self) -> Option<&ModuleGraph> {
        self.last_graph.as_ref()
    }

    /// Full build from scratch.
    pub fn build(&mut self) -> Result<BuildReport, BuildError> {
        self.build_with_cancel(&CancelHandle::default())
    }

    pub fn build_with_cancel(&mut self, cancel: &CancelHandle) -> Result<BuildReport, BuildError> {
        self.cache.clear();
        self.resolver.clear_cache();
        self.run(cancel)
    }

    /// Incremental build after `changed` files were modified, added or removed.
    pub fn rebuild(&mut self, changed: &[PathBuf]) -> Result<BuildReport, BuildError> {
        self.rebuild_with_cancel(changed, &CancelHandle::default())
    }

    /// Drops the cached transforms of `changed` and every module that
    /// transitively imports one of them, then runs a build.
    pub fn rebuild_with_cancel(
        &mut self,
        changed: &[PathBuf],
        cancel: &CancelHandle,
    ) -> Result<BuildReport, BuildError> {
        match &self.last_graph {
            Some(graph) => {
                let seeds: Vec<ModuleId> = changed
                    .iter()
                    .map(|p| dunce::canonicalize(p).unwrap_or_else(|_| p.clone()))
                    .filter_map(|p| graph.id_of(&p))
                    .collect();
                let stale = graph.importers_closure(seeds);
                for module in stale.iter().filter_map(|&id| graph.get(id)) {
                    self.cache.remove(&module.path);
                }
                debug!(changed = changed.len(), invalidated = stale.len(), "invalidated modules");
            }
            None => self.cache.clear(),
        }
        self.resolver.clear_cache();
        self.run(cancel)
    }

    fn run(&mut self, cancel: &CancelHandle) -> Result<BuildReport, BuildError> {
        let started = Instant::now();

        let GraphBuild {
            graph,
            mut warnings,
            fresh,
            transformed,
            reused,
        } = ModuleGraphBuilder::new(&self.resolver, &self.loader, &self.cache, &self.pool)
            .with_cancel(cancel)
            .build(&self.config.entry)?;

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let chunks = self.splitter.split(&graph)?;
        let mut chunks = self.plugins.before_emit(&graph, chunks)?;

        let emitter = AssetEmitter::new(&self.config, &self.templates, &self.plugins);
        let rendered = emitter.render(&graph, &mut chunks)?;

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let out_dir = emitter.publish(&rendered)?;

        warnings.extend(rendered.warnings.iter().cloned());
        for warning in &warnings {
            warn!(code = warning.code(), "{warning}");
        }

        let root = &self.config.root;
        let report = BuildReport {
            ok: true,
            mode: self.config.mode.as_str(),
            out_dir: out_dir.display().to_string(),
            chunks: chunks
                .chunks()
                .iter()
                .zip(&rendered.chunks)
                .map(|(chunk, asset)| ChunkReport {
                    id: chunk.id,
                    name: chunk.name.clone(),
                    kind: chunk.kind,
                    file: asset.output_path.clone(),
                    size: asset.bytes.len(),
                    hash: asset.content_hash.clone(),
                    modules: chunk.modules.len(),
                })
                .collect(),
            resources: rendered.resources.iter().map(|a| a.output_path.clone()).collect(),
            html: rendered.html.output_path.clone(),
            warnings,
            modules: graph.len(),
            transformed: transformed
                .iter()
                .filter_map(|&id| graph.get(id))
                .map(|m| display_path(root, &m.path))
                .collect(),
            reused,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        // Keep cached transforms only for modules still in the graph.
        let mut cache = TransformCache::default();
        for module in graph.modules() {
            let entry = fresh.get(&module.path).or_else(|| self.cache.get(&module.path));
            if let Some(cached) = entry {
                cache.insert(module.path.clone(), Arc::clone(cached));
            }
        }
        self.cache = cache;
        self.last_graph = Some(graph);

        info!(
            chunks = report.chunks.len(),
            modules = report.modules,
            transformed = report.transformed.len(),
            reused = report.reused,
            duration_ms = report.duration_ms,
            "build complete"
        );
        Ok(report)
    }
}
