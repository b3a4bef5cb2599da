//! Module graph construction.
//!
//! Discovery is breadth-first from the entry. Each BFS level is transformed
//! in parallel on the worker pool; results are then folded in frontier order,
//! so module ids (assigned on first discovery) do not depend on scheduling.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use shipyard_util::hash::blake3_bytes;
use tracing::debug;

use super::loader::{EmittedResource, LoaderDispatcher, LoaderError, TransformOutput};
use super::resolve::{PathResolver, ResolveError};
use super::watch::CancelHandle;
use super::{display_path, Warning};
use crate::error::BuildError;

/// Dense module index; the entry is always 0.
pub type ModuleId = usize;

/// Id of the entry module in every graph.
pub const ENTRY_MODULE: ModuleId = 0;

/// A resolved edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Specifier as written in the importing module.
    pub specifier: String,
    pub target: ModuleId,
    /// Requested through `import()`.
    pub dynamic: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: ModuleId,
    /// Canonical absolute path.
    pub path: PathBuf,
    /// blake3 of the transformed content.
    pub content_hash: String,
    pub dependencies: Vec<Dependency>,
    pub content: String,
    pub source_map: Option<String>,
    pub resource: Option<EmittedResource>,
}

/// All modules reachable from the entry, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: Vec<ModuleRecord>,
    by_path: FxHashMap<PathBuf, ModuleId>,
}

impl ModuleGraph {
    /// Append a record; its id must equal the current length.
    pub(crate) fn push(&mut self, record: ModuleRecord) {
        debug_assert_eq!(record.id, self.modules.len());
        self.by_path.insert(record.path.clone(), record.id);
        self.modules.push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.modules.get(id)
    }

    #[must_use]
    pub fn id_of(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    #[must_use]
    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    /// Modules reachable from `id` over static edges, including `id`.
    #[must_use]
    pub fn static_reach(&self, id: ModuleId) -> BTreeSet<ModuleId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(module) = self.modules.get(current) {
                stack.extend(
                    module
                        .dependencies
                        .iter()
                        .filter(|d| !d.dynamic)
                        .map(|d| d.target),
                );
            }
        }
        seen
    }

    /// Targets of every dynamic edge in the graph.
    #[must_use]
    pub fn dynamic_targets(&self) -> BTreeSet<ModuleId> {
        self.modules
            .iter()
            .flat_map(|m| m.dependencies.iter())
            .filter(|d| d.dynamic)
            .map(|d| d.target)
            .collect()
    }

    /// `seeds` plus every module that imports one of them, transitively.
    #[must_use]
    pub fn importers_closure(&self, seeds: impl IntoIterator<Item = ModuleId>) -> BTreeSet<ModuleId> {
        let mut importers: Vec<Vec<ModuleId>> = vec![Vec::new(); self.modules.len()];
        for module in &self.modules {
            for dep in &module.dependencies {
                importers[dep.target].push(module.id);
            }
        }

        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ModuleId> = seeds.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if id >= importers.len() || !seen.insert(id) {
                continue;
            }
            queue.extend(importers[id].iter().copied());
        }
        seen
    }

    /// Strongly connected components over static edges that form a cycle
    /// (more than one module, or a module importing itself). Each component
    /// is sorted by id.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<ModuleId>> {
        const UNVISITED: usize = usize::MAX;
        let n = self.modules.len();
        let mut index = vec![UNVISITED; n];
        let mut low = vec![0; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<ModuleId> = Vec::new();
        let mut next_index = 0;
        let mut cycles = Vec::new();

        let static_edges = |v: ModuleId| -> Vec<ModuleId> {
            self.modules[v]
                .dependencies
                .iter()
                .filter(|d| !d.dynamic)
                .map(|d| d.target)
                .collect()
        };

        for start in 0..n {
            if index[start] != UNVISITED {
                continue;
            }
            index[start] = next_index;
            low[start] = next_index;
            next_index += 1;
            stack.push(start);
            on_stack[start] = true;
            let mut work: Vec<(ModuleId, Vec<ModuleId>, usize)> =
                vec![(start, static_edges(start), 0)];

            while let Some(frame) = work.last_mut() {
                let v = frame.0;
                let next_edge = frame.1.get(frame.2).copied();
                if let Some(w) = next_edge {
                    frame.2 += 1;
                    if index[w] == UNVISITED {
                        index[w] = next_index;
                        low[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        work.push((w, static_edges(w), 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                    continue;
                }

                let self_loop = frame.1.contains(&v);
                work.pop();
                if let Some(parent) = work.last() {
                    low[parent.0] = low[parent.0].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    if component.len() > 1 || self_loop {
                        component.sort_unstable();
                        cycles.push(component);
                    }
                }
            }
        }

        cycles.sort();
        cycles
    }
}

/// A dependency after resolution, before ids exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    pub specifier: String,
    pub path: PathBuf,
    pub dynamic: bool,
}

/// Transform result for one file, reusable across builds.
#[derive(Debug, Clone)]
pub struct CachedModule {
    pub output: TransformOutput,
    pub imports: Vec<ResolvedImport>,
}

/// Per-path transform cache.
pub type TransformCache = FxHashMap<PathBuf, Arc<CachedModule>>;

/// Output of one discovery pass.
#[derive(Debug)]
pub struct GraphBuild {
    pub graph: ModuleGraph,
    pub warnings: Vec<Warning>,
    /// Entries transformed during this pass; committed by the caller.
    pub fresh: TransformCache,
    /// Ids of modules transformed during this pass.
    pub transformed: Vec<ModuleId>,
    /// Number of modules served from the cache.
    pub reused: usize,
}

/// Discovers and transforms every module reachable from an entry.
pub struct ModuleGraphBuilder<'a> {
    resolver: &'a PathResolver,
    loader: &'a LoaderDispatcher,
    cache: &'a TransformCache,
    pool: &'a rayon::ThreadPool,
    cancel: Option<&'a CancelHandle>,
}

impl<'a> ModuleGraphBuilder<'a> {
    #[must_use]
    pub fn new(
        resolver: &'a PathResolver,
        loader: &'a LoaderDispatcher,
        cache: &'a TransformCache,
        pool: &'a rayon::ThreadPool,
    ) -> Self {
        Self {
            resolver,
            loader,
            cache,
            pool,
            cancel: None,
        }
    }

    /// Stop between BFS levels once `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: &'a CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(&self, entry: &str) -> Result<GraphBuild, BuildError> {
        let entry_path = self.resolver.resolve_entry(entry)?;

        let mut paths: Vec<PathBuf> = vec![entry_path.clone()];
        let mut ids: FxHashMap<PathBuf, ModuleId> = FxHashMap::default();
        ids.insert(entry_path, ENTRY_MODULE);
        let mut done: Vec<Option<Arc<CachedModule>>> = vec![None];
        let mut fresh = TransformCache::default();
        let mut transformed = Vec::new();
        let mut reused = 0;

        let mut frontier = vec![ENTRY_MODULE];
        while !frontier.is_empty() {
            if self.cancel.is_some_and(CancelHandle::is_cancelled) {
                return Err(BuildError::Cancelled);
            }

            let results: Vec<Result<(Arc<CachedModule>, bool), BuildError>> =
                self.pool.install(|| {
                    frontier
                        .par_iter()
                        .map(|&id| self.process(&paths[id]))
                        .collect()
                });

            let mut next = Vec::new();
            for (&id, result) in frontier.iter().zip(results) {
                let (module, is_fresh) = result?;
                for import in &module.imports {
                    if !ids.contains_key(&import.path) {
                        let new_id = paths.len();
                        ids.insert(import.path.clone(), new_id);
                        paths.push(import.path.clone());
                        done.push(None);
                        next.push(new_id);
                    }
                }
                if is_fresh {
                    fresh.insert(paths[id].clone(), Arc::clone(&module));
                    transformed.push(id);
                } else {
                    reused += 1;
                }
                done[id] = Some(module);
            }
            frontier = next;
        }

        let mut graph = ModuleGraph::default();
        for (id, (path, module)) in paths.into_iter().zip(done).enumerate() {
            let Some(module) = module else { continue };
            let dependencies = module
                .imports
                .iter()
                .filter_map(|import| {
                    ids.get(&import.path).map(|&target| Dependency {
                        specifier: import.specifier.clone(),
                        target,
                        dynamic: import.dynamic,
                    })
                })
                .collect();
            graph.push(ModuleRecord {
                id,
                path,
                content_hash: blake3_bytes(module.output.content.as_bytes()),
                dependencies,
                content: module.output.content.clone(),
                source_map: module.output.source_map.clone(),
                resource: module.output.resource.clone(),
            });
        }

        let warnings = graph
            .cycles()
            .into_iter()
            .map(|cycle| Warning::Cycle {
                modules: cycle
                    .iter()
                    .filter_map(|&id| graph.get(id))
                    .map(|m| display_path(self.resolver.root(), &m.path))
                    .collect(),
            })
            .collect();

        transformed.sort_unstable();
        debug!(
            modules = graph.len(),
            transformed = transformed.len(),
            reused,
            "module graph built"
        );

        Ok(GraphBuild {
            graph,
            warnings,
            fresh,
            transformed,
            reused,
        })
    }

    /// Transform one file and resolve its imports, or reuse the cache.
    fn process(&self, path: &Path) -> Result<(Arc<CachedModule>, bool), BuildError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok((Arc::clone(cached), false));
        }

        let raw = std::fs::read(path).map_err(|source| LoaderError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let output = self.loader.transform(path, &raw)?;
        let imports = output
            .imports
            .iter()
            .map(|import| {
                Ok(ResolvedImport {
                    specifier: import.specifier.clone(),
                    path: self.resolver.resolve(&import.specifier, path)?,
                    dynamic: import.kind.is_dynamic(),
                })
            })
            .collect::<Result<Vec<_>, ResolveError>>()?;

        debug!(path = %path.display(), imports = imports.len(), "transformed module");
        Ok((Arc::new(CachedModule { output, imports }), true))
    }
}
