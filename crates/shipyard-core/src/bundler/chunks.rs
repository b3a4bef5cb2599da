//! Chunk partitioning.
//!
//! Top-level chunks are the entry chunk plus one async chunk per dynamic
//! import target that the entry does not already load statically. Every
//! module is assigned by the exact set of top-level chunks that reach it
//! over static edges:
//!
//! - one chunk: that chunk owns it;
//! - at least `min_chunks` chunks: a shared chunk keyed by that set owns it;
//! - otherwise: the first chunk of the set (entry first) owns it.
//!
//! Each module therefore has exactly one owner. The optional runtime chunk
//! never owns modules.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet as HashSet;
use serde::Serialize;

use super::graph::{ModuleGraph, ModuleId, ENTRY_MODULE};

/// Unique identifier for a chunk; dense, in emission order.
pub type ChunkId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Entry,
    Async,
    Shared,
    Runtime,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Async => "async",
            Self::Shared => "shared",
            Self::Runtime => "runtime",
        }
    }
}

/// A group of modules loaded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    /// Module that starts the chunk (entry and async chunks).
    pub root: Option<ModuleId>,
    /// Owned modules; iteration order is serialization order.
    pub modules: BTreeSet<ModuleId>,
    /// Chunks that must be loaded before this one runs (top-level chunks).
    pub requires: Vec<ChunkId>,
    /// Top-level chunks this shared chunk serves.
    pub shared_by: Vec<ChunkId>,
    /// Set by the emitter from the final bytes.
    pub content_hash: Option<String>,
}

impl Chunk {
    fn new(name: String, kind: ChunkKind, root: Option<ModuleId>) -> Self {
        Self {
            id: 0,
            name,
            kind,
            root,
            modules: BTreeSet::new(),
            requires: Vec::new(),
            shared_by: Vec::new(),
            content_hash: None,
        }
    }
}

/// Partitioning policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOptions {
    /// Sharing threshold; values below 2 behave as 2.
    pub min_chunks: usize,
    /// Emit a dedicated runtime chunk.
    pub runtime_chunk: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            min_chunks: 2,
            runtime_chunk: true,
        }
    }
}

/// A chunk set violating the single-ownership rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSetViolation(pub String);

impl std::fmt::Display for ChunkSetViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ChunkSetViolation {}

/// A validated chunk set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    /// Owner of each module, indexed by module id.
    owners: Vec<ChunkId>,
}

impl ChunkGraph {
    /// Validate a chunk set against `graph`.
    ///
    /// Requires dense ids matching positions, exactly one entry chunk, at
    /// most one runtime chunk and no modules in it, and every graph module
    /// owned by exactly one other chunk.
    pub fn from_chunks(graph: &ModuleGraph, chunks: Vec<Chunk>) -> Result<Self, ChunkSetViolation> {
        let violation = |message: String| Err(ChunkSetViolation(message));

        let mut owners: Vec<Option<ChunkId>> = vec![None; graph.len()];
        let mut entries = 0;
        let mut runtimes = 0;

        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.id != position {
                return violation(format!(
                    "chunk '{}' has id {} at position {position}",
                    chunk.name, chunk.id
                ));
            }
            if let Some(&bad) = chunk.requires.iter().find(|&&r| r >= chunks.len()) {
                return violation(format!("chunk '{}' requires unknown chunk {bad}", chunk.name));
            }
            match chunk.kind {
                ChunkKind::Entry => entries += 1,
                ChunkKind::Runtime => {
                    runtimes += 1;
                    if !chunk.modules.is_empty() {
                        return violation(format!(
                            "runtime chunk '{}' contains application modules",
                            chunk.name
                        ));
                    }
                }
                ChunkKind::Async | ChunkKind::Shared => {}
            }
            for &module in &chunk.modules {
                let Some(slot) = owners.get_mut(module) else {
                    return violation(format!(
                        "chunk '{}' contains unknown module {module}",
                        chunk.name
                    ));
                };
                if let Some(previous) = slot.replace(chunk.id) {
                    return violation(format!(
                        "module {module} is owned by both '{}' and '{}'",
                        chunks[previous].name, chunk.name
                    ));
                }
            }
        }

        if entries != 1 {
            return violation(format!("expected exactly one entry chunk, found {entries}"));
        }
        if runtimes > 1 {
            return violation(format!("expected at most one runtime chunk, found {runtimes}"));
        }

        let owners = owners
            .into_iter()
            .enumerate()
            .map(|(module, owner)| {
                owner.ok_or_else(|| ChunkSetViolation(format!("module {module} has no chunk")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { chunks, owners })
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    #[must_use]
    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    #[must_use]
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    #[must_use]
    pub fn owner_of(&self, module: ModuleId) -> Option<ChunkId> {
        self.owners.get(module).copied()
    }

    #[must_use]
    pub fn entry(&self) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.kind == ChunkKind::Entry)
    }

    #[must_use]
    pub fn runtime(&self) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.kind == ChunkKind::Runtime)
    }

    /// Chunks loaded by the HTML shell, in load order: runtime, the entry's
    /// prerequisites, then the entry.
    #[must_use]
    pub fn initial(&self) -> Vec<ChunkId> {
        let mut order = Vec::new();
        if let Some(runtime) = self.runtime() {
            order.push(runtime.id);
        }
        if let Some(entry) = self.entry() {
            for &id in &entry.requires {
                if !order.contains(&id) {
                    order.push(id);
                }
            }
            order.push(entry.id);
        }
        order
    }

    /// For each async root module, the chunks to fetch before requiring it.
    #[must_use]
    pub fn async_plan(&self) -> BTreeMap<ModuleId, Vec<ChunkId>> {
        self.chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Async)
            .filter_map(|c| {
                let mut load = c.requires.clone();
                load.push(c.id);
                c.root.map(|root| (root, load))
            })
            .collect()
    }
}

/// Partitions a module graph into chunks.
#[derive(Debug, Clone, Default)]
pub struct ChunkSplitter {
    options: SplitOptions,
}

impl ChunkSplitter {
    #[must_use]
    pub fn new(options: SplitOptions) -> Self {
        Self { options }
    }

    /// Partition `graph`. The result depends only on the graph.
    pub fn split(&self, graph: &ModuleGraph) -> Result<ChunkGraph, ChunkSetViolation> {
        let threshold = self.options.min_chunks.max(2);

        let entry_reach = graph.static_reach(ENTRY_MODULE);
        let mut roots = vec![ENTRY_MODULE];
        roots.extend(
            graph
                .dynamic_targets()
                .into_iter()
                .filter(|m| !entry_reach.contains(m)),
        );

        let mut used_names = HashSet::default();
        let mut top: Vec<Chunk> = roots
            .iter()
            .enumerate()
            .map(|(index, &root)| {
                if index == 0 {
                    Chunk::new(unique_name("main", &mut used_names), ChunkKind::Entry, Some(root))
                } else {
                    let stem = graph
                        .get(root)
                        .and_then(|m| m.path.file_stem())
                        .map_or_else(|| format!("chunk-{root}"), |s| s.to_string_lossy().into_owned());
                    Chunk::new(unique_name(&stem, &mut used_names), ChunkKind::Async, Some(root))
                }
            })
            .collect();

        let reach: Vec<BTreeSet<ModuleId>> = roots
            .iter()
            .enumerate()
            .map(|(index, &root)| {
                if index == 0 {
                    entry_reach.clone()
                } else {
                    graph.static_reach(root)
                }
            })
            .collect();

        // Top-level chunk indices reaching each module, ascending.
        let mut holders: BTreeMap<ModuleId, Vec<usize>> = BTreeMap::new();
        for (index, set) in reach.iter().enumerate() {
            for &module in set {
                holders.entry(module).or_default().push(index);
            }
        }

        let mut groups: BTreeMap<Vec<usize>, BTreeSet<ModuleId>> = BTreeMap::new();
        for (module, holding) in holders {
            if holding.len() >= threshold {
                groups.entry(holding).or_default().insert(module);
            } else {
                top[holding[0]].modules.insert(module);
            }
        }

        // Shared chunks ordered by their smallest module.
        let mut shared: Vec<(Vec<usize>, BTreeSet<ModuleId>)> = groups.into_iter().collect();
        shared.sort_by_key(|(_, modules)| modules.first().copied());

        let top_count = top.len();
        let mut chunks = top;
        for (holding, modules) in shared {
            let base = std::iter::once("shared")
                .chain(holding.iter().map(|&i| chunks[i].name.as_str()))
                .collect::<Vec<_>>()
                .join("~");
            let mut chunk = Chunk::new(unique_name(&base, &mut used_names), ChunkKind::Shared, None);
            chunk.modules = modules;
            chunk.shared_by = holding;
            chunks.push(chunk);
        }
        if self.options.runtime_chunk {
            chunks.push(Chunk::new(
                unique_name("runtime", &mut used_names),
                ChunkKind::Runtime,
                None,
            ));
        }
        for (id, chunk) in chunks.iter_mut().enumerate() {
            chunk.id = id;
        }

        let mut owner: Vec<ChunkId> = vec![0; graph.len()];
        for chunk in &chunks {
            for &module in &chunk.modules {
                owner[module] = chunk.id;
            }
        }
        for (index, set) in reach.iter().enumerate().take(top_count) {
            let required: BTreeSet<ChunkId> = set
                .iter()
                .map(|&m| owner[m])
                .filter(|&c| c != index)
                .collect();
            chunks[index].requires = required.into_iter().collect();
        }

        tracing::debug!(
            chunks = chunks.len(),
            async_chunks = top_count - 1,
            "chunk graph built"
        );
        ChunkGraph::from_chunks(graph, chunks)
    }
}

fn unique_name(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}~{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::{Dependency, ModuleRecord};
    use std::path::PathBuf;

    /// Graph from `(name, [(target, dynamic)])`; ids follow list order.
    fn graph(modules: &[(&str, &[(usize, bool)])]) -> ModuleGraph {
        let mut graph = ModuleGraph::default();
        for (id, (name, deps)) in modules.iter().enumerate() {
            graph.push(ModuleRecord {
                id,
                path: PathBuf::from(format!("/app/src/{name}.js")),
                content_hash: String::new(),
                dependencies: deps
                    .iter()
                    .map(|&(target, dynamic)| Dependency {
                        specifier: format!("./{}", modules[target].0),
                        target,
                        dynamic,
                    })
                    .collect(),
                content: String::new(),
                source_map: None,
                resource: None,
            });
        }
        graph
    }

    fn modules(chunk: &Chunk) -> Vec<ModuleId> {
        chunk.modules.iter().copied().collect()
    }

    #[test]
    fn test_single_entry_with_runtime() {
        let g = graph(&[("main", &[(1, false)]), ("util", &[])]);
        let chunks = ChunkSplitter::default().split(&g).unwrap();

        assert_eq!(chunks.chunks().len(), 2);
        let entry = chunks.entry().unwrap();
        assert_eq!(entry.name, "main");
        assert_eq!(modules(entry), vec![0, 1]);

        let runtime = chunks.runtime().unwrap();
        assert!(runtime.modules.is_empty());
        assert_eq!(runtime.id, 1);
        assert_eq!(chunks.initial(), vec![1, 0]);
    }

    #[test]
    fn test_shared_module_is_hoisted_once() {
        // main -> lazyA (dynamic), main -> lazyB (dynamic), both -> shared util
        let g = graph(&[
            ("main", &[(1, true), (2, true)]),
            ("PageA", &[(3, false)]),
            ("PageB", &[(3, false)]),
            ("util", &[]),
        ]);
        let chunks = ChunkSplitter::default().split(&g).unwrap();

        let names: Vec<&str> = chunks.chunks().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["main", "PageA", "PageB", "shared~PageA~PageB", "runtime"]);

        let shared = chunks.get(3).unwrap();
        assert_eq!(shared.kind, ChunkKind::Shared);
        assert_eq!(modules(shared), vec![3]);
        assert_eq!(shared.shared_by, vec![1, 2]);
        assert_eq!(modules(chunks.get(1).unwrap()), vec![1]);
        assert_eq!(modules(chunks.get(2).unwrap()), vec![2]);
        assert_eq!(chunks.owner_of(3), Some(3));

        let plan = chunks.async_plan();
        assert_eq!(plan[&1], vec![3, 1]);
        assert_eq!(plan[&2], vec![3, 2]);
    }

    #[test]
    fn test_every_module_has_exactly_one_owner() {
        let g = graph(&[
            ("main", &[(1, false), (2, true), (3, true)]),
            ("vendor", &[(4, false)]),
            ("PageA", &[(1, false), (4, false)]),
            ("PageB", &[(4, false), (5, false)]),
            ("helpers", &[]),
            ("chart", &[]),
        ]);
        let chunks = ChunkSplitter::default().split(&g).unwrap();

        let mut seen = vec![0; g.len()];
        for chunk in chunks.chunks() {
            for &m in &chunk.modules {
                seen[m] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1), "{seen:?}");

        // vendor is reached by main and PageA; helpers by all three.
        let vendor = chunks.get(chunks.owner_of(1).unwrap()).unwrap();
        let helpers = chunks.get(chunks.owner_of(4).unwrap()).unwrap();
        assert_eq!(vendor.name, "shared~main~PageA");
        assert_eq!(helpers.name, "shared~main~PageA~PageB");
        assert_eq!(chunks.get(chunks.owner_of(5).unwrap()).unwrap().name, "PageB");

        // The entry needs both shared chunks before it runs.
        let entry = chunks.entry().unwrap();
        assert_eq!(entry.requires, vec![vendor.id, helpers.id]);
        assert_eq!(chunks.initial(), vec![5, vendor.id, helpers.id, 0]);
    }

    #[test]
    fn test_threshold_keeps_module_in_first_holder() {
        let g = graph(&[
            ("main", &[(1, true), (2, true)]),
            ("PageA", &[(3, false)]),
            ("PageB", &[(3, false)]),
            ("util", &[]),
        ]);
        let chunks = ChunkSplitter::new(SplitOptions {
            min_chunks: 3,
            runtime_chunk: true,
        })
        .split(&g)
        .unwrap();

        assert!(chunks.chunks().iter().all(|c| c.kind != ChunkKind::Shared));
        assert_eq!(chunks.owner_of(3), Some(1));
        assert_eq!(chunks.get(2).unwrap().requires, vec![1]);
    }

    #[test]
    fn test_statically_loaded_dynamic_target_stays_in_entry() {
        let g = graph(&[("main", &[(1, false), (1, true)]), ("util", &[])]);
        let chunks = ChunkSplitter::default().split(&g).unwrap();
        assert_eq!(chunks.chunks().len(), 2);
        assert!(chunks.async_plan().is_empty());
    }

    #[test]
    fn test_runtime_chunk_disabled() {
        let g = graph(&[("main", &[])]);
        let chunks = ChunkSplitter::new(SplitOptions {
            min_chunks: 2,
            runtime_chunk: false,
        })
        .split(&g)
        .unwrap();
        assert!(chunks.runtime().is_none());
        assert_eq!(chunks.initial(), vec![0]);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let g = graph(&[
            ("main", &[(1, true), (2, true), (3, false)]),
            ("index", &[(3, false)]),
            ("index", &[(3, false), (4, false)]),
            ("shared", &[]),
            ("leaf", &[]),
        ]);
        let first = ChunkSplitter::default().split(&g).unwrap();
        for _ in 0..10 {
            assert_eq!(ChunkSplitter::default().split(&g).unwrap(), first);
        }
        let names: Vec<&str> = first.chunks().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names[1], "index");
        assert_eq!(names[2], "index~1");
    }

    #[test]
    fn test_validation_rejects_duplicates() {
        let g = graph(&[("main", &[(1, false)]), ("util", &[])]);
        let mut chunks = ChunkSplitter::default().split(&g).unwrap().into_chunks();
        chunks[1].modules.insert(1);
        let err = ChunkGraph::from_chunks(&g, chunks).unwrap_err();
        assert!(err.0.contains("runtime"));

        let mut chunks = ChunkSplitter::default().split(&g).unwrap().into_chunks();
        chunks[0].modules.remove(&1);
        let err = ChunkGraph::from_chunks(&g, chunks).unwrap_err();
        assert!(err.0.contains("module 1 has no chunk"));
    }
}
