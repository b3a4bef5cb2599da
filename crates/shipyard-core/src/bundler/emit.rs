//! Chunk serialization and output publication.
//!
//! Every chunk file pushes `[chunkId, { moduleId: factory, ... }]` onto a
//! global queue; the runtime glue drains that queue, so chunk files may load
//! in any order. The entry chunk's item also carries the entry module id and
//! the chunks it needs, and the glue starts it once those are installed.
//!
//! The glue lives in the runtime chunk, or at the top of the entry chunk
//! when runtime extraction is off. It is rendered last because its manifest
//! embeds the URLs of every other chunk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;
use shipyard_util::hash::blake3_bytes;
use tracing::{debug, warn};

use super::chunks::{ChunkGraph, ChunkId, ChunkKind};
use super::esm::lower_module;
use super::graph::{ModuleGraph, ModuleId, ModuleRecord, ENTRY_MODULE};
use super::plugin::{HtmlAsset, PluginHost};
use super::template::{public_url, OutputTemplate, TemplateVars};
use super::{display_path, Warning};
use crate::config::BuildConfig;
use crate::error::{BuildError, ConfigError, EmitError};

/// Global queue shared by chunk files and the runtime glue.
pub const CHUNK_QUEUE: &str = "__shipyard_chunks";

const MANIFEST_PLACEHOLDER: &str = "__SHIPYARD_MANIFEST__";

const RUNTIME_GLUE: &str = r#"(function (global) {
  var manifest = __SHIPYARD_MANIFEST__;
  var factories = {};
  var cache = {};
  var installed = {};
  var waiting = {};
  var resolvers = {};
  var pending = [];

  function require(id) {
    id = String(id);
    if (cache[id]) return cache[id].exports;
    var factory = factories[id];
    if (!factory) throw new Error("shipyard: module " + id + " is not installed");
    var module = (cache[id] = { exports: {} });
    factory.call(module.exports, module, module.exports, require, load);
    return module.exports;
  }

  require.interop = function (exports) {
    return exports && exports.__esModule ? exports["default"] : exports;
  };

  require.reexport = function (target, source) {
    for (var key in source) {
      if (key !== "default" && !Object.prototype.hasOwnProperty.call(target, key)) {
        target[key] = source[key];
      }
    }
  };

  function fetchChunk(chunkId) {
    if (installed[chunkId]) return Promise.resolve();
    if (!waiting[chunkId]) {
      waiting[chunkId] = new Promise(function (resolve, reject) {
        resolvers[chunkId] = resolve;
        var script = document.createElement("script");
        script.src = manifest.urls[chunkId];
        script.onerror = function () {
          delete waiting[chunkId];
          reject(new Error("shipyard: failed to load chunk " + chunkId));
        };
        document.head.appendChild(script);
      });
    }
    return waiting[chunkId];
  }

  function load(id) {
    var chunks = manifest.imports[String(id)] || [];
    return Promise.all(chunks.map(fetchChunk)).then(function () {
      return require(id);
    });
  }

  function flush() {
    for (var i = 0; i < pending.length; i++) {
      var item = pending[i];
      var ready = item[3].every(function (chunkId) {
        return installed[chunkId];
      });
      if (ready) {
        pending.splice(i--, 1);
        require(item[2]);
      }
    }
  }

  function install(item) {
    var modules = item[1];
    for (var id in modules) {
      if (Object.prototype.hasOwnProperty.call(modules, id)) factories[id] = modules[id];
    }
    installed[item[0]] = true;
    if (resolvers[item[0]]) {
      resolvers[item[0]]();
      delete resolvers[item[0]];
    }
    if (item.length > 2) pending.push(item);
    flush();
  }

  var queue = (global.__shipyard_chunks = global.__shipyard_chunks || []);
  queue.forEach(install);
  queue.push = install;
})(typeof self !== "undefined" ? self : this);
"#;

/// Shell used when the project has no HTML template.
pub const DEFAULT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width,initial-scale=1">
    <title><%= title %></title>
  </head>
  <body>
    <div id="app"></div>
  </body>
</html>
"#;

/// A file to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Relative to the output directory, `/`-separated.
    pub output_path: String,
    pub bytes: Vec<u8>,
    pub chunk_id: Option<ChunkId>,
    /// blake3 of `bytes`.
    pub content_hash: String,
}

impl Asset {
    fn new(output_path: String, bytes: Vec<u8>, chunk_id: Option<ChunkId>) -> Self {
        let content_hash = blake3_bytes(&bytes);
        Self {
            output_path,
            bytes,
            chunk_id,
            content_hash,
        }
    }
}

/// Everything one build will publish.
#[derive(Debug, Clone)]
pub struct RenderedBuild {
    /// One per chunk, in chunk id order.
    pub chunks: Vec<Asset>,
    /// Static resources, sorted by path.
    pub resources: Vec<Asset>,
    pub html: Asset,
    pub warnings: Vec<Warning>,
}

impl RenderedBuild {
    /// All files, as `(relative path, bytes)` pairs.
    #[must_use]
    pub fn files(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.chunks
            .iter()
            .chain(&self.resources)
            .chain(std::iter::once(&self.html))
            .map(|a| (PathBuf::from(&a.output_path), a.bytes.clone()))
            .collect()
    }
}

/// Script path templates for a build.
#[derive(Debug, Clone)]
pub struct ScriptTemplates {
    /// Chunks loaded by the HTML shell.
    pub initial: OutputTemplate,
    /// Chunks loaded on demand.
    pub on_demand: OutputTemplate,
}

impl ScriptTemplates {
    pub fn from_config(config: &BuildConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            initial: OutputTemplate::parse(config.output.filename_for(config.mode))?,
            on_demand: OutputTemplate::parse(config.output.chunk_filename_for(config.mode))?,
        })
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    urls: BTreeMap<ChunkId, String>,
    imports: &'a BTreeMap<ModuleId, Vec<ChunkId>>,
}

/// Serializes chunks, renders the HTML shell and publishes the result.
pub struct AssetEmitter<'a> {
    config: &'a BuildConfig,
    templates: &'a ScriptTemplates,
    plugins: &'a PluginHost,
}

impl<'a> AssetEmitter<'a> {
    #[must_use]
    pub fn new(config: &'a BuildConfig, templates: &'a ScriptTemplates, plugins: &'a PluginHost) -> Self {
        Self {
            config,
            templates,
            plugins,
        }
    }

    /// Produce every output file in memory. Sets each chunk's content hash.
    pub fn render(&self, graph: &ModuleGraph, chunks: &mut ChunkGraph) -> Result<RenderedBuild, BuildError> {
        let public_path = self.config.output.public_path.as_str();
        let initial: Vec<ChunkId> = chunks.initial();
        let glue_holder = chunks
            .runtime()
            .or_else(|| chunks.entry())
            .map(|c| c.id);
        let plan = chunks.async_plan();

        let count = chunks.chunks().len();
        let order: Vec<ChunkId> = (0..count)
            .filter(|&id| Some(id) != glue_holder)
            .chain(glue_holder)
            .collect();

        let mut rendered: Vec<Option<Asset>> = vec![None; count];
        let mut warnings = Vec::new();

        for id in order {
            let Some(chunk) = chunks.get(id) else { continue };
            let mut body = String::new();

            if Some(id) == glue_holder {
                let urls = rendered
                    .iter()
                    .flatten()
                    .filter_map(|asset| {
                        asset
                            .chunk_id
                            .map(|cid| (cid, public_url(public_path, &asset.output_path)))
                    })
                    .collect();
                let manifest = serde_json::to_string(&Manifest {
                    urls,
                    imports: &plan,
                })
                .unwrap_or_else(|_| "{}".to_string());
                body.push_str(&RUNTIME_GLUE.replace(MANIFEST_PLACEHOLDER, &manifest));
            }

            if chunk.kind != ChunkKind::Runtime {
                body.push_str(&format!(
                    "(self.{CHUNK_QUEUE} = self.{CHUNK_QUEUE} || []).push([{id}, {{\n"
                ));
                for module in chunk.modules.iter().filter_map(|&m| graph.get(m)) {
                    body.push_str(&self.serialize_module(module));
                }
                body.push('}');
                if chunk.kind == ChunkKind::Entry {
                    let requires = chunk
                        .requires
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    let start = chunk.root.unwrap_or(ENTRY_MODULE);
                    body.push_str(&format!(", \"{start}\", [{requires}]"));
                }
                body.push_str("]);\n");
            }

            let content = self.plugins.define_substitute(&body, &self.config.define)?;
            let hash = blake3_bytes(content.as_bytes());
            let template = if initial.contains(&id) {
                &self.templates.initial
            } else {
                &self.templates.on_demand
            };
            let output_path = template.render(&TemplateVars {
                name: &chunk.name,
                id,
                ext: ".js",
                hash: &hash,
            });

            if self.config.mode.is_production() {
                let size = content.len() as u64;
                let limit = self.config.performance.max_asset_size;
                if size > limit {
                    let warning = Warning::SizeBudget {
                        asset: output_path.clone(),
                        size,
                        limit,
                    };
                    warn!(asset = %output_path, size, limit, "asset exceeds size budget");
                    warnings.push(warning);
                }
            }

            debug!(chunk = %chunk.name, path = %output_path, bytes = content.len(), "rendered chunk");
            rendered[id] = Some(Asset::new(output_path, content.into_bytes(), Some(id)));
        }

        let chunk_assets: Vec<Asset> = rendered.into_iter().flatten().collect();
        for (chunk, asset) in chunks.chunks_mut().iter_mut().zip(&chunk_assets) {
            chunk.content_hash = Some(asset.content_hash.clone());
        }

        let resources = collect_resources(graph);
        let html = self.render_html(chunks, &chunk_assets, &initial)?;

        check_unique_paths(&chunk_assets, &resources, &html)?;

        Ok(RenderedBuild {
            chunks: chunk_assets,
            resources,
            html,
            warnings,
        })
    }

    /// Replace the output directory with `build`'s files.
    ///
    /// Files are staged next to the destination and swapped in only when all
    /// of them were written; on failure the previous output stays in place.
    pub fn publish(&self, build: &RenderedBuild) -> Result<PathBuf, EmitError> {
        let dest = self.config.out_dir();
        shipyard_util::fs::publish_dir(&dest, &build.files()).map_err(|source| EmitError {
            dest: dest.clone(),
            source,
        })?;
        Ok(dest)
    }

    fn serialize_module(&self, module: &ModuleRecord) -> String {
        let body = lower_module(&module.content, &module.dependencies);
        format!(
            "\"{id}\": function (module, exports, require, load) {{\n/* {path} */\n{body}\n}},\n",
            id = module.id,
            path = display_path(&self.config.root, &module.path),
        )
    }

    fn render_html(
        &self,
        chunks: &ChunkGraph,
        chunk_assets: &[Asset],
        initial: &[ChunkId],
    ) -> Result<Asset, BuildError> {
        let template_path = self.config.root.join(&self.config.html.template);
        let template = if template_path.is_file() {
            std::fs::read_to_string(&template_path).map_err(|source| EmitError {
                dest: template_path.clone(),
                source,
            })?
        } else {
            DEFAULT_HTML_TEMPLATE.to_string()
        };

        let public_path = self.config.output.public_path.as_str();
        let to_html = |id: ChunkId, is_initial: bool| -> Option<HtmlAsset> {
            let chunk = chunks.get(id)?;
            let asset = chunk_assets.iter().find(|a| a.chunk_id == Some(id))?;
            Some(HtmlAsset {
                name: chunk.name.clone(),
                kind: chunk.kind,
                url: public_url(public_path, &asset.output_path),
                initial: is_initial,
            })
        };

        let initial_set: BTreeSet<ChunkId> = initial.iter().copied().collect();
        let assets: Vec<HtmlAsset> = initial
            .iter()
            .filter_map(|&id| to_html(id, true))
            .chain(
                chunks
                    .chunks()
                    .iter()
                    .filter(|c| !initial_set.contains(&c.id))
                    .filter_map(|c| to_html(c.id, false)),
            )
            .collect();

        let html = self.plugins.html_generate(&template, &assets)?;
        Ok(Asset::new(self.config.html.filename.clone(), html.into_bytes(), None))
    }
}

/// Resources referenced by the graph, deduplicated by output path.
fn collect_resources(graph: &ModuleGraph) -> Vec<Asset> {
    let mut by_path: BTreeMap<&str, &[u8]> = BTreeMap::new();
    for resource in graph.modules().iter().filter_map(|m| m.resource.as_ref()) {
        by_path.insert(resource.output_path.as_str(), &resource.bytes);
    }
    by_path
        .into_iter()
        .map(|(path, bytes)| Asset::new(path.to_string(), bytes.to_vec(), None))
        .collect()
}

fn check_unique_paths(chunks: &[Asset], resources: &[Asset], html: &Asset) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for asset in chunks.iter().chain(resources).chain(std::iter::once(html)) {
        if !seen.insert(asset.output_path.as_str()) {
            return Err(ConfigError::Template {
                template: asset.output_path.clone(),
                message: "two outputs render to the same path".to_string(),
            });
        }
    }
    Ok(())
}
