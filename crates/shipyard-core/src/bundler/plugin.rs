//! Plugin hooks.
//!
//! Plugins run strictly in the order they were added. For each hook, the
//! output of one plugin is the input of the next; returning `None` passes the
//! value through unchanged. The first failing hook aborts the build.
//!
//! ## Example
//!
//! ```ignore
//! use shipyard_core::bundler::{HookResult, Plugin, PluginContext};
//!
//! struct Banner;
//!
//! impl Plugin for Banner {
//!     fn name(&self) -> &str { "banner" }
//!
//!     fn define_substitute(
//!         &self,
//!         content: &str,
//!         _definitions: &Definitions,
//!         _ctx: &PluginContext,
//!     ) -> HookResult<Option<String>> {
//!         Ok(Some(format!("/* built with shipyard */\n{content}")))
//!     }
//! }
//! ```

#![allow(clippy::unnecessary_literal_bound)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use super::chunks::{Chunk, ChunkGraph, ChunkKind};
use super::graph::ModuleGraph;
use crate::config::Mode;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Global constant table: source text to find, source text to insert.
pub type Definitions = BTreeMap<String, String>;

pub const HOOK_BEFORE_EMIT: &str = "before_emit";
pub const HOOK_HTML_GENERATE: &str = "html_generate";
pub const HOOK_DEFINE_SUBSTITUTE: &str = "define_substitute";

/// Error from a plugin hook. The host fills in `plugin` and `hook`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{plugin}] {hook}: {message}")]
pub struct PluginError {
    pub plugin: String,
    pub hook: &'static str,
    pub message: String,
}

impl PluginError {
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            plugin: String::new(),
            hook: "",
            message: message.into(),
        }
    }
}

/// Context passed to plugin hooks.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    pub root: PathBuf,
    pub mode: Mode,
    pub public_path: String,
}

/// An emitted chunk as the HTML shell sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlAsset {
    pub name: String,
    pub kind: ChunkKind,
    pub url: String,
    /// Loaded by the shell at startup rather than on demand.
    pub initial: bool,
}

pub trait Plugin: Send + Sync {
    /// Plugin name for error messages.
    fn name(&self) -> &str;

    /// Rewrite the chunk set before emission. The result must still give
    /// every module exactly one owner.
    fn before_emit(&self, _chunks: &[Chunk], _ctx: &PluginContext) -> HookResult<Option<Vec<Chunk>>> {
        Ok(None)
    }

    /// Produce the HTML shell. `assets` lists initial chunks in load order,
    /// followed by on-demand chunks.
    fn html_generate(
        &self,
        _html: &str,
        _assets: &[HtmlAsset],
        _ctx: &PluginContext,
    ) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Rewrite final chunk bytes, before hashing.
    fn define_substitute(
        &self,
        _content: &str,
        _definitions: &Definitions,
        _ctx: &PluginContext,
    ) -> HookResult<Option<String>> {
        Ok(None)
    }
}

/// Ordered plugin list.
pub struct PluginHost {
    plugins: Vec<Box<dyn Plugin>>,
    ctx: PluginContext,
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("PluginHost")
            .field("plugins", &names)
            .field("ctx", &self.ctx)
            .finish()
    }
}

fn attribute<'p>(
    plugin: &'p dyn Plugin,
    hook: &'static str,
) -> impl FnOnce(PluginError) -> PluginError + 'p {
    move |mut err| {
        err.plugin = plugin.name().to_string();
        err.hook = hook;
        err
    }
}

impl PluginHost {
    #[must_use]
    pub fn new(ctx: PluginContext) -> Self {
        Self {
            plugins: Vec::new(),
            ctx,
        }
    }

    /// Append a plugin; it runs after every plugin added before it.
    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run every `before_emit` hook, validating each rewritten set.
    pub fn before_emit(&self, graph: &ModuleGraph, chunks: ChunkGraph) -> HookResult<ChunkGraph> {
        let mut current = chunks;
        for plugin in &self.plugins {
            let on_err = attribute(plugin.as_ref(), HOOK_BEFORE_EMIT);
            if let Some(rewritten) = plugin
                .before_emit(current.chunks(), &self.ctx)
                .map_err(attribute(plugin.as_ref(), HOOK_BEFORE_EMIT))?
            {
                current = ChunkGraph::from_chunks(graph, rewritten)
                    .map_err(|violation| on_err(PluginError::msg(violation.0)))?;
            }
        }
        Ok(current)
    }

    pub fn html_generate(&self, template: &str, assets: &[HtmlAsset]) -> HookResult<String> {
        let mut current = template.to_string();
        for plugin in &self.plugins {
            if let Some(html) = plugin
                .html_generate(&current, assets, &self.ctx)
                .map_err(attribute(plugin.as_ref(), HOOK_HTML_GENERATE))?
            {
                current = html;
            }
        }
        Ok(current)
    }

    pub fn define_substitute(&self, content: &str, definitions: &Definitions) -> HookResult<String> {
        let mut current: Option<String> = None;
        for plugin in &self.plugins {
            let input = current.as_deref().unwrap_or(content);
            if let Some(rewritten) = plugin
                .define_substitute(input, definitions, &self.ctx)
                .map_err(attribute(plugin.as_ref(), HOOK_DEFINE_SUBSTITUTE))?
            {
                current = Some(rewritten);
            }
        }
        Ok(current.unwrap_or_else(|| content.to_string()))
    }
}

/// Fills the HTML template and injects chunk references.
///
/// Initial chunks become deferred `<script>` tags in load order; on-demand
/// chunks become `<link rel="prefetch">`. Both go before `</head>`.
#[derive(Debug, Clone)]
pub struct HtmlPlugin {
    title: String,
}

impl HtmlPlugin {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        "html"
    }

    fn html_generate(
        &self,
        html: &str,
        assets: &[HtmlAsset],
        ctx: &PluginContext,
    ) -> HookResult<Option<String>> {
        let title = escape_html(&self.title);
        let mut out = html
            .replace("<%= htmlWebpackPlugin.options.title %>", &title)
            .replace("<%= title %>", &title)
            .replace("<%= BASE_URL %>", &ctx.public_path);

        let mut tags = String::new();
        for asset in assets.iter().filter(|a| a.initial) {
            tags.push_str(&format!(
                "<script defer src=\"{}\"></script>",
                escape_html(&asset.url)
            ));
        }
        for asset in assets.iter().filter(|a| !a.initial) {
            tags.push_str(&format!(
                "<link rel=\"prefetch\" href=\"{}\">",
                escape_html(&asset.url)
            ));
        }

        match out.find("</head>") {
            Some(at) => out.insert_str(at, &tags),
            None => out.insert_str(0, &tags),
        }
        Ok(Some(out))
    }
}

/// Replaces global constants in chunk bytes.
///
/// A key matches only as a whole dotted identifier path, outside string
/// literals and comments. Longer keys win over their prefixes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinePlugin;

impl Plugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    fn define_substitute(
        &self,
        content: &str,
        definitions: &Definitions,
        _ctx: &PluginContext,
    ) -> HookResult<Option<String>> {
        if definitions.is_empty() {
            return Ok(None);
        }
        Ok(Some(substitute_definitions(content, definitions)))
    }
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn substitute_definitions(content: &str, definitions: &Definitions) -> String {
    let mut keys: Vec<(&str, &str)> = definitions
        .iter()
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

    let mut out = String::with_capacity(content.len());
    let mut prev: Option<char> = None;
    let mut rest = content;

    while let Some(c) = rest.chars().next() {
        if matches!(c, '"' | '\'' | '`') {
            let len = literal_len(rest, c);
            out.push_str(&rest[..len]);
            prev = rest[..len].chars().last();
            rest = &rest[len..];
            continue;
        }
        if rest.starts_with("//") || rest.starts_with("/*") {
            let len = comment_len(rest);
            out.push_str(&rest[..len]);
            prev = None;
            rest = &rest[len..];
            continue;
        }

        let boundary_before = prev.map_or(true, |p| !is_ident(p) && p != '.');
        let hit = if boundary_before {
            keys.iter().find(|(key, _)| {
                rest.starts_with(key)
                    && !rest[key.len()..].chars().next().is_some_and(is_ident)
            })
        } else {
            None
        };

        match hit {
            Some((key, value)) => {
                out.push_str(value);
                prev = value.chars().last();
                rest = &rest[key.len()..];
            }
            None => {
                out.push(c);
                prev = Some(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

/// Byte length of the string literal at the start of `s`, quotes included.
fn literal_len(s: &str, quote: char) -> usize {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote || (c == '\n' && quote != '`') {
            return i + c.len_utf8();
        }
    }
    s.len()
}

/// Byte length of the comment at the start of `s`.
fn comment_len(s: &str) -> usize {
    if s.starts_with("//") {
        s.find('\n').unwrap_or(s.len())
    } else {
        s[2..].find("*/").map_or(s.len(), |end| end + 4)
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::chunks::ChunkSplitter;
    use crate::bundler::graph::{Dependency, ModuleRecord};

    struct Append(&'static str);

    impl Plugin for Append {
        fn name(&self) -> &str {
            self.0
        }

        fn define_substitute(
            &self,
            content: &str,
            _definitions: &Definitions,
            _ctx: &PluginContext,
        ) -> HookResult<Option<String>> {
            Ok(Some(format!("{content}{}", self.0)))
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn html_generate(
            &self,
            _html: &str,
            _assets: &[HtmlAsset],
            _ctx: &PluginContext,
        ) -> HookResult<Option<String>> {
            Err(PluginError::msg("template variable missing"))
        }
    }

    /// Moves every module into the entry chunk, leaving duplicates behind.
    struct Duplicate;

    impl Plugin for Duplicate {
        fn name(&self) -> &str {
            "duplicate"
        }

        fn before_emit(&self, chunks: &[Chunk], _ctx: &PluginContext) -> HookResult<Option<Vec<Chunk>>> {
            let mut chunks = chunks.to_vec();
            let all: Vec<usize> = chunks.iter().flat_map(|c| c.modules.iter().copied()).collect();
            chunks[0].modules.extend(all);
            Ok(Some(chunks))
        }
    }

    fn two_chunk_graph() -> ModuleGraph {
        let mut graph = ModuleGraph::default();
        graph.push(ModuleRecord {
            id: 0,
            path: PathBuf::from("/app/src/main.js"),
            content_hash: String::new(),
            dependencies: vec![Dependency {
                specifier: "./Page".to_string(),
                target: 1,
                dynamic: true,
            }],
            content: String::new(),
            source_map: None,
            resource: None,
        });
        graph.push(ModuleRecord {
            id: 1,
            path: PathBuf::from("/app/src/Page.js"),
            content_hash: String::new(),
            dependencies: vec![],
            content: String::new(),
            source_map: None,
            resource: None,
        });
        graph
    }

    #[test]
    fn test_hooks_run_in_declaration_order() {
        let mut host = PluginHost::new(PluginContext::default());
        host.add(Box::new(Append("a")));
        host.add(Box::new(Append("b")));
        host.add(Box::new(Append("c")));

        let out = host.define_substitute("x", &Definitions::new()).unwrap();
        assert_eq!(out, "xabc");
    }

    #[test]
    fn test_failing_hook_names_plugin_and_hook() {
        let mut host = PluginHost::new(PluginContext::default());
        host.add(Box::new(HtmlPlugin::new("t")));
        host.add(Box::new(Broken));

        let err = host.html_generate("<html></html>", &[]).unwrap_err();
        assert_eq!(err.plugin, "broken");
        assert_eq!(err.hook, HOOK_HTML_GENERATE);
        assert_eq!(err.to_string(), "[broken] html_generate: template variable missing");
    }

    #[test]
    fn test_before_emit_rewrite_is_validated() {
        let graph = two_chunk_graph();
        let chunks = ChunkSplitter::default().split(&graph).unwrap();

        let mut host = PluginHost::new(PluginContext::default());
        host.add(Box::new(Duplicate));
        let err = host.before_emit(&graph, chunks).unwrap_err();
        assert_eq!(err.plugin, "duplicate");
        assert_eq!(err.hook, HOOK_BEFORE_EMIT);
        assert!(err.message.contains("owned by both"));
    }

    #[test]
    fn test_before_emit_passthrough() {
        let graph = two_chunk_graph();
        let chunks = ChunkSplitter::default().split(&graph).unwrap();
        let host = PluginHost::new(PluginContext::default());
        assert_eq!(host.before_emit(&graph, chunks.clone()).unwrap(), chunks);
    }

    #[test]
    fn test_html_plugin_injects_in_load_order() {
        let ctx = PluginContext {
            public_path: "/".to_string(),
            ..PluginContext::default()
        };
        let assets = vec![
            HtmlAsset {
                name: "runtime".to_string(),
                kind: ChunkKind::Runtime,
                url: "/js/runtime.js".to_string(),
                initial: true,
            },
            HtmlAsset {
                name: "main".to_string(),
                kind: ChunkKind::Entry,
                url: "/js/main.js".to_string(),
                initial: true,
            },
            HtmlAsset {
                name: "Page".to_string(),
                kind: ChunkKind::Async,
                url: "/js/Page.chunk.js".to_string(),
                initial: false,
            },
        ];
        let template = "<html><head><title><%= title %></title>\
                        <link rel=\"icon\" href=\"<%= BASE_URL %>favicon.ico\"></head><body></body></html>";

        let html = HtmlPlugin::new("Vue 2 <Dashboard>")
            .html_generate(template, &assets, &ctx)
            .unwrap()
            .unwrap();

        assert!(html.contains("<title>Vue 2 &lt;Dashboard&gt;</title>"));
        assert!(html.contains("href=\"/favicon.ico\""));
        let runtime = html.find("/js/runtime.js").unwrap();
        let main = html.find("/js/main.js").unwrap();
        let prefetch = html.find("<link rel=\"prefetch\" href=\"/js/Page.chunk.js\">").unwrap();
        assert!(runtime < main && main < prefetch);
        assert!(prefetch < html.find("</head>").unwrap());
    }

    #[test]
    fn test_define_substitution_boundaries() {
        let mut defs = Definitions::new();
        defs.insert("process.env.BASE_URL".to_string(), "\"/app/\"".to_string());
        defs.insert("process.env".to_string(), "({})".to_string());
        defs.insert("__DEV__".to_string(), "false".to_string());

        let source = "var a = process.env.BASE_URL;\n\
                      var b = process.env.BASE_URL_EXTRA;\n\
                      var c = window.process.env.BASE_URL;\n\
                      var d = '__DEV__ in a string';\n\
                      // __DEV__ in a comment\n\
                      if (__DEV__) {}\n";
        let out = DefinePlugin
            .define_substitute(source, &defs, &PluginContext::default())
            .unwrap()
            .unwrap();

        assert!(out.contains("var a = \"/app/\";"));
        assert!(out.contains("var b = ({}).BASE_URL_EXTRA;"));
        assert!(out.contains("var c = window.process.env.BASE_URL;"));
        assert!(out.contains("'__DEV__ in a string'"));
        assert!(out.contains("// __DEV__ in a comment"));
        assert!(out.contains("if (false) {}"));
    }
}
