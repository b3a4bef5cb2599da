//! Loader dispatch.
//!
//! A [`LoaderRule`] maps file extensions to either an ordered chain of
//! transform [`Stage`]s or a static resource. For each file the first rule
//! whose extensions match and whose exclusions do not is used; later rules
//! are never consulted.
//!
//! Chains are type-checked when a rule is registered: the first stage must
//! accept every extension of the rule, each following stage must accept what
//! its predecessor emits, and the chain must end in `js`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shipyard_util::hash::blake3_bytes;
use thiserror::Error;

use super::imports::{scan_imports, Import};
use super::stages::StageRegistry;
use super::template::{public_url, OutputTemplate, TemplateVars};
use crate::config::{BuildConfig, RuleKind};
use crate::error::ConfigError;

/// Content type every chain must end in.
pub const SCRIPT_CONTENT: &str = "js";

/// Content type accepted by stages that take anything.
pub const ANY_CONTENT: &str = "*";

/// Failure inside a single stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
}

impl StageError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("No loader rule matches '{}'", .path.display())]
    NoRule { path: PathBuf },

    #[error("Stage '{stage}' failed on '{}': {cause}", .path.display())]
    StageFailed {
        stage: String,
        path: PathBuf,
        #[source]
        cause: StageError,
    },

    #[error("Failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Input handed to a stage.
#[derive(Debug)]
pub struct StageInput<'a> {
    pub path: &'a Path,
    pub content: String,
    pub source_map: Option<String>,
    pub options: &'a serde_json::Value,
}

/// Output of a stage. A stage that does not touch the source map should
/// pass the incoming one through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub content: String,
    pub source_map: Option<String>,
}

impl StageOutput {
    #[must_use]
    pub fn new(content: impl Into<String>, source_map: Option<String>) -> Self {
        Self {
            content: content.into(),
            source_map,
        }
    }
}

/// A single transform step: `(content, source map) -> (content, source map)`.
pub trait Stage: Send + Sync {
    /// Name referenced from configuration.
    fn name(&self) -> &str;

    /// Content types this stage accepts. [`ANY_CONTENT`] accepts everything.
    fn accepts(&self) -> &[&'static str];

    /// Content type this stage produces.
    fn emits(&self) -> &'static str;

    fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError>;
}

fn stage_accepts(stage: &dyn Stage, content_type: &str) -> bool {
    stage
        .accepts()
        .iter()
        .any(|t| *t == content_type || *t == ANY_CONTENT)
}

/// A stage plus the options it runs with inside one rule.
#[derive(Clone)]
pub struct StageLink {
    pub stage: Arc<dyn Stage>,
    pub options: serde_json::Value,
}

impl StageLink {
    #[must_use]
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            options: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for StageLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageLink")
            .field("stage", &self.stage.name())
            .field("options", &self.options)
            .finish()
    }
}

/// What a matching rule does with the file.
#[derive(Debug, Clone)]
pub enum RuleAction {
    Stages(Vec<StageLink>),
    /// Emit the raw bytes under the template; the module exports the URL.
    Resource(OutputTemplate),
}

/// Exclusion pattern for a rule.
#[derive(Debug, Clone)]
pub enum ExcludePattern {
    /// Bare name: matches when any path component equals it.
    Component(String),
    /// Glob against the full path (`/`-separated).
    Glob(glob::Pattern),
}

impl ExcludePattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let is_glob = pattern.contains(['*', '?', '[', '/']);
        if !is_glob {
            return Ok(Self::Component(pattern.to_string()));
        }
        glob::Pattern::new(pattern)
            .map(Self::Glob)
            .map_err(|e| ConfigError::Pattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Self::Component(name) => path
                .components()
                .any(|c| c.as_os_str().to_str() == Some(name.as_str())),
            Self::Glob(pattern) => {
                let normalized = path.to_string_lossy().replace('\\', "/");
                pattern.matches(&normalized)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoaderRule {
    /// Lowercase, without the leading dot.
    extensions: Vec<String>,
    exclude: Vec<ExcludePattern>,
    action: RuleAction,
}

impl LoaderRule {
    fn new<S: AsRef<str>>(extensions: &[S], action: RuleAction) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude: Vec::new(),
            action,
        }
    }

    /// Rule running `stages` in order.
    #[must_use]
    pub fn stages<S: AsRef<str>>(extensions: &[S], stages: Vec<StageLink>) -> Self {
        Self::new(extensions, RuleAction::Stages(stages))
    }

    /// Rule emitting matching files as static resources.
    #[must_use]
    pub fn resource<S: AsRef<str>>(extensions: &[S], template: OutputTemplate) -> Self {
        Self::new(extensions, RuleAction::Resource(template))
    }

    pub fn exclude(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.exclude.push(ExcludePattern::parse(pattern)?);
        Ok(self)
    }

    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext) && !self.exclude.iter().any(|p| p.matches(path))
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.extensions.is_empty() {
            return Err(ConfigError::InvalidRule {
                rule: index,
                message: "rule has no extensions".to_string(),
            });
        }
        let RuleAction::Stages(chain) = &self.action else {
            return Ok(());
        };
        let Some(first) = chain.first() else {
            return Err(ConfigError::InvalidRule {
                rule: index,
                message: "stage chain is empty".to_string(),
            });
        };

        for ext in &self.extensions {
            if !stage_accepts(first.stage.as_ref(), ext) {
                return Err(ConfigError::StageMismatch {
                    rule: index,
                    stage: first.stage.name().to_string(),
                    content_type: ext.clone(),
                });
            }
        }

        for pair in chain.windows(2) {
            let produced = pair[0].stage.emits();
            if !stage_accepts(pair[1].stage.as_ref(), produced) {
                return Err(ConfigError::StageMismatch {
                    rule: index,
                    stage: pair[1].stage.name().to_string(),
                    content_type: produced.to_string(),
                });
            }
        }

        let last = chain.last().map_or(SCRIPT_CONTENT, |l| l.stage.emits());
        if last != SCRIPT_CONTENT {
            return Err(ConfigError::ChainOutput {
                rule: index,
                content_type: last.to_string(),
            });
        }
        Ok(())
    }
}

/// A static file the build must emit next to the chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedResource {
    /// Path relative to the output directory, `/`-separated.
    pub output_path: String,
    pub bytes: Arc<[u8]>,
}

/// Result of running a file through its rule.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Script content of the module.
    pub content: String,
    pub source_map: Option<String>,
    pub imports: Vec<Import>,
    pub resource: Option<EmittedResource>,
}

/// Selects and runs the rule for each file.
#[derive(Debug, Default)]
pub struct LoaderDispatcher {
    rules: Vec<LoaderRule>,
    public_path: String,
}

impl LoaderDispatcher {
    #[must_use]
    pub fn new(public_path: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            public_path: public_path.into(),
        }
    }

    /// Build the rule table from configuration, looking stages up by name.
    pub fn from_config(config: &BuildConfig, registry: &StageRegistry) -> Result<Self, ConfigError> {
        let mut dispatcher = Self::new(config.output.public_path.clone());

        for (index, rule) in config.rules.iter().enumerate() {
            let mut built = match rule.kind {
                RuleKind::Resource => {
                    let filename = rule
                        .generator
                        .as_ref()
                        .map_or("[name].[hash:8][ext]", |g| g.filename.as_str());
                    LoaderRule::resource(&rule.test, OutputTemplate::parse(filename)?)
                }
                RuleKind::Transform => {
                    let chain = rule
                        .stages
                        .iter()
                        .map(|stage_ref| {
                            registry
                                .get(stage_ref.name())
                                .map(|stage| StageLink::new(stage).with_options(stage_ref.options()))
                                .ok_or_else(|| ConfigError::UnknownStage {
                                    rule: index,
                                    name: stage_ref.name().to_string(),
                                })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    LoaderRule::stages(&rule.test, chain)
                }
            };
            for pattern in &rule.exclude {
                built = built.exclude(pattern)?;
            }
            dispatcher.register(built)?;
        }

        Ok(dispatcher)
    }

    /// Append a rule after validating its stage chain.
    pub fn register(&mut self, rule: LoaderRule) -> Result<(), ConfigError> {
        rule.validate(self.rules.len())?;
        self.rules.push(rule);
        Ok(())
    }

    /// Every extension some rule handles.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .flat_map(|r| r.extensions.iter().map(String::as_str))
    }

    /// First applicable rule for `path`.
    #[must_use]
    pub fn rule_for(&self, path: &Path) -> Option<&LoaderRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Run `path` (with contents `raw`) through its rule.
    pub fn transform(&self, path: &Path, raw: &[u8]) -> Result<TransformOutput, LoaderError> {
        let rule = self.rule_for(path).ok_or_else(|| LoaderError::NoRule {
            path: path.to_path_buf(),
        })?;

        match &rule.action {
            RuleAction::Resource(template) => Ok(self.emit_resource(path, raw, template)),
            RuleAction::Stages(chain) => {
                let mut content =
                    String::from_utf8(raw.to_vec()).map_err(|e| LoaderError::Read {
                        path: path.to_path_buf(),
                        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    })?;
                let mut source_map = None;

                for link in chain {
                    let output = link
                        .stage
                        .run(StageInput {
                            path,
                            content,
                            source_map,
                            options: &link.options,
                        })
                        .map_err(|cause| LoaderError::StageFailed {
                            stage: link.stage.name().to_string(),
                            path: path.to_path_buf(),
                            cause,
                        })?;
                    content = output.content;
                    source_map = output.source_map;
                }

                let imports = scan_imports(&content);
                Ok(TransformOutput {
                    content,
                    source_map,
                    imports,
                    resource: None,
                })
            }
        }
    }

    fn emit_resource(&self, path: &Path, raw: &[u8], template: &OutputTemplate) -> TransformOutput {
        let hash = blake3_bytes(raw);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let output_path = template.render(&TemplateVars {
            name: &name,
            id: 0,
            ext: &ext,
            hash: &hash,
        });
        let url = public_url(&self.public_path, &output_path);

        TransformOutput {
            content: format!("export default {};", serde_json::Value::String(url)),
            source_map: None,
            imports: Vec::new(),
            resource: Some(EmittedResource {
                output_path,
                bytes: Arc::from(raw),
            }),
        }
    }
}
