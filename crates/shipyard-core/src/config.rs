use crate::error::ConfigError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "shipyard.json";

/// Build mode. Selects the default output templates and whether size
/// budgets are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Full build profile, read from `shipyard.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    /// Project root. Never read from the file; set by [`BuildConfig::load`].
    #[serde(skip)]
    pub root: PathBuf,

    /// Entry specifier, resolved against the project root.
    pub entry: String,

    pub mode: Mode,

    pub resolve: ResolveConfig,

    /// Loader rules. The first matching rule wins.
    pub rules: Vec<RuleConfig>,

    pub output: OutputConfig,

    pub optimization: OptimizationConfig,

    /// Global constant substitutions applied to emitted chunk bytes.
    pub define: BTreeMap<String, String>,

    pub html: HtmlConfig,

    pub performance: PerformanceConfig,

    /// Transform worker count (0 = one per CPU).
    pub parallelism: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveConfig {
    /// Probe order for extensionless specifiers. Leading dots are optional.
    pub extensions: Vec<String>,

    /// Ordered aliases; the first matching prefix wins.
    pub alias: Vec<AliasConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasConfig {
    pub find: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// File extensions this rule applies to.
    pub test: Vec<String>,

    /// Exclusion patterns. A bare name matches any path component; anything
    /// else is a glob matched against the full path.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Transform stages, in execution order.
    #[serde(default, rename = "use")]
    pub stages: Vec<StageRef>,

    #[serde(default, rename = "type")]
    pub kind: RuleKind,

    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
}

/// A stage reference inside a rule: either a bare name or a name with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageRef {
    Name(String),
    WithOptions {
        loader: String,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl StageRef {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::WithOptions { loader: name, .. } => name,
        }
    }

    #[must_use]
    pub fn options(&self) -> serde_json::Value {
        match self {
            Self::Name(_) => serde_json::Value::Null,
            Self::WithOptions { options, .. } => options.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RuleKind {
    /// Run the stage chain; the result is a script module.
    #[default]
    #[serde(rename = "javascript/auto")]
    Transform,
    /// Copy the file verbatim to the output and export its URL.
    #[serde(rename = "asset/resource")]
    Resource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    /// Output directory, relative to the project root.
    pub path: PathBuf,

    /// URL prefix for every emitted file.
    pub public_path: String,

    /// Template for initial chunks. Defaults depend on the mode.
    pub filename: Option<String>,

    /// Template for on-demand chunks. Defaults depend on the mode.
    pub chunk_filename: Option<String>,
}

impl OutputConfig {
    #[must_use]
    pub fn filename_for(&self, mode: Mode) -> &str {
        match (&self.filename, mode) {
            (Some(template), _) => template,
            (None, Mode::Production) => "js/[name].[contenthash:8].js",
            (None, Mode::Development) => "js/[name].bundle.js",
        }
    }

    #[must_use]
    pub fn chunk_filename_for(&self, mode: Mode) -> &str {
        match (&self.chunk_filename, mode) {
            (Some(template), _) => template,
            (None, Mode::Production) => "js/[name].[contenthash:8].chunk.js",
            (None, Mode::Development) => "js/[name].chunk.js",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizationConfig {
    pub split_chunks: SplitChunksConfig,

    /// `"single"` or `true` extracts the runtime glue into its own chunk.
    #[serde(deserialize_with = "runtime_chunk_flag")]
    pub runtime_chunk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplitChunksConfig {
    /// Minimum number of top-level chunks that must share a module before it
    /// is hoisted into a shared chunk.
    pub min_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HtmlConfig {
    /// Template path, relative to the project root. A built-in shell is used
    /// when the file does not exist.
    pub template: PathBuf,
    pub filename: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    /// Emitted script chunks above this size produce a warning in production.
    pub max_asset_size: u64,
}

fn runtime_chunk_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(flag) => Ok(flag),
        serde_json::Value::String(s) if s == "single" => Ok(true),
        other => Err(D::Error::custom(format!(
            "expected \"single\" or a boolean for runtimeChunk, got {other}"
        ))),
    }
}

fn ext_list(exts: &[&str]) -> Vec<String> {
    exts.iter().map(|e| (*e).to_string()).collect()
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: ext_list(&[".js", ".vue", ".json"]),
            alias: vec![
                AliasConfig {
                    find: "@".to_string(),
                    replacement: "./src".to_string(),
                },
                AliasConfig {
                    find: "vue$".to_string(),
                    replacement: "vue/dist/vue.esm.js".to_string(),
                },
            ],
        }
    }
}

impl RuleConfig {
    /// A rule that runs the named stages in order.
    #[must_use]
    pub fn stages(test: &[&str], stages: &[&str]) -> Self {
        Self {
            test: ext_list(test),
            exclude: Vec::new(),
            stages: stages.iter().map(|s| StageRef::Name((*s).to_string())).collect(),
            kind: RuleKind::Transform,
            generator: None,
        }
    }

    /// A rule that emits matching files verbatim under `filename`.
    #[must_use]
    pub fn resource(test: &[&str], filename: &str) -> Self {
        Self {
            test: ext_list(test),
            exclude: Vec::new(),
            stages: Vec::new(),
            kind: RuleKind::Resource,
            generator: Some(GeneratorConfig {
                filename: filename.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.exclude.push(pattern.to_string());
        self
    }
}

/// Rules matching the observed project setup.
#[must_use]
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::stages(&["js", "mjs"], &["script"]).with_exclude("node_modules"),
        // Installed packages are bundled untranspiled.
        RuleConfig::stages(&["js", "mjs"], &["script"]),
        RuleConfig::stages(&["json"], &["json"]),
        RuleConfig::stages(&["css"], &["css", "style-inject"]),
        RuleConfig::resource(
            &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"],
            "img/[name].[hash:8][ext][query]",
        ),
        RuleConfig::resource(
            &["woff", "woff2", "eot", "ttf", "otf"],
            "fonts/[name].[hash:8][ext][query]",
        ),
    ]
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dist"),
            public_path: "/".to_string(),
            filename: None,
            chunk_filename: None,
        }
    }
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            split_chunks: SplitChunksConfig::default(),
            runtime_chunk: true,
        }
    }
}

impl Default for SplitChunksConfig {
    fn default() -> Self {
        Self { min_chunks: 2 }
    }
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("public/index.html"),
            filename: "index.html".to_string(),
            title: "Vue 2 Dashboard App".to_string(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_asset_size: 250_000,
        }
    }
}

/// Default constant table: `process.env.BASE_URL` from the environment.
#[must_use]
pub fn default_define() -> BTreeMap<String, String> {
    let base_url = std::env::var("BASE_URL").unwrap_or_else(|_| "/".to_string());
    let mut define = BTreeMap::new();
    define.insert(
        "process.env.BASE_URL".to_string(),
        serde_json::Value::String(base_url).to_string(),
    );
    define
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            entry: "./src/main.js".to_string(),
            mode: Mode::default(),
            resolve: ResolveConfig::default(),
            rules: default_rules(),
            output: OutputConfig::default(),
            optimization: OptimizationConfig::default(),
            define: default_define(),
            html: HtmlConfig::default(),
            performance: PerformanceConfig::default(),
            parallelism: 0,
        }
    }
}

impl BuildConfig {
    /// Default profile rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load `shipyard.json` from `root`, falling back to defaults when the
    /// file is absent.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::new(root));
        }
        Self::load_file(&path, root)
    }

    /// Load an explicit config file; `root` is the project root it applies to.
    pub fn load_file(path: &Path, root: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.root = root.to_path_buf();
        Ok(config)
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    #[must_use]
    pub fn with_out_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output.path = path.into();
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers;
        self
    }

    /// Absolute output directory.
    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(&self.output.path)
    }
}
