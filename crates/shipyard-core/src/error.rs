use crate::bundler::{ChunkSetViolation, LoaderError, PluginError, ResolveError};
use crate::codes;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors, raised while the pipeline is being assembled.
///
/// These never surface per-file: a stage chain that cannot accept its input
/// is rejected when the rule is registered.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("rule {rule}: unknown transform stage '{name}'")]
    UnknownStage { rule: usize, name: String },

    #[error("rule {rule}: stage '{stage}' does not accept '{content_type}' content")]
    StageMismatch {
        rule: usize,
        stage: String,
        content_type: String,
    },

    #[error("rule {rule}: stage chain produces '{content_type}', expected 'js'")]
    ChainOutput { rule: usize, content_type: String },

    #[error("rule {rule}: {message}")]
    InvalidRule { rule: usize, message: String },

    #[error("invalid exclude pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("invalid output template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

/// Storage write failure during emission.
#[derive(Error, Debug)]
#[error("failed to write build output to {}: {source}", .dest.display())]
pub struct EmitError {
    pub dest: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Fatal build error. Warnings never take this path.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("invalid chunk set: {0}")]
    Chunks(#[from] ChunkSetViolation),

    #[error("build cancelled before emission")]
    Cancelled,
}

impl BuildError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolve(_) => codes::BUNDLE_RESOLVE_ERROR,
            Self::Loader(LoaderError::NoRule { .. }) => codes::BUNDLE_LOADER_NO_RULE,
            Self::Loader(LoaderError::StageFailed { .. }) => codes::BUNDLE_STAGE_FAILED,
            Self::Loader(LoaderError::Read { .. }) => codes::BUNDLE_READ_ERROR,
            Self::Config(_) => codes::BUNDLE_CONFIG_INVALID,
            Self::Emit(_) => codes::BUNDLE_EMIT_ERROR,
            Self::Plugin(_) => codes::BUNDLE_PLUGIN_ERROR,
            Self::Chunks(_) => codes::BUNDLE_CHUNK_INVALID,
            Self::Cancelled => codes::BUNDLE_CANCELLED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_variants() {
        let err = BuildError::from(ResolveError {
            specifier: "./missing".to_string(),
            from: PathBuf::from("/app/src/main.js"),
            reason: "File not found".to_string(),
        });
        assert_eq!(err.code(), codes::BUNDLE_RESOLVE_ERROR);
        assert_eq!(
            err.to_string(),
            "Cannot resolve './missing' from '/app/src/main.js': File not found"
        );

        let err = BuildError::from(LoaderError::NoRule {
            path: PathBuf::from("/app/src/data.xml"),
        });
        assert_eq!(err.code(), codes::BUNDLE_LOADER_NO_RULE);
        assert_eq!(BuildError::Cancelled.code(), codes::BUNDLE_CANCELLED);
    }
}
