pub mod build;
pub mod watch;

use serde::Serialize;
use shipyard_core::{BuildConfig, BuildError, BuildReport, ConfigError, Mode};
use std::path::PathBuf;

/// Options shared by `build` and `watch`.
#[derive(Debug, Clone)]
pub struct BuildAction {
    /// Project root.
    pub cwd: PathBuf,
    pub mode: Option<Mode>,
    /// Explicit config file; `shipyard.json` in `cwd` otherwise.
    pub config: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub entry: Option<String>,
    pub jobs: Option<usize>,
}

impl BuildAction {
    /// Load the build profile and apply command-line overrides.
    pub fn load_config(&self) -> Result<BuildConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => BuildConfig::load_file(&self.cwd.join(path), &self.cwd)?,
            None => BuildConfig::load(&self.cwd)?,
        };
        if let Some(mode) = self.mode {
            config = config.with_mode(mode);
        }
        if let Some(out) = &self.out {
            config = config.with_out_dir(out);
        }
        if let Some(entry) = &self.entry {
            config = config.with_entry(entry);
        }
        if let Some(jobs) = self.jobs {
            config = config.with_parallelism(jobs);
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct ErrorJson<'a> {
    ok: bool,
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

/// One JSON line per build outcome.
pub fn outcome_json(result: &Result<BuildReport, BuildError>) -> String {
    let encoded = match result {
        Ok(report) => serde_json::to_string(report),
        Err(e) => serde_json::to_string(&ErrorJson {
            ok: false,
            error: ErrorBody {
                code: e.code(),
                message: e.to_string(),
            },
        }),
    };
    encoded.unwrap_or_else(|e| format!("{{\"ok\":false,\"error\":{{\"code\":\"INTERNAL\",\"message\":\"{e}\"}}}}"))
}

/// Human summary of a successful build.
pub fn print_report(report: &BuildReport) {
    println!(
        "  {} build -> {} ({} modules, {} chunks, {}ms)",
        report.mode,
        report.out_dir,
        report.modules,
        report.chunks.len(),
        report.duration_ms
    );
    for chunk in &report.chunks {
        println!(
            "    {} ({:.1}KB, {}, {} modules)",
            chunk.file,
            chunk.size as f64 / 1024.0,
            chunk.kind.as_str(),
            chunk.modules
        );
    }
    for resource in &report.resources {
        println!("    {resource}");
    }
    println!("    {}", report.html);
    for warning in &report.warnings {
        eprintln!("  warning[{}]: {warning}", warning.code());
    }
}
