//! `shipyard watch` command implementation.
//!
//! Runs a full build, then feeds file-system events into the core rebuild
//! loop until ctrl+c.

use miette::{IntoDiagnostic, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use shipyard_core::bundler::{run_watch_loop, CancelHandle, FileChange};
use shipyard_core::{BuildError, BuildReport, Pipeline};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{outcome_json, print_report, BuildAction};

/// Run watch mode.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    runtime.block_on(watch(action, json))
}

async fn watch(action: BuildAction, json: bool) -> Result<()> {
    let config = action.load_config().into_diagnostic()?;
    let mut pipeline = Pipeline::new(config).into_diagnostic()?;

    let root = pipeline.config().root.clone();
    let out_dir = pipeline.config().out_dir();

    // A failing first build still enters the loop so the user can fix it.
    report(&pipeline.build(), json);

    let (tx, rx) = mpsc::unbounded_channel();
    let _watcher = spawn_watcher(&root, out_dir, tx)?;
    if !json {
        println!("Watching {}... (ctrl+c to exit)", root.display());
    }

    let cancel = CancelHandle::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let rebuilds = run_watch_loop(pipeline, rx, cancel.clone(), |changed, result| {
        for path in changed {
            debug!(path = %path.display(), "changed");
        }
        report(result, json);
    });
    tokio::pin!(rebuilds);

    tokio::select! {
        _ = &mut ctrl_c => {
            cancel.cancel();
            info!("watch stopped");
        }
        result = &mut rebuilds => {
            result.into_diagnostic()?;
        }
    }
    Ok(())
}

fn report(result: &Result<BuildReport, BuildError>, json: bool) {
    if json {
        println!("{}", outcome_json(result));
        return;
    }
    match result {
        Ok(report) => print_report(report),
        Err(e) => eprintln!("error[{}]: {e}", e.code()),
    }
}

/// Forward relevant file events under `root` to `tx`.
fn spawn_watcher(
    root: &Path,
    out_dir: PathBuf,
    tx: mpsc::UnboundedSender<FileChange>,
) -> Result<RecommendedWatcher> {
    let watch_root = root.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            for path in event.paths {
                if !should_ignore(&path, &watch_root, &out_dir) {
                    let _ = tx.send(FileChange::new(path));
                }
            }
        },
        Config::default(),
    )
    .into_diagnostic()?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .into_diagnostic()?;
    Ok(watcher)
}

/// Build output, staging directories, dotfiles and installed packages.
fn should_ignore(path: &Path, root: &Path, out_dir: &Path) -> bool {
    if path.starts_with(out_dir) {
        return true;
    }
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || name == "node_modules"
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore() {
        let root = Path::new("/tmp/.tmpAbc/app");
        let out = root.join("dist");
        let ignored = |rel: &str| should_ignore(&root.join(rel), root, &out);
        assert!(ignored("dist/js/main.js"));
        assert!(ignored(".dist.staging.42/index.html"));
        assert!(ignored("node_modules/vue/index.js"));
        assert!(ignored(".git/index"));
        assert!(!ignored("src/main.js"));
        assert!(!ignored("distance.js"));
    }
}
