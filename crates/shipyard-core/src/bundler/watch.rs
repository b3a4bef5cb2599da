//! Serialized rebuild loop for watch mode.
//!
//! Change notifications are coalesced for [`COALESCE_WINDOW_MS`] of quiet
//! before a pass starts. One pass runs at a time; changes that arrive while a
//! pass is running are collected into a single follow-up pass.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{BuildReport, Pipeline};
use crate::error::BuildError;

/// Event coalescing window.
pub const COALESCE_WINDOW_MS: u64 = 50;

/// Shared flag that stops a build between the transform and emit phases.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A file changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Absolute path of the changed file.
    pub path: PathBuf,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("rebuild task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rebuild `pipeline` for every coalesced batch of changes on `rx`.
///
/// Returns the pipeline when the channel closes or `cancel` fires. Builds run
/// on the blocking pool; `on_build` sees each batch and its outcome.
pub async fn run_watch_loop<F>(
    mut pipeline: Pipeline,
    mut rx: mpsc::UnboundedReceiver<FileChange>,
    cancel: CancelHandle,
    mut on_build: F,
) -> Result<Pipeline, WatchError>
where
    F: FnMut(&[PathBuf], &Result<BuildReport, BuildError>),
{
    let window = Duration::from_millis(COALESCE_WINDOW_MS);
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    let mut closed = false;

    while !closed && !cancel.is_cancelled() {
        // Wait for the first change of a batch.
        match rx.recv().await {
            Some(change) => {
                pending.insert(change.path);
            }
            None => break,
        }

        // Absorb everything that follows until the channel goes quiet.
        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(Some(change)) => {
                    pending.insert(change.path);
                }
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let changed: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
        debug!(count = changed.len(), "Processing coalesced file events");

        let batch = changed.clone();
        let handle = cancel.clone();
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = pipeline.rebuild_with_cancel(&batch, &handle);
            (pipeline, result)
        })
        .await?;
        pipeline = returned;

        on_build(&changed, &result);
    }

    info!("watch loop stopped");
    Ok(pipeline)
}
