//! Per-mesh batch execution and reporting
//!
//! A failure of one mesh never stops the others: it is logged, recorded in the
//! [`BatchReport`] and the batch moves on.

use meshfusion_core::{ErrorKind, Result};
use meshfusion_io::mesh_stem;
use meshfusion_reconstruction::parallel::execute_parallel;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared flag that stops a batch from starting new meshes.
///
/// Meshes already in progress run to completion; meshes that never started are
/// reported as aborted.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final state of one mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MeshStatus {
    Done,
    Failed { kind: ErrorKind, message: String },
    Aborted,
}

/// Outcome for one input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshOutcome {
    /// File stem keying every per-mesh output
    pub mesh: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: MeshStatus,
}

/// Outcomes of a batch in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<MeshOutcome>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|status| matches!(status, MeshStatus::Done))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, MeshStatus::Failed { .. }))
    }

    pub fn aborted(&self) -> usize {
        self.count(|status| matches!(status, MeshStatus::Aborted))
    }

    /// Failure counts grouped by error kind
    pub fn failures_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            if let MeshStatus::Failed { kind, .. } = &outcome.status {
                *counts.entry(*kind).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Status of the mesh with the given stem
    pub fn status_of(&self, mesh: &str) -> Option<&MeshStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.mesh == mesh)
            .map(|outcome| &outcome.status)
    }

    /// True when every mesh completed
    pub fn is_success(&self) -> bool {
        self.succeeded() == self.len()
    }

    fn count<F: Fn(&MeshStatus) -> bool>(&self, predicate: F) -> usize {
        self.outcomes.iter().filter(|outcome| predicate(&outcome.status)).count()
    }
}

/// Run `process` for every path in parallel and collect the outcomes.
///
/// `stage` only labels log lines.
pub fn run_batch<F>(stage: &str, paths: &[PathBuf], abort: &AbortSignal, process: F) -> BatchReport
where
    F: Fn(&str, &Path) -> Result<()> + Sync + Send,
{
    let outcomes = execute_parallel(|| {
        paths
            .par_iter()
            .map(|path| {
                let mesh = mesh_stem(path).unwrap_or_else(|_| path.display().to_string());
                let status = if abort.is_raised() {
                    MeshStatus::Aborted
                } else {
                    match process(&mesh, path) {
                        Ok(()) => {
                            info!("{}: {} done", stage, mesh);
                            MeshStatus::Done
                        }
                        Err(e) => {
                            warn!("{}: skipping {}: {}", stage, mesh, e);
                            MeshStatus::Failed { kind: e.kind(), message: e.to_string() }
                        }
                    }
                };
                MeshOutcome { mesh, path: path.clone(), status }
            })
            .collect()
    });

    let report = BatchReport { outcomes };
    info!(
        "{}: {} of {} meshes done, {} failed, {} aborted",
        stage,
        report.succeeded(),
        report.len(),
        report.failed(),
        report.aborted()
    );
    report
}
