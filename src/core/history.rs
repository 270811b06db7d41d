//! Run summaries recorded after each run.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::agent::{LandingResult, TerminationReason};
use super::storage::{Result, Storage};

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunSummary {
    pub id: String,
    /// `owner/repo`
    pub repository: String,
    pub title: String,
    pub landing: Option<LandingResult>,
    /// Distinct paths written during the run
    pub files: Vec<String>,
    /// Final model prose plus the landing outcome
    pub message: String,
    pub iterations: usize,
    pub termination: TerminationReason,
    /// Landed by the fallback rather than by the model
    pub fallback_used: bool,
    /// Unix milliseconds
    pub started_at: i64,
    pub finished_at: i64,
}

/// Persists run summaries.
pub trait RunRecorder: Send + Sync {
    /// Record a finished run.
    ///
    /// # Errors
    ///
    /// Returns error if the summary cannot be stored.
    fn record(&self, summary: &RunSummary) -> Result<()>;

    /// Most recent runs first.
    ///
    /// # Errors
    ///
    /// Returns error if summaries cannot be read.
    fn recent(&self, limit: usize) -> Result<Vec<RunSummary>>;
}

/// Keeps summaries as `runs/<id>.json` documents.
#[derive(Debug, Clone)]
pub struct StorageRecorder {
    storage: Storage,
}

impl StorageRecorder {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl RunRecorder for StorageRecorder {
    fn record(&self, summary: &RunSummary) -> Result<()> {
        self.storage.write(&["runs", &summary.id], summary)
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut runs: Vec<RunSummary> = self.storage.list_prefix(&["runs"])?;
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
