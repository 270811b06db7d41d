//! Pending file writes accumulated across a run.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A complete new file body waiting to be landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StagedWrite {
    pub path: String,
    pub content: String,
    pub description: String,
}

/// Append-only list of staged writes, in arrival order.
///
/// Repeated writes to one path are all kept; [`StagingBuffer::flatten`]
/// resolves them when landing.
#[derive(Debug, Clone, Default)]
pub struct StagingBuffer {
    writes: Vec<StagedWrite>,
}

impl StagingBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write and return how many writes are staged.
    pub fn push(&mut self, write: StagedWrite) -> usize {
        self.writes.push(write);
        self.writes.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    #[must_use]
    pub fn writes(&self) -> &[StagedWrite] {
        &self.writes
    }

    /// One write per path: the last content wins, at the path's first position.
    #[must_use]
    pub fn flatten(&self) -> Vec<StagedWrite> {
        let mut flat: Vec<StagedWrite> = Vec::with_capacity(self.writes.len());
        for write in &self.writes {
            match flat.iter_mut().find(|w| w.path == write.path) {
                Some(existing) => existing.clone_from(write),
                None => flat.push(write.clone()),
            }
        }
        flat
    }

    /// Distinct staged paths, in first-appearance order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.flatten().into_iter().map(|w| w.path).collect()
    }

    #[must_use]
    pub fn into_writes(self) -> Vec<StagedWrite> {
        self.writes
    }
}

impl From<Vec<StagedWrite>> for StagingBuffer {
    fn from(writes: Vec<StagedWrite>) -> Self {
        Self { writes }
    }
}
