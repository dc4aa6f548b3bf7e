//! Disk persistence: versioned snapshots of a fingerprint collection. The
//! tree itself is not serialised; an index is rebuilt by reinsertion, which
//! also revalidates every record on the way in.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::fprint::Fingerprint;
use crate::rtree::{FprintIndex, IndexError};

const CURRENT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<bincode::Error> for PersistenceError {
    fn from(e: bincode::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub last_saved_at: DateTime<Utc>,
}

/// A whole fingerprint collection in one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub records: Vec<(Uuid, Fingerprint)>,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn new(records: Vec<(Uuid, Fingerprint)>) -> Self {
        let now = Utc::now();
        Self {
            version: CURRENT_VERSION,
            records,
            metadata: SnapshotMetadata {
                created_at: now,
                last_saved_at: now,
            },
        }
    }

    /// Write the snapshot with a fresh save timestamp.
    pub fn save(&mut self, path: &Path) -> Result<(), PersistenceError> {
        self.metadata.last_saved_at = Utc::now();
        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes)?;
        debug!(records = self.records.len(), path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// Load and version-check a snapshot. Undecodable files surface as
    /// serialization errors, never as a partially-filled collection.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let bytes = fs::read(path)?;
        let snap: Snapshot = bincode::deserialize(&bytes)?;
        if snap.version != CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: CURRENT_VERSION,
                got: snap.version,
            });
        }
        Ok(snap)
    }
}

impl FprintIndex {
    /// Capture the indexed records for persistence.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.records().map(|(id, fp)| (*id, fp.clone())).collect())
    }

    /// Rebuild an index from a snapshot by reinsertion.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, PersistenceError> {
        let mut index = FprintIndex::new();
        let count = snapshot.records.len();
        for (id, fp) in snapshot.records {
            index.insert(id, fp)?;
        }
        debug!(records = count, "index rebuilt from snapshot");
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
