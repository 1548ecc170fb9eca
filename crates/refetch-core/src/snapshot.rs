//! Snapshot manager
//!
//! Checkpoints the key membership of the engine's tracking session and later
//! detaches every instance admitted since that checkpoint.
//!
//! States: no snapshot (initial) and snapshot taken. `snapshot` moves to, or
//! stays in, the second state; `clear` never changes state.

use std::time::Instant;

use crate::engine::PersistenceEngine;
use crate::errors::{Result, SnapshotNotDoneError};
use crate::identity_map::KeySet;
use crate::{log_op_end, log_op_error, log_op_start};

/// Detaches growth of the tracking session since a checkpoint
pub struct SnapshotManager<E: PersistenceEngine> {
    engine: E,
    snapshot: Option<KeySet>,
}

impl<E: PersistenceEngine> SnapshotManager<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            snapshot: None,
        }
    }

    /// Same as [`SnapshotManager::new`]
    pub fn create(engine: E) -> Self {
        Self::new(engine)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The latest checkpoint, if one was taken
    pub fn checkpoint(&self) -> Option<&KeySet> {
        self.snapshot.as_ref()
    }

    /// Record which (type, key) pairs are tracked right now
    ///
    /// Replaces any previous checkpoint. Only keys are recorded; the
    /// instances' state is not.
    pub fn snapshot(&mut self) {
        log_op_start!("snapshot");
        let start = Instant::now();

        let keys = self.engine.identity_map().key_set();
        let tracked = keys.len();
        self.snapshot = Some(keys);

        log_op_end!(
            "snapshot",
            duration_ms = start.elapsed().as_millis() as u64,
            tracked = tracked
        );
    }

    /// Detach every tracked instance whose key is not in the checkpoint
    ///
    /// Instances present at checkpoint time stay tracked, whatever happened
    /// to their state since. Returns the number of instances detached. May be
    /// called any number of times after one `snapshot`.
    ///
    /// # Errors
    ///
    /// - `SnapshotNotDone` when `snapshot` was never called; nothing is detached
    /// - `Engine` when the engine fails to detach an instance
    pub fn clear(&self) -> Result<usize> {
        log_op_start!("snapshot_clear");
        let start = Instant::now();

        let detached = self.clear_impl().map_err(|e| {
            log_op_error!(
                "snapshot_clear",
                e,
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "snapshot_clear",
            duration_ms = start.elapsed().as_millis() as u64,
            detached = detached
        );

        Ok(detached)
    }

    fn clear_impl(&self) -> Result<usize> {
        let checkpoint = self.snapshot.as_ref().ok_or(SnapshotNotDoneError)?;

        let mut detached = 0;
        for (type_name, id_hash, entity) in self.engine.identity_map().iter() {
            if checkpoint.contains(type_name, id_hash) {
                continue;
            }
            tracing::debug!(
                entity_type = type_name,
                entity_key = id_hash,
                "detaching instance admitted after snapshot"
            );
            self.engine.detach(entity)?;
            detached += 1;
        }
        Ok(detached)
    }
}
