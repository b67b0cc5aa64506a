//! VersionedStore: committed row versions keyed by name
//!
//! This module keeps the committed state of the store using:
//! - `BTreeMap<String, Vec<RowVersion>>` so scans come back ordered by name
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for the monotonically increasing commit version
//!
//! # Design Notes
//!
//! - **Version chains**: every commit appends one entry per written row;
//!   reads at version V return the newest entry with `version <= V`
//! - **Tombstones**: a delete appends an entry with `value: None`
//! - **Atomic apply**: a whole write set is applied under one write lock and
//!   the global version is published only after every entry is in place
//! - **Pruning**: entries no open snapshot can see are dropped by `prune`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// One committed version of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowVersion {
    /// Commit version that produced this entry
    pub version: u64,
    /// Committed value, `None` for a delete
    pub value: Option<i64>,
}

/// A live row value together with the version that wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedValue {
    /// Row value
    pub value: i64,
    /// Commit version that wrote the value
    pub version: u64,
}

/// Committed row storage with per-row version chains
#[derive(Debug, Default)]
pub struct VersionedStore {
    /// Version chains ordered oldest first
    data: RwLock<BTreeMap<String, Vec<RowVersion>>>,
    /// Highest commit version applied so far
    version: AtomicU64,
}

impl VersionedStore {
    /// Create an empty store at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest commit version applied so far
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Value of `name` as of `max_version`
    ///
    /// Returns None if the row did not exist or was deleted at that version.
    pub fn get_at(&self, name: &str, max_version: u64) -> Option<VersionedValue> {
        let data = self.data.read();
        data.get(name).and_then(|chain| Self::visible(chain, max_version))
    }

    /// Version of the newest committed entry for `name`, tombstones included
    ///
    /// Used for first-updater-wins checks.
    pub fn latest_version(&self, name: &str) -> Option<u64> {
        let data = self.data.read();
        data.get(name).and_then(|chain| chain.last()).map(|rv| rv.version)
    }

    /// All live rows as of `max_version`, ordered by name
    pub fn scan_at(&self, max_version: u64) -> Vec<(String, VersionedValue)> {
        let data = self.data.read();
        data.iter()
            .filter_map(|(name, chain)| {
                Self::visible(chain, max_version).map(|vv| (name.clone(), vv))
            })
            .collect()
    }

    /// Apply a transaction's write set at a freshly allocated version
    ///
    /// All entries share the returned commit version. Readers either see
    /// none of them or all of them.
    pub fn apply(&self, writes: &BTreeMap<String, Option<i64>>) -> u64 {
        let mut data = self.data.write();
        let version = self.version.load(Ordering::SeqCst) + 1;

        for (name, value) in writes {
            data.entry(name.clone()).or_default().push(RowVersion {
                version,
                value: *value,
            });
        }

        // Publish only after the chains hold every entry
        self.version.store(version, Ordering::SeqCst);
        version
    }

    /// Drop entries that no snapshot at or above `horizon` can observe
    ///
    /// Keeps the newest entry at or below the horizon plus everything newer.
    /// Rows whose only remaining entry is an old tombstone are removed.
    /// Returns the number of entries dropped.
    pub fn prune(&self, horizon: u64) -> usize {
        let mut data = self.data.write();
        let mut dropped = 0;

        data.retain(|_, chain| {
            let keep_from = chain
                .iter()
                .rposition(|rv| rv.version <= horizon)
                .unwrap_or(0);
            dropped += keep_from;
            chain.drain(..keep_from);

            let dead = chain.len() == 1 && chain[0].value.is_none() && chain[0].version <= horizon;
            if dead {
                dropped += 1;
            }
            !dead
        });

        dropped
    }

    /// Total number of entries across all chains
    pub fn entry_count(&self) -> usize {
        self.data.read().values().map(Vec::len).sum()
    }

    fn visible(chain: &[RowVersion], max_version: u64) -> Option<VersionedValue> {
        chain
            .iter()
            .rev()
            .find(|rv| rv.version <= max_version)
            .and_then(|rv| {
                rv.value.map(|value| VersionedValue {
                    value,
                    version: rv.version,
                })
            })
    }
}
