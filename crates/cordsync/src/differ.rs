//! Snapshot diffing: applies authoritative server snapshots to the cache.
//!
//! For each tracked field (in descriptor order) the differ reads the new
//! value from the snapshot, resolves references, compares it with the
//! cached value and, if it differs, writes the cache and emits a
//! [`ChangeRecord`] right away. Each field's write happens before its
//! record is emitted, so a listener for one field sees that field already
//! updated while later fields of the same snapshot may still hold old
//! values.
//!
//! Snapshots for one server are applied under that server's writer lock,
//! so updates to the same server never interleave. Different servers
//! proceed in parallel.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::SyncError;
use crate::cache::{EntityCache, Server};
use crate::event::ChangeRecord;
use crate::field::{DESCRIPTORS, Extracted};
use crate::resolver::ForeignKeyResolver;
use crate::types::parse_snowflake;

/// One authoritative state document for a server.
///
/// A key that is present means "this field may have changed"; a missing
/// key leaves the field alone. Explicit null clears the field.
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    id: u64,
    unavailable: bool,
    document: Map<String, Value>,
}

impl GuildSnapshot {
    /// Parse a snapshot from a JSON document.
    ///
    /// Fails only if the document is not an object or has no valid `id`.
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        let Value::Object(document) = value else {
            return Err(SyncError::MalformedSnapshot(
                "snapshot is not a JSON object".to_string(),
            ));
        };
        let id = document
            .get("id")
            .and_then(parse_snowflake)
            .ok_or_else(|| SyncError::MalformedSnapshot("missing or invalid id".to_string()))?;
        let unavailable = document
            .get("unavailable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            id,
            unavailable,
            document,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the server is flagged unavailable (outage); such snapshots
    /// carry no usable state.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    /// Raw value of a key, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }
}

/// What happened to one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// The snapshot was flagged unavailable; nothing was diffed.
    Unavailable,
    /// The server is not tracked; nothing was diffed.
    Untracked,
    /// The snapshot was applied.
    Applied {
        /// Fields whose cached value changed.
        changed: usize,
        /// Reference fields skipped because the referent is not cached.
        unresolved: usize,
    },
}

/// Applies snapshots to the entity cache.
pub struct SnapshotDiffer {
    cache: Arc<EntityCache>,
}

impl SnapshotDiffer {
    pub fn new(cache: Arc<EntityCache>) -> Self {
        Self { cache }
    }

    /// Diff a snapshot against the cache, calling `emit` for every field
    /// whose value changed, immediately after that field is written.
    pub fn apply<F>(&self, snapshot: &GuildSnapshot, mut emit: F) -> DiffOutcome
    where
        F: FnMut(&Arc<Server>, ChangeRecord),
    {
        if snapshot.is_unavailable() {
            debug!(server_id = %snapshot.id(), "server unavailable, skipping snapshot");
            return DiffOutcome::Unavailable;
        }
        let Some(server) = self.cache.get(snapshot.id()) else {
            trace!(server_id = %snapshot.id(), "snapshot for untracked server");
            return DiffOutcome::Untracked;
        };

        let _writer = server.lock_writer();
        let resolver = ForeignKeyResolver::new(&self.cache);
        let mut changed = 0;
        let mut unresolved = 0;

        for descriptor in DESCRIPTORS.iter() {
            let new = match descriptor.extract(snapshot, &resolver) {
                Extracted::NotPresent => continue,
                Extracted::Value(value) => value,
                Extracted::Unresolved(raw_id) => {
                    // Leave the cached value alone until a later snapshot
                    // arrives after the referent is cached.
                    debug!(
                        server_id = %server.id(),
                        field = ?descriptor.field,
                        raw_id = %raw_id,
                        "unresolved reference, field skipped"
                    );
                    server.record_unresolved(descriptor.field, raw_id);
                    unresolved += 1;
                    continue;
                }
            };

            // The snapshot settled this field, so any pending id is stale
            // even when the value itself is unchanged.
            server.clear_unresolved(descriptor.field);
            let old = server.current_value(descriptor.field);
            if old == new {
                continue;
            }

            server.apply(descriptor.field, new.clone());
            changed += 1;
            emit(
                &server,
                ChangeRecord {
                    server_id: server.id(),
                    field: descriptor.field,
                    old,
                    new,
                },
            );
        }

        debug!(server_id = %server.id(), changed, unresolved, "snapshot applied");
        DiffOutcome::Applied {
            changed,
            unresolved,
        }
    }

    /// Write every present field of a snapshot without emitting records.
    ///
    /// Used to populate a newly tracked server.
    pub fn hydrate(&self, server: &Server, snapshot: &GuildSnapshot) {
        let _writer = server.lock_writer();
        let resolver = ForeignKeyResolver::new(&self.cache);
        for descriptor in DESCRIPTORS.iter() {
            match descriptor.extract(snapshot, &resolver) {
                Extracted::NotPresent => {}
                Extracted::Value(value) => server.apply(descriptor.field, value),
                Extracted::Unresolved(raw_id) => {
                    server.record_unresolved(descriptor.field, raw_id)
                }
            }
        }
    }
}
