//! The mirror: one entity cache plus the pipeline that keeps it current.
//!
//! Incoming server snapshots run through the [`SnapshotDiffer`], and each
//! change it emits is handed to the [`Dispatcher`] while the snapshot is
//! still being applied. Outbound edits go through updaters bound to the
//! mirror's [`RequestSink`].

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::SyncError;
use crate::cache::{EntityCache, OverwriteTables, Server};
use crate::differ::{DiffOutcome, GuildSnapshot, SnapshotDiffer};
use crate::dispatcher::Dispatcher;
use crate::event::EventContext;
use crate::gateway::GatewayPayload;
use crate::listener::ListenerRegistry;
use crate::rest::RequestSink;
use crate::types::{
    ChannelKind, OverwriteKind, OverwriteSubject, Permissions, deserialize_optional_snowflake,
    deserialize_snowflake,
};
use crate::updater::{ChannelUpdater, ServerUpdater};

/// Gateway event carrying a full server snapshot.
pub const GUILD_UPDATE: &str = "GUILD_UPDATE";
/// Gateway event sent when a server is removed or becomes unavailable.
pub const GUILD_DELETE: &str = "GUILD_DELETE";

/// Initial cache contents, usually taken from the ready payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSeed {
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub channels: Vec<ChannelSeed>,
    /// Server snapshots, in the same shape as `GUILD_UPDATE` data.
    #[serde(default)]
    pub servers: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserSeed {
    #[serde(deserialize_with = "deserialize_snowflake")]
    pub id: u64,
    #[serde(alias = "username")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSeed {
    #[serde(deserialize_with = "deserialize_snowflake")]
    pub id: u64,
    /// Owning server; private channels have none and are not cached.
    #[serde(
        rename = "guild_id",
        default,
        deserialize_with = "deserialize_optional_snowflake"
    )]
    pub server_id: Option<u64>,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub permission_overwrites: Vec<OverwriteSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverwriteSeed {
    #[serde(deserialize_with = "deserialize_snowflake")]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    #[serde(default)]
    pub allow: u64,
    #[serde(default)]
    pub deny: u64,
}

impl ChannelSeed {
    fn overwrite_tables(&self) -> OverwriteTables {
        let mut tables = OverwriteTables::default();
        for overwrite in &self.permission_overwrites {
            let subject = match overwrite.kind {
                OverwriteKind::Member => OverwriteSubject::Member(overwrite.id),
                OverwriteKind::Role => OverwriteSubject::Role(overwrite.id),
            };
            tables.upsert(subject, Permissions::new(overwrite.allow, overwrite.deny));
        }
        tables
    }
}

/// Client-side mirror of servers, channels and users.
pub struct Mirror {
    cache: Arc<EntityCache>,
    differ: SnapshotDiffer,
    dispatcher: Dispatcher,
    sink: Arc<dyn RequestSink>,
}

impl Mirror {
    pub fn new(cache: Arc<EntityCache>, sink: Arc<dyn RequestSink>) -> Self {
        Self {
            differ: SnapshotDiffer::new(Arc::clone(&cache)),
            dispatcher: Dispatcher::new(Arc::new(ListenerRegistry::new())),
            cache,
            sink,
        }
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Listeners that receive changes of every server.
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        self.dispatcher.global()
    }

    /// Populate the cache from a seed without dispatching any events.
    ///
    /// Users and channels are inserted before servers so that server
    /// references resolve.
    pub fn hydrate(&self, seed: CacheSeed) -> Result<(), SyncError> {
        for user in &seed.users {
            self.cache.insert_user(user.id, user.name.clone());
        }

        for channel in &seed.channels {
            let Some(server_id) = channel.server_id else {
                trace!(channel_id = %channel.id, "skipping channel without server");
                continue;
            };
            self.cache.insert_channel(
                channel.id,
                server_id,
                ChannelKind::from_id(channel.kind),
                channel.name.clone(),
                channel.position,
                channel.overwrite_tables(),
            );
        }

        for document in seed.servers {
            let snapshot = GuildSnapshot::from_value(document)?;
            let server = self.cache.track_server(snapshot.id());
            self.differ.hydrate(&server, &snapshot);
        }

        info!(
            servers = self.cache.server_count(),
            channels = self.cache.channel_count(),
            users = self.cache.user_count(),
            "cache hydrated"
        );
        Ok(())
    }

    /// Apply one server snapshot and dispatch the resulting changes.
    ///
    /// Listeners run synchronously on the calling thread while the
    /// server's writer lock is held. A listener must not feed another
    /// snapshot for the same server into the mirror from inside its
    /// callback.
    pub fn handle_guild_update(
        &self,
        sequence: Option<u64>,
        data: Value,
    ) -> Result<DiffOutcome, SyncError> {
        let snapshot = GuildSnapshot::from_value(data)?;
        let context = EventContext::new(sequence);
        let outcome = self.differ.apply(&snapshot, |server, record| {
            self.dispatcher.dispatch(&context, server, record);
        });
        Ok(outcome)
    }

    /// Route one gateway payload.
    ///
    /// Returns the diff outcome for snapshot payloads and `None` for
    /// anything else.
    pub fn handle_payload(&self, payload: GatewayPayload) -> Result<Option<DiffOutcome>, SyncError> {
        match payload.event_type.as_deref() {
            Some(GUILD_UPDATE) => {
                let data = payload.data.ok_or_else(|| {
                    SyncError::MalformedSnapshot("GUILD_UPDATE without data".to_string())
                })?;
                self.handle_guild_update(payload.sequence, data).map(Some)
            }
            Some(GUILD_DELETE) => {
                let data = payload.data.ok_or_else(|| {
                    SyncError::MalformedSnapshot("GUILD_DELETE without data".to_string())
                })?;
                let snapshot = GuildSnapshot::from_value(data)?;
                if snapshot.is_unavailable() {
                    // Outage: the server is still ours, keep its state.
                    debug!(server_id = %snapshot.id(), "server became unavailable");
                } else {
                    self.remove_server(snapshot.id());
                }
                Ok(None)
            }
            other => {
                trace!(event_type = ?other, "ignoring gateway payload");
                Ok(None)
            }
        }
    }

    /// Stop tracking a server. Listeners registered on it are dropped with it.
    pub fn remove_server(&self, id: u64) -> Option<Arc<Server>> {
        let removed = self.cache.remove_server(id);
        if removed.is_none() {
            warn!(server_id = %id, "removal of untracked server");
        }
        removed
    }

    /// Start a staged update of a cached channel.
    pub fn channel_updater(&self, channel_id: u64) -> Option<ChannelUpdater> {
        let channel = self.cache.channel(channel_id)?;
        Some(ChannelUpdater::new(channel, Arc::clone(&self.sink)))
    }

    /// Start a staged update of a tracked server.
    pub fn server_updater(&self, server_id: u64) -> Option<ServerUpdater> {
        let server = self.cache.get(server_id)?;
        Some(ServerUpdater::new(server, Arc::clone(&self.sink)))
    }
}
