//! In-memory cache of servers, channels and users.
//!
//! Holds the authoritative local copy of every tracked server's fields.
//! The cache is shared by the snapshot differ (the only writer of server
//! fields), listeners, and updaters that seed themselves from current state.
//!
//! Users and channels are interned: there is exactly one `Arc` per id for
//! the lifetime of the cache, and re-inserting an id updates that `Arc` in
//! place. Field comparisons for references rely on this, see
//! [`FieldValue`](crate::FieldValue).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::trace;

use crate::field::{FieldValue, ServerField};
use crate::listener::ListenerRegistry;
use crate::types::{
    ChannelKind, DefaultMessageNotificationLevel, ExplicitContentFilterLevel,
    MultiFactorAuthenticationLevel, OverwriteSubject, Permissions, Region, VerificationLevel,
};

/// A cached user.
#[derive(Debug)]
pub struct User {
    id: u64,
    name: RwLock<String>,
}

impl User {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }
}

/// A channel's member and role permission overwrites.
///
/// Both tables are keyed by the subject id; ordered maps keep serialized
/// output stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverwriteTables {
    pub members: BTreeMap<u64, Permissions>,
    pub roles: BTreeMap<u64, Permissions>,
}

impl OverwriteTables {
    /// Insert or replace the overwrite for a subject.
    pub fn upsert(&mut self, subject: OverwriteSubject, permissions: Permissions) {
        match subject {
            OverwriteSubject::Member(id) => self.members.insert(id, permissions),
            OverwriteSubject::Role(id) => self.roles.insert(id, permissions),
        };
    }

    /// Remove the overwrite for a subject, returning it if present.
    pub fn remove(&mut self, subject: OverwriteSubject) -> Option<Permissions> {
        match subject {
            OverwriteSubject::Member(id) => self.members.remove(&id),
            OverwriteSubject::Role(id) => self.roles.remove(&id),
        }
    }

    pub fn get(&self, subject: OverwriteSubject) -> Option<Permissions> {
        match subject {
            OverwriteSubject::Member(id) => self.members.get(&id).copied(),
            OverwriteSubject::Role(id) => self.roles.get(&id).copied(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len() + self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.roles.is_empty()
    }
}

/// Capability of entities that carry permission overwrite tables.
///
/// Implementations must return both tables from one consistent read.
pub trait HasOverwriteTables {
    fn overwrite_tables(&self) -> OverwriteTables;
}

#[derive(Debug)]
struct ChannelState {
    name: String,
    position: i64,
    overwrites: OverwriteTables,
}

/// A cached server channel.
#[derive(Debug)]
pub struct Channel {
    id: u64,
    server_id: u64,
    kind: ChannelKind,
    state: RwLock<ChannelState>,
}

impl Channel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn position(&self) -> i64 {
        self.state.read().position
    }

    /// The overwrite for one subject, if any.
    pub fn permission_overwrite(&self, subject: OverwriteSubject) -> Option<Permissions> {
        self.state.read().overwrites.get(subject)
    }
}

impl HasOverwriteTables for Channel {
    fn overwrite_tables(&self) -> OverwriteTables {
        self.state.read().overwrites.clone()
    }
}

/// A tracked server and its current field values.
pub struct Server {
    id: u64,
    /// Current values indexed by `ServerField::index`.
    fields: RwLock<Vec<FieldValue>>,
    /// Raw ids of references that could not be resolved yet.
    unresolved: Mutex<HashMap<ServerField, u64>>,
    /// Held for the duration of one snapshot application.
    writer: Mutex<()>,
    /// Server-scoped change listeners.
    listeners: ListenerRegistry,
}

impl Server {
    fn new(id: u64) -> Self {
        Self {
            id,
            fields: RwLock::new(vec![FieldValue::Absent; ServerField::COUNT]),
            unresolved: Mutex::new(HashMap::new()),
            writer: Mutex::new(()),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Listeners attached to this server only.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Current value of a field.
    pub fn current_value(&self, field: ServerField) -> FieldValue {
        self.fields.read()[field.index()].clone()
    }

    /// Replace the value of one field.
    ///
    /// Clears any pending unresolved reference recorded for the field.
    pub(crate) fn apply(&self, field: ServerField, value: FieldValue) {
        let mut fields = self.fields.write();
        fields[field.index()] = value;
        // Cleared under the fields guard so readers never see the new value
        // alongside a stale pending id.
        self.unresolved.lock().remove(&field);
        drop(fields);
        trace!(server_id = %self.id, field = ?field, "cache: field applied");
    }

    /// Drop a pending unresolved reference without touching the value.
    pub(crate) fn clear_unresolved(&self, field: ServerField) {
        let _fields = self.fields.write();
        if self.unresolved.lock().remove(&field).is_some() {
            trace!(server_id = %self.id, field = ?field, "cache: pending reference cleared");
        }
    }

    pub(crate) fn record_unresolved(&self, field: ServerField, raw_id: u64) {
        self.unresolved.lock().insert(field, raw_id);
    }

    /// Serialize snapshot application for this server.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Raw id of a reference field whose referent was not cached when the
    /// last snapshot arrived.
    pub fn unresolved_reference(&self, field: ServerField) -> Option<u64> {
        self.unresolved.lock().get(&field).copied()
    }

    pub fn name(&self) -> String {
        self.current_value(ServerField::Name)
            .text()
            .unwrap_or_default()
            .to_string()
    }

    pub fn icon_hash(&self) -> Option<String> {
        self.current_value(ServerField::Icon)
            .text()
            .map(str::to_string)
    }

    pub fn splash_hash(&self) -> Option<String> {
        self.current_value(ServerField::Splash)
            .text()
            .map(str::to_string)
    }

    pub fn application_id(&self) -> Option<u64> {
        self.current_value(ServerField::ApplicationId).snowflake()
    }

    pub fn verification_level(&self) -> VerificationLevel {
        self.current_value(ServerField::VerificationLevel)
            .verification_level()
    }

    pub fn region(&self) -> Region {
        self.current_value(ServerField::Region).region()
    }

    pub fn default_message_notification_level(&self) -> DefaultMessageNotificationLevel {
        self.current_value(ServerField::DefaultMessageNotificationLevel)
            .default_message_notification_level()
    }

    pub fn explicit_content_filter_level(&self) -> ExplicitContentFilterLevel {
        self.current_value(ServerField::ExplicitContentFilterLevel)
            .explicit_content_filter_level()
    }

    pub fn multi_factor_authentication_level(&self) -> MultiFactorAuthenticationLevel {
        self.current_value(ServerField::MultiFactorAuthenticationLevel)
            .multi_factor_authentication_level()
    }

    pub fn owner(&self) -> Option<Arc<User>> {
        self.current_value(ServerField::Owner).user().cloned()
    }

    /// Id of the owner.
    ///
    /// An owner id reported by the gateway but not cached yet takes
    /// precedence over the cached owner.
    pub fn owner_id(&self) -> Option<u64> {
        let fields = self.fields.read();
        let pending = self.unresolved.lock().get(&ServerField::Owner).copied();
        pending.or_else(|| {
            fields[ServerField::Owner.index()]
                .user()
                .map(|owner| owner.id())
        })
    }

    pub fn system_channel(&self) -> Option<Arc<Channel>> {
        self.current_value(ServerField::SystemChannel)
            .channel()
            .cloned()
    }

    pub fn afk_channel(&self) -> Option<Arc<Channel>> {
        self.current_value(ServerField::AfkChannel).channel().cloned()
    }

    pub fn afk_timeout(&self) -> i64 {
        self.current_value(ServerField::AfkTimeout)
            .integer()
            .unwrap_or_default()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Thread-safe cache of every entity the client knows about.
pub struct EntityCache {
    servers: DashMap<u64, Arc<Server>>,
    channels: DashMap<u64, Arc<Channel>>,
    users: DashMap<u64, Arc<User>>,
}

impl EntityCache {
    /// Create a new empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get a tracked server.
    pub fn get(&self, id: u64) -> Option<Arc<Server>> {
        self.servers.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Start tracking a server, returning the existing entry if tracked.
    ///
    /// New servers start with every field absent.
    pub fn track_server(&self, id: u64) -> Arc<Server> {
        let server = self
            .servers
            .entry(id)
            .or_insert_with(|| Arc::new(Server::new(id)));
        Arc::clone(server.value())
    }

    /// Stop tracking a server.
    pub fn remove_server(&self, id: u64) -> Option<Arc<Server>> {
        let removed = self.servers.remove(&id).map(|(_, server)| server);
        if removed.is_some() {
            trace!(server_id = %id, "cache: server removed");
        }
        removed
    }

    /// Current value of one field of a tracked server.
    pub fn current_value(&self, id: u64, field: ServerField) -> Option<FieldValue> {
        self.get(id).map(|server| server.current_value(field))
    }

    /// Write one field of a tracked server.
    ///
    /// Returns false if the server is not tracked.
    pub fn apply(&self, id: u64, field: ServerField, value: FieldValue) -> bool {
        match self.get(id) {
            Some(server) => {
                server.apply(field, value);
                true
            }
            None => false,
        }
    }

    /// Insert a user, or update the name of the already interned user.
    pub fn insert_user(&self, id: u64, name: impl Into<String>) -> Arc<User> {
        use dashmap::mapref::entry::Entry;

        let name = name.into();
        match self.users.entry(id) {
            Entry::Occupied(entry) => {
                let user = Arc::clone(entry.get());
                *user.name.write() = name;
                user
            }
            Entry::Vacant(entry) => {
                let user = Arc::new(User {
                    id,
                    name: RwLock::new(name),
                });
                entry.insert(Arc::clone(&user));
                trace!(user_id = %id, "cache: user inserted");
                user
            }
        }
    }

    pub fn user(&self, id: u64) -> Option<Arc<User>> {
        self.users.get(&id).map(|u| Arc::clone(u.value()))
    }

    /// Insert a channel, or update the state of the already interned channel.
    ///
    /// The id, owning server and kind of an interned channel never change.
    pub fn insert_channel(
        &self,
        id: u64,
        server_id: u64,
        kind: ChannelKind,
        name: impl Into<String>,
        position: i64,
        overwrites: OverwriteTables,
    ) -> Arc<Channel> {
        use dashmap::mapref::entry::Entry;

        let state = ChannelState {
            name: name.into(),
            position,
            overwrites,
        };
        match self.channels.entry(id) {
            Entry::Occupied(entry) => {
                let channel = Arc::clone(entry.get());
                *channel.state.write() = state;
                channel
            }
            Entry::Vacant(entry) => {
                let channel = Arc::new(Channel {
                    id,
                    server_id,
                    kind,
                    state: RwLock::new(state),
                });
                entry.insert(Arc::clone(&channel));
                trace!(channel_id = %id, server_id = %server_id, "cache: channel inserted");
                channel
            }
        }
    }

    pub fn channel(&self, id: u64) -> Option<Arc<Channel>> {
        self.channels.get(&id).map(|c| Arc::clone(c.value()))
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self {
            servers: DashMap::new(),
            channels: DashMap::new(),
            users: DashMap::new(),
        }
    }
}
