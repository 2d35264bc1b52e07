//! Resolution of ids embedded in snapshots against the cache.

use std::sync::Arc;

use tracing::trace;

use crate::cache::{Channel, EntityCache, User};
use crate::types::ChannelKind;

/// What kind of entity an embedded id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    User,
    /// A text channel belonging to the given server.
    TextChannel { server_id: u64 },
    /// A voice channel belonging to the given server.
    VoiceChannel { server_id: u64 },
}

/// A resolved reference to a cached entity.
#[derive(Debug, Clone)]
pub enum EntityRef {
    User(Arc<User>),
    Channel(Arc<Channel>),
}

/// Read-only lookup of embedded ids.
///
/// Absence is a normal outcome: the referent may simply not have arrived
/// yet. Resolution never fails and never mutates the cache.
#[derive(Clone, Copy)]
pub struct ForeignKeyResolver<'a> {
    cache: &'a EntityCache,
}

impl<'a> ForeignKeyResolver<'a> {
    pub fn new(cache: &'a EntityCache) -> Self {
        Self { cache }
    }

    /// Resolve an id. Zero is the sentinel for "no reference".
    pub fn resolve(&self, raw_id: u64, kind: LookupKind) -> Option<EntityRef> {
        if raw_id == 0 {
            return None;
        }
        let resolved = match kind {
            LookupKind::User => self.cache.user(raw_id).map(EntityRef::User),
            LookupKind::TextChannel { server_id } => self
                .server_channel(raw_id, server_id, ChannelKind::Text)
                .map(EntityRef::Channel),
            LookupKind::VoiceChannel { server_id } => self
                .server_channel(raw_id, server_id, ChannelKind::Voice)
                .map(EntityRef::Channel),
        };
        if resolved.is_none() {
            trace!(raw_id = %raw_id, kind = ?kind, "reference not in cache");
        }
        resolved
    }

    fn server_channel(&self, id: u64, server_id: u64, kind: ChannelKind) -> Option<Arc<Channel>> {
        self.cache
            .channel(id)
            .filter(|channel| channel.server_id() == server_id && channel.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OverwriteTables;

    fn cache_with_channels() -> Arc<EntityCache> {
        let cache = EntityCache::new();
        cache.insert_user(7, "bob");
        cache.insert_channel(10, 1, ChannelKind::Text, "general", 0, OverwriteTables::default());
        cache.insert_channel(11, 1, ChannelKind::Voice, "lounge", 1, OverwriteTables::default());
        cache.insert_channel(12, 2, ChannelKind::Text, "other", 0, OverwriteTables::default());
        cache
    }

    #[test]
    fn test_resolve_user() {
        let cache = cache_with_channels();
        let resolver = ForeignKeyResolver::new(&cache);

        match resolver.resolve(7, LookupKind::User) {
            Some(EntityRef::User(user)) => {
                assert!(Arc::ptr_eq(&user, &cache.user(7).unwrap()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(resolver.resolve(8, LookupKind::User).is_none());
    }

    #[test]
    fn test_resolve_zero_is_none() {
        let cache = cache_with_channels();
        let resolver = ForeignKeyResolver::new(&cache);
        assert!(resolver.resolve(0, LookupKind::User).is_none());
    }

    #[test]
    fn test_resolve_channel_checks_kind_and_server() {
        let cache = cache_with_channels();
        let resolver = ForeignKeyResolver::new(&cache);

        assert!(
            resolver
                .resolve(10, LookupKind::TextChannel { server_id: 1 })
                .is_some()
        );
        assert!(
            resolver
                .resolve(10, LookupKind::VoiceChannel { server_id: 1 })
                .is_none()
        );
        assert!(
            resolver
                .resolve(11, LookupKind::VoiceChannel { server_id: 1 })
                .is_some()
        );
        // Channel 12 belongs to another server.
        assert!(
            resolver
                .resolve(12, LookupKind::TextChannel { server_id: 1 })
                .is_none()
        );
    }

    #[test]
    fn test_resolve_does_not_mutate() {
        let cache = cache_with_channels();
        let resolver = ForeignKeyResolver::new(&cache);
        let _ = resolver.resolve(999, LookupKind::User);
        assert_eq!(cache.user_count(), 1);
        assert_eq!(cache.channel_count(), 3);
    }
}
