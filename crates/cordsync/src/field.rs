//! Tracked server fields and the descriptor table that drives diffing.
//!
//! Every trackable field is one row of [`DESCRIPTORS`]: the snapshot key it
//! is read from, how to extract (and resolve) its value, and how to build
//! the typed change event for it. The differ walks the table once per
//! snapshot and the dispatcher uses the same rows to build events, so
//! tracking another field means adding a `ServerField` variant and a row.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::cache::{Channel, User};
use crate::differ::GuildSnapshot;
use crate::event::{FieldChange, ServerChange};
use crate::resolver::{EntityRef, ForeignKeyResolver, LookupKind};
use crate::types::{
    DefaultMessageNotificationLevel, ExplicitContentFilterLevel, MultiFactorAuthenticationLevel,
    Region, VerificationLevel, parse_snowflake,
};

/// A server field tracked by the cache.
///
/// Declaration order is processing order and matches [`DESCRIPTORS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServerField {
    ApplicationId,
    Name,
    Icon,
    Splash,
    VerificationLevel,
    Region,
    DefaultMessageNotificationLevel,
    Owner,
    SystemChannel,
    AfkChannel,
    AfkTimeout,
    ExplicitContentFilterLevel,
    MultiFactorAuthenticationLevel,
}

impl ServerField {
    pub const COUNT: usize = 13;

    pub const ALL: [ServerField; Self::COUNT] = [
        ServerField::ApplicationId,
        ServerField::Name,
        ServerField::Icon,
        ServerField::Splash,
        ServerField::VerificationLevel,
        ServerField::Region,
        ServerField::DefaultMessageNotificationLevel,
        ServerField::Owner,
        ServerField::SystemChannel,
        ServerField::AfkChannel,
        ServerField::AfkTimeout,
        ServerField::ExplicitContentFilterLevel,
        ServerField::MultiFactorAuthenticationLevel,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Snapshot key this field is read from.
    pub fn key(self) -> &'static str {
        descriptor(self).key
    }

    /// Whether a change of this field produces a change event.
    pub fn emits_events(self) -> bool {
        descriptor(self).event.is_some()
    }
}

/// The value of one server field.
///
/// Equality is by value for scalars and by identity for references: two
/// `User`/`Channel` values are equal only if they are the same interned
/// `Arc`. The cache interns users and channels by id, so identity and id
/// equality coincide for resolved references.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Not set, or explicitly cleared.
    Absent,
    Text(String),
    Integer(i64),
    Snowflake(u64),
    VerificationLevel(VerificationLevel),
    Region(Region),
    DefaultMessageNotificationLevel(DefaultMessageNotificationLevel),
    ExplicitContentFilterLevel(ExplicitContentFilterLevel),
    MultiFactorAuthenticationLevel(MultiFactorAuthenticationLevel),
    User(Arc<User>),
    Channel(Arc<Channel>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Absent, FieldValue::Absent) => true,
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Snowflake(a), FieldValue::Snowflake(b)) => a == b,
            (FieldValue::VerificationLevel(a), FieldValue::VerificationLevel(b)) => a == b,
            (FieldValue::Region(a), FieldValue::Region(b)) => a == b,
            (
                FieldValue::DefaultMessageNotificationLevel(a),
                FieldValue::DefaultMessageNotificationLevel(b),
            ) => a == b,
            (FieldValue::ExplicitContentFilterLevel(a), FieldValue::ExplicitContentFilterLevel(b)) => {
                a == b
            }
            (
                FieldValue::MultiFactorAuthenticationLevel(a),
                FieldValue::MultiFactorAuthenticationLevel(b),
            ) => a == b,
            (FieldValue::User(a), FieldValue::User(b)) => Arc::ptr_eq(a, b),
            (FieldValue::Channel(a), FieldValue::Channel(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn snowflake(&self) -> Option<u64> {
        match self {
            FieldValue::Snowflake(id) => Some(*id),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&Arc<User>> {
        match self {
            FieldValue::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn channel(&self) -> Option<&Arc<Channel>> {
        match self {
            FieldValue::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn verification_level(&self) -> VerificationLevel {
        match self {
            FieldValue::VerificationLevel(level) => *level,
            _ => VerificationLevel::Unknown,
        }
    }

    pub fn region(&self) -> Region {
        match self {
            FieldValue::Region(region) => *region,
            _ => Region::Unknown,
        }
    }

    pub fn default_message_notification_level(&self) -> DefaultMessageNotificationLevel {
        match self {
            FieldValue::DefaultMessageNotificationLevel(level) => *level,
            _ => DefaultMessageNotificationLevel::Unknown,
        }
    }

    pub fn explicit_content_filter_level(&self) -> ExplicitContentFilterLevel {
        match self {
            FieldValue::ExplicitContentFilterLevel(level) => *level,
            _ => ExplicitContentFilterLevel::Unknown,
        }
    }

    pub fn multi_factor_authentication_level(&self) -> MultiFactorAuthenticationLevel {
        match self {
            FieldValue::MultiFactorAuthenticationLevel(level) => *level,
            _ => MultiFactorAuthenticationLevel::Unknown,
        }
    }
}

impl From<EntityRef> for FieldValue {
    fn from(entity: EntityRef) -> Self {
        match entity {
            EntityRef::User(user) => FieldValue::User(user),
            EntityRef::Channel(channel) => FieldValue::Channel(channel),
        }
    }
}

/// Result of reading one field out of a snapshot.
#[derive(Debug)]
pub(crate) enum Extracted {
    /// The key is not in the snapshot; the field is left alone.
    NotPresent,
    /// The new value, with references already resolved.
    Value(FieldValue),
    /// A non-null reference whose referent is not cached.
    Unresolved(u64),
}

type Extractor = fn(&GuildSnapshot, &'static str, &ForeignKeyResolver<'_>) -> Extracted;
type EventConstructor = fn(&FieldValue, &FieldValue) -> ServerChange;

/// Declarative description of one tracked field.
pub(crate) struct FieldDescriptor {
    pub field: ServerField,
    pub key: &'static str,
    pub extract: Extractor,
    /// `None` for fields that are cached without notifying listeners.
    pub event: Option<EventConstructor>,
}

impl FieldDescriptor {
    pub fn extract(&self, snapshot: &GuildSnapshot, resolver: &ForeignKeyResolver<'_>) -> Extracted {
        (self.extract)(snapshot, self.key, resolver)
    }
}

pub(crate) static DESCRIPTORS: [FieldDescriptor; ServerField::COUNT] = [
    FieldDescriptor {
        field: ServerField::ApplicationId,
        key: "application_id",
        extract: extract_snowflake,
        event: None,
    },
    FieldDescriptor {
        field: ServerField::Name,
        key: "name",
        extract: extract_text,
        event: Some(name_changed),
    },
    FieldDescriptor {
        field: ServerField::Icon,
        key: "icon",
        extract: extract_text,
        event: Some(icon_changed),
    },
    FieldDescriptor {
        field: ServerField::Splash,
        key: "splash",
        extract: extract_text,
        event: Some(splash_changed),
    },
    FieldDescriptor {
        field: ServerField::VerificationLevel,
        key: "verification_level",
        extract: extract_verification_level,
        event: Some(verification_level_changed),
    },
    FieldDescriptor {
        field: ServerField::Region,
        key: "region",
        extract: extract_region,
        event: Some(region_changed),
    },
    FieldDescriptor {
        field: ServerField::DefaultMessageNotificationLevel,
        key: "default_message_notifications",
        extract: extract_default_message_notification_level,
        event: Some(default_message_notification_level_changed),
    },
    FieldDescriptor {
        field: ServerField::Owner,
        key: "owner_id",
        extract: extract_owner,
        event: Some(owner_changed),
    },
    FieldDescriptor {
        field: ServerField::SystemChannel,
        key: "system_channel_id",
        extract: extract_text_channel,
        event: Some(system_channel_changed),
    },
    FieldDescriptor {
        field: ServerField::AfkChannel,
        key: "afk_channel_id",
        extract: extract_voice_channel,
        event: Some(afk_channel_changed),
    },
    FieldDescriptor {
        field: ServerField::AfkTimeout,
        key: "afk_timeout",
        extract: extract_integer,
        event: Some(afk_timeout_changed),
    },
    FieldDescriptor {
        field: ServerField::ExplicitContentFilterLevel,
        key: "explicit_content_filter",
        extract: extract_explicit_content_filter_level,
        event: Some(explicit_content_filter_level_changed),
    },
    FieldDescriptor {
        field: ServerField::MultiFactorAuthenticationLevel,
        key: "mfa_level",
        extract: extract_multi_factor_authentication_level,
        event: Some(multi_factor_authentication_level_changed),
    },
];

/// Descriptor row for a field.
pub(crate) fn descriptor(field: ServerField) -> &'static FieldDescriptor {
    &DESCRIPTORS[field.index()]
}

// =========================================================================
// Extractors
// =========================================================================

/// Map a present key to a value. Null clears the field; a value of the
/// wrong type is treated the same as null.
fn extract_with(
    snapshot: &GuildSnapshot,
    key: &'static str,
    convert: impl FnOnce(&Value) -> Option<FieldValue>,
) -> Extracted {
    let Some(raw) = snapshot.get(key) else {
        return Extracted::NotPresent;
    };
    if raw.is_null() {
        return Extracted::Value(FieldValue::Absent);
    }
    match convert(raw) {
        Some(value) => Extracted::Value(value),
        None => {
            debug!(server_id = %snapshot.id(), key, value = %raw, "unexpected value type, clearing field");
            Extracted::Value(FieldValue::Absent)
        }
    }
}

fn extract_text(snapshot: &GuildSnapshot, key: &'static str, _: &ForeignKeyResolver<'_>) -> Extracted {
    extract_with(snapshot, key, |raw| {
        raw.as_str().map(|s| FieldValue::Text(s.to_string()))
    })
}

fn extract_integer(
    snapshot: &GuildSnapshot,
    key: &'static str,
    _: &ForeignKeyResolver<'_>,
) -> Extracted {
    extract_with(snapshot, key, |raw| raw.as_i64().map(FieldValue::Integer))
}

fn extract_snowflake(
    snapshot: &GuildSnapshot,
    key: &'static str,
    _: &ForeignKeyResolver<'_>,
) -> Extracted {
    extract_with(snapshot, key, |raw| parse_snowflake(raw).map(FieldValue::Snowflake))
}

fn extract_verification_level(
    snapshot: &GuildSnapshot,
    key: &'static str,
    _: &ForeignKeyResolver<'_>,
) -> Extracted {
    extract_with(snapshot, key, |raw| {
        raw.as_i64()
            .map(|id| FieldValue::VerificationLevel(VerificationLevel::from_id(id)))
    })
}

fn extract_region(snapshot: &GuildSnapshot, key: &'static str, _: &ForeignKeyResolver<'_>) -> Extracted {
    extract_with(snapshot, key, |raw| {
        raw.as_str().map(|key| FieldValue::Region(Region::from_key(key)))
    })
}

fn extract_default_message_notification_level(
    snapshot: &GuildSnapshot,
    key: &'static str,
    _: &ForeignKeyResolver<'_>,
) -> Extracted {
    extract_with(snapshot, key, |raw| {
        raw.as_i64().map(|id| {
            FieldValue::DefaultMessageNotificationLevel(DefaultMessageNotificationLevel::from_id(id))
        })
    })
}

fn extract_explicit_content_filter_level(
    snapshot: &GuildSnapshot,
    key: &'static str,
    _: &ForeignKeyResolver<'_>,
) -> Extracted {
    extract_with(snapshot, key, |raw| {
        raw.as_i64().map(|id| {
            FieldValue::ExplicitContentFilterLevel(ExplicitContentFilterLevel::from_id(id))
        })
    })
}

fn extract_multi_factor_authentication_level(
    snapshot: &GuildSnapshot,
    key: &'static str,
    _: &ForeignKeyResolver<'_>,
) -> Extracted {
    extract_with(snapshot, key, |raw| {
        raw.as_i64().map(|id| {
            FieldValue::MultiFactorAuthenticationLevel(MultiFactorAuthenticationLevel::from_id(id))
        })
    })
}

/// Resolve a reference key. Null, zero and unparsable ids clear the field.
fn extract_reference(
    snapshot: &GuildSnapshot,
    key: &'static str,
    resolver: &ForeignKeyResolver<'_>,
    kind: LookupKind,
) -> Extracted {
    let Some(raw) = snapshot.get(key) else {
        return Extracted::NotPresent;
    };
    match parse_snowflake(raw) {
        None | Some(0) => Extracted::Value(FieldValue::Absent),
        Some(id) => match resolver.resolve(id, kind) {
            Some(entity) => Extracted::Value(entity.into()),
            None => Extracted::Unresolved(id),
        },
    }
}

fn extract_owner(
    snapshot: &GuildSnapshot,
    key: &'static str,
    resolver: &ForeignKeyResolver<'_>,
) -> Extracted {
    extract_reference(snapshot, key, resolver, LookupKind::User)
}

fn extract_text_channel(
    snapshot: &GuildSnapshot,
    key: &'static str,
    resolver: &ForeignKeyResolver<'_>,
) -> Extracted {
    let kind = LookupKind::TextChannel {
        server_id: snapshot.id(),
    };
    extract_reference(snapshot, key, resolver, kind)
}

fn extract_voice_channel(
    snapshot: &GuildSnapshot,
    key: &'static str,
    resolver: &ForeignKeyResolver<'_>,
) -> Extracted {
    let kind = LookupKind::VoiceChannel {
        server_id: snapshot.id(),
    };
    extract_reference(snapshot, key, resolver, kind)
}

// =========================================================================
// Event constructors
// =========================================================================

fn change<T>(old: &FieldValue, new: &FieldValue, read: impl Fn(&FieldValue) -> T) -> FieldChange<T> {
    FieldChange {
        old: read(old),
        new: read(new),
    }
}

fn name_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::Name(change(old, new, |v| v.text().unwrap_or_default().to_string()))
}

fn icon_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::Icon(change(old, new, |v| v.text().map(str::to_string)))
}

fn splash_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::Splash(change(old, new, |v| v.text().map(str::to_string)))
}

fn verification_level_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::VerificationLevel(change(old, new, FieldValue::verification_level))
}

fn region_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::Region(change(old, new, FieldValue::region))
}

fn default_message_notification_level_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::DefaultMessageNotificationLevel(change(
        old,
        new,
        FieldValue::default_message_notification_level,
    ))
}

fn owner_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::Owner(change(old, new, |v| v.user().cloned()))
}

fn system_channel_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::SystemChannel(change(old, new, |v| v.channel().cloned()))
}

fn afk_channel_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::AfkChannel(change(old, new, |v| v.channel().cloned()))
}

fn afk_timeout_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::AfkTimeout(change(old, new, |v| v.integer().unwrap_or_default()))
}

fn explicit_content_filter_level_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::ExplicitContentFilterLevel(change(
        old,
        new,
        FieldValue::explicit_content_filter_level,
    ))
}

fn multi_factor_authentication_level_changed(old: &FieldValue, new: &FieldValue) -> ServerChange {
    ServerChange::MultiFactorAuthenticationLevel(change(
        old,
        new,
        FieldValue::multi_factor_authentication_level,
    ))
}
