//! Core value types shared by the cache, the differ and the updaters.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Read a snowflake id from a JSON value.
///
/// The API sends ids as decimal strings, but numeric ids are accepted too.
/// Returns `None` for null, negative numbers and anything unparsable.
pub fn parse_snowflake(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Serde helper for snowflake fields encoded as strings or numbers.
pub(crate) fn deserialize_snowflake<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_snowflake(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid snowflake: {}", value)))
}

/// Serde helper for optional snowflake fields.
pub(crate) fn deserialize_optional_snowflake<'de, D>(
    deserializer: D,
) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    parse_snowflake(&value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid snowflake: {}", value)))
}

/// Defines a server setting that the API transmits as a small integer.
///
/// Ids the client does not know about map to `Unknown` instead of failing,
/// so a new level introduced upstream never breaks snapshot processing.
macro_rules! define_level {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident = $id:literal ),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )*
            /// An id this client does not recognize.
            Unknown,
        }

        impl $name {
            /// Map a raw API id to a level.
            pub fn from_id(id: i64) -> Self {
                match id {
                    $( $id => Self::$variant, )*
                    _ => Self::Unknown,
                }
            }

            /// The raw API id, or -1 for `Unknown`.
            pub fn id(self) -> i64 {
                match self {
                    $( Self::$variant => $id, )*
                    Self::Unknown => -1,
                }
            }
        }
    };
}

define_level! {
    /// Verification required before members can talk.
    VerificationLevel {
        None = 0,
        Low = 1,
        Medium = 2,
        High = 3,
        VeryHigh = 4,
    }
}

define_level! {
    /// Which messages notify members by default.
    DefaultMessageNotificationLevel {
        AllMessages = 0,
        OnlyMentions = 1,
    }
}

define_level! {
    /// Whose media content is scanned.
    ExplicitContentFilterLevel {
        Disabled = 0,
        MembersWithoutRoles = 1,
        AllMembers = 2,
    }
}

define_level! {
    /// Two-factor requirement for moderation actions.
    MultiFactorAuthenticationLevel {
        None = 0,
        Elevated = 1,
    }
}

/// Voice region of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Amsterdam,
    Brazil,
    EuCentral,
    EuWest,
    Frankfurt,
    HongKong,
    Japan,
    London,
    Russia,
    Singapore,
    SouthAfrica,
    Sydney,
    UsCentral,
    UsEast,
    UsSouth,
    UsWest,
    /// A region key this client does not recognize.
    Unknown,
}

impl Region {
    const KEYS: [(&'static str, Region); 16] = [
        ("amsterdam", Region::Amsterdam),
        ("brazil", Region::Brazil),
        ("eu-central", Region::EuCentral),
        ("eu-west", Region::EuWest),
        ("frankfurt", Region::Frankfurt),
        ("hongkong", Region::HongKong),
        ("japan", Region::Japan),
        ("london", Region::London),
        ("russia", Region::Russia),
        ("singapore", Region::Singapore),
        ("southafrica", Region::SouthAfrica),
        ("sydney", Region::Sydney),
        ("us-central", Region::UsCentral),
        ("us-east", Region::UsEast),
        ("us-south", Region::UsSouth),
        ("us-west", Region::UsWest),
    ];

    /// Look up a region by its API key.
    pub fn from_key(key: &str) -> Self {
        Self::KEYS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, region)| *region)
            .unwrap_or(Region::Unknown)
    }

    /// The API key, or `None` for `Unknown`.
    pub fn key(self) -> Option<&'static str> {
        Self::KEYS
            .iter()
            .find(|(_, region)| *region == self)
            .map(|(k, _)| *k)
    }
}

/// Kind of a server channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    /// A channel type this client does not track.
    Other(u8),
}

impl ChannelKind {
    /// Map the API `type` integer to a kind.
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => ChannelKind::Text,
            2 => ChannelKind::Voice,
            4 => ChannelKind::Category,
            other => ChannelKind::Other(other),
        }
    }
}

/// Allowed and denied permission bitmasks of one overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(rename = "allow")]
    pub allowed: u64,
    #[serde(rename = "deny")]
    pub denied: u64,
}

impl Permissions {
    pub fn new(allowed: u64, denied: u64) -> Self {
        Self { allowed, denied }
    }
}

/// Whether an overwrite targets a member or a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteKind {
    Member,
    Role,
}

impl OverwriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OverwriteKind::Member => "member",
            OverwriteKind::Role => "role",
        }
    }
}

/// Key of one entry in a channel's overwrite tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverwriteSubject {
    /// A user id.
    Member(u64),
    /// A role id.
    Role(u64),
}

impl OverwriteSubject {
    pub fn id(self) -> u64 {
        match self {
            OverwriteSubject::Member(id) | OverwriteSubject::Role(id) => id,
        }
    }

    pub fn kind(self) -> OverwriteKind {
        match self {
            OverwriteSubject::Member(_) => OverwriteKind::Member,
            OverwriteSubject::Role(_) => OverwriteKind::Role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_snowflake() {
        assert_eq!(parse_snowflake(&json!("123")), Some(123));
        assert_eq!(parse_snowflake(&json!(456)), Some(456));
        assert_eq!(
            parse_snowflake(&json!("18446744073709551615")),
            Some(u64::MAX)
        );
        assert_eq!(parse_snowflake(&json!(null)), None);
        assert_eq!(parse_snowflake(&json!("abc")), None);
        assert_eq!(parse_snowflake(&json!(-1)), None);
        assert_eq!(parse_snowflake(&json!(true)), None);
    }

    #[test]
    fn test_level_from_id() {
        assert_eq!(VerificationLevel::from_id(3), VerificationLevel::High);
        assert_eq!(VerificationLevel::from_id(99), VerificationLevel::Unknown);
        assert_eq!(VerificationLevel::Unknown.id(), -1);
        assert_eq!(
            ExplicitContentFilterLevel::from_id(2),
            ExplicitContentFilterLevel::AllMembers
        );
        assert_eq!(
            MultiFactorAuthenticationLevel::from_id(1).id(),
            MultiFactorAuthenticationLevel::Elevated.id()
        );
    }

    #[test]
    fn test_region_keys() {
        assert_eq!(Region::from_key("eu-west"), Region::EuWest);
        assert_eq!(Region::from_key("moon-base"), Region::Unknown);
        assert_eq!(Region::UsEast.key(), Some("us-east"));
        assert_eq!(Region::Unknown.key(), None);
    }

    #[test]
    fn test_overwrite_kind_serde() {
        let kind: OverwriteKind = serde_json::from_value(json!("member")).unwrap();
        assert_eq!(kind, OverwriteKind::Member);
        assert_eq!(serde_json::to_value(OverwriteKind::Role).unwrap(), json!("role"));
    }

    #[test]
    fn test_overwrite_subject() {
        let subject = OverwriteSubject::Role(7);
        assert_eq!(subject.id(), 7);
        assert_eq!(subject.kind().as_str(), "role");
    }
}
