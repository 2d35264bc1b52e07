//! Change records produced by the differ and the events built from them.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{Channel, Server, User};
use crate::field::{FieldValue, ServerField};
use crate::types::{
    DefaultMessageNotificationLevel, ExplicitContentFilterLevel, MultiFactorAuthenticationLevel,
    Region, VerificationLevel,
};

/// Where an inbound update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    /// Gateway sequence number of the payload, if it carried one.
    pub sequence: Option<u64>,
    /// When the payload was handed to the mirror.
    pub received_at: DateTime<Utc>,
}

impl EventContext {
    pub fn new(sequence: Option<u64>) -> Self {
        Self {
            sequence,
            received_at: Utc::now(),
        }
    }
}

/// One field that changed, as detected by the differ.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub server_id: u64,
    pub field: ServerField,
    pub old: FieldValue,
    pub new: FieldValue,
}

impl ChangeRecord {
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Old and new value of one changed field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange<T> {
    pub old: T,
    pub new: T,
}

/// A typed change, one variant per field that notifies listeners.
#[derive(Debug, Clone)]
pub enum ServerChange {
    Name(FieldChange<String>),
    Icon(FieldChange<Option<String>>),
    Splash(FieldChange<Option<String>>),
    VerificationLevel(FieldChange<VerificationLevel>),
    Region(FieldChange<Region>),
    DefaultMessageNotificationLevel(FieldChange<DefaultMessageNotificationLevel>),
    Owner(FieldChange<Option<Arc<User>>>),
    SystemChannel(FieldChange<Option<Arc<Channel>>>),
    AfkChannel(FieldChange<Option<Arc<Channel>>>),
    AfkTimeout(FieldChange<i64>),
    ExplicitContentFilterLevel(FieldChange<ExplicitContentFilterLevel>),
    MultiFactorAuthenticationLevel(FieldChange<MultiFactorAuthenticationLevel>),
}

impl ServerChange {
    /// The field this change belongs to.
    pub fn field(&self) -> ServerField {
        match self {
            ServerChange::Name(_) => ServerField::Name,
            ServerChange::Icon(_) => ServerField::Icon,
            ServerChange::Splash(_) => ServerField::Splash,
            ServerChange::VerificationLevel(_) => ServerField::VerificationLevel,
            ServerChange::Region(_) => ServerField::Region,
            ServerChange::DefaultMessageNotificationLevel(_) => {
                ServerField::DefaultMessageNotificationLevel
            }
            ServerChange::Owner(_) => ServerField::Owner,
            ServerChange::SystemChannel(_) => ServerField::SystemChannel,
            ServerChange::AfkChannel(_) => ServerField::AfkChannel,
            ServerChange::AfkTimeout(_) => ServerField::AfkTimeout,
            ServerChange::ExplicitContentFilterLevel(_) => ServerField::ExplicitContentFilterLevel,
            ServerChange::MultiFactorAuthenticationLevel(_) => {
                ServerField::MultiFactorAuthenticationLevel
            }
        }
    }
}

/// Notification delivered to listeners for one changed field.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub context: EventContext,
    pub server: Arc<Server>,
    pub change: ServerChange,
}

impl ChangeEvent {
    pub fn field(&self) -> ServerField {
        self.change.field()
    }
}
