//! Staged updates: collect local changes and commit them as one request.
//!
//! An updater is bound to one channel or server. Setters only stage
//! values; nothing is sent until `commit`, which issues at most one PATCH
//! containing exactly the staged fields. Committing with nothing staged
//! sends no request and succeeds.
//!
//! Updaters never touch the cache. The mirrored state changes when the
//! resulting update comes back through the gateway.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, trace};

use crate::SyncError;
use crate::cache::{Channel, HasOverwriteTables, OverwriteTables, Server};
use crate::rest::{RequestSink, RestEndpoint, RestMethod, RestRequest};
use crate::types::{
    DefaultMessageNotificationLevel, ExplicitContentFilterLevel, OverwriteSubject, Permissions,
    Region, VerificationLevel,
};

/// Staged state of one updater.
///
/// A key present in `fields` is staged; `Value::Null` is an explicitly
/// staged null, which is different from not staging the key at all.
#[derive(Debug, Clone, Default)]
pub struct PendingUpdate {
    fields: Map<String, Value>,
    /// Full overwrite tables, seeded from the target on first use.
    overwrites: Option<OverwriteTables>,
    reason: Option<String>,
}

impl PendingUpdate {
    /// Stage a field value; the last value staged for a key wins.
    pub fn stage(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    /// Overwrite tables to edit, copying the target's tables the first
    /// time so the request always carries the complete tables.
    fn overwrites_mut(&mut self, target: &dyn HasOverwriteTables) -> &mut OverwriteTables {
        self.overwrites
            .get_or_insert_with(|| target.overwrite_tables())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.overwrites.is_none()
    }

    /// Request body containing only what was staged, or `None` if nothing was.
    pub fn body(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let mut body = self.fields.clone();
        if let Some(tables) = &self.overwrites {
            body.insert(
                "permission_overwrites".to_string(),
                Value::Array(overwrite_entries(tables)),
            );
        }
        Some(Value::Object(body))
    }

    /// Build the PATCH for a target, or `None` if nothing was staged.
    fn request(&self, endpoint: RestEndpoint, id: u64) -> Option<RestRequest> {
        let body = self.body()?;
        Some(
            RestRequest::new(RestMethod::Patch, endpoint)
                .with_url_param(id.to_string())
                .with_body(body)
                .with_audit_reason(self.reason.clone()),
        )
    }

    /// Send the staged update through `sink`.
    ///
    /// Staged state is left in place, so committing again re-sends the
    /// same request.
    async fn commit(
        &self,
        sink: &dyn RequestSink,
        endpoint: RestEndpoint,
        id: u64,
    ) -> Result<(), SyncError> {
        let Some(request) = self.request(endpoint, id) else {
            trace!(endpoint = ?endpoint, id = %id, "nothing staged, skipping request");
            return Ok(());
        };
        debug!(endpoint = ?endpoint, id = %id, fields = ?self.fields.keys().collect::<Vec<_>>(), "committing staged update");
        sink.execute(request).await
    }
}

/// Serialize overwrite tables: members first, then roles, by ascending id.
fn overwrite_entries(tables: &OverwriteTables) -> Vec<Value> {
    let members = tables
        .members
        .iter()
        .map(|(id, p)| (OverwriteSubject::Member(*id), *p));
    let roles = tables
        .roles
        .iter()
        .map(|(id, p)| (OverwriteSubject::Role(*id), *p));
    members
        .chain(roles)
        .map(|(subject, permissions)| {
            json!({
                "id": subject.id().to_string(),
                "type": subject.kind().as_str(),
                "allow": permissions.allowed,
                "deny": permissions.denied,
            })
        })
        .collect()
}

fn optional_snowflake(id: Option<u64>) -> Value {
    id.map_or(Value::Null, |id| Value::String(id.to_string()))
}

/// Staged update of one channel.
pub struct ChannelUpdater {
    channel: Arc<Channel>,
    sink: Arc<dyn RequestSink>,
    pending: PendingUpdate,
}

impl ChannelUpdater {
    pub fn new(channel: Arc<Channel>, sink: Arc<dyn RequestSink>) -> Self {
        Self {
            channel,
            sink,
            pending: PendingUpdate::default(),
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn pending(&self) -> &PendingUpdate {
        &self.pending
    }

    pub fn set_audit_log_reason(&mut self, reason: impl Into<String>) -> &mut Self {
        self.pending.set_reason(reason);
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.pending.stage("name", Value::String(name.into()));
        self
    }

    pub fn set_raw_position(&mut self, position: i64) -> &mut Self {
        self.pending.stage("position", json!(position));
        self
    }

    /// Stage the topic; `None` clears it.
    pub fn set_topic(&mut self, topic: Option<String>) -> &mut Self {
        self.pending
            .stage("topic", topic.map_or(Value::Null, Value::String));
        self
    }

    /// Stage the parent category; `None` moves the channel out of any category.
    pub fn set_parent(&mut self, category_id: Option<u64>) -> &mut Self {
        self.pending.stage("parent_id", optional_snowflake(category_id));
        self
    }

    pub fn add_permission_overwrite(
        &mut self,
        subject: OverwriteSubject,
        permissions: Permissions,
    ) -> &mut Self {
        self.pending
            .overwrites_mut(self.channel.as_ref())
            .upsert(subject, permissions);
        self
    }

    pub fn remove_permission_overwrite(&mut self, subject: OverwriteSubject) -> &mut Self {
        self.pending
            .overwrites_mut(self.channel.as_ref())
            .remove(subject);
        self
    }

    /// Send everything staged as one request.
    pub async fn commit(&self) -> Result<(), SyncError> {
        self.pending
            .commit(self.sink.as_ref(), RestEndpoint::Channel, self.channel.id())
            .await
    }
}

/// Staged update of one server's settings.
pub struct ServerUpdater {
    server: Arc<Server>,
    sink: Arc<dyn RequestSink>,
    pending: PendingUpdate,
}

impl ServerUpdater {
    pub fn new(server: Arc<Server>, sink: Arc<dyn RequestSink>) -> Self {
        Self {
            server,
            sink,
            pending: PendingUpdate::default(),
        }
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn pending(&self) -> &PendingUpdate {
        &self.pending
    }

    pub fn set_audit_log_reason(&mut self, reason: impl Into<String>) -> &mut Self {
        self.pending.set_reason(reason);
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.pending.stage("name", Value::String(name.into()));
        self
    }

    /// Stage the voice region. `Region::Unknown` has no key and is staged as null.
    pub fn set_region(&mut self, region: Region) -> &mut Self {
        let value = region
            .key()
            .map_or(Value::Null, |key| Value::String(key.to_string()));
        self.pending.stage("region", value);
        self
    }

    pub fn set_verification_level(&mut self, level: VerificationLevel) -> &mut Self {
        self.pending.stage("verification_level", json!(level.id()));
        self
    }

    pub fn set_default_message_notification_level(
        &mut self,
        level: DefaultMessageNotificationLevel,
    ) -> &mut Self {
        self.pending
            .stage("default_message_notifications", json!(level.id()));
        self
    }

    pub fn set_explicit_content_filter_level(
        &mut self,
        level: ExplicitContentFilterLevel,
    ) -> &mut Self {
        self.pending.stage("explicit_content_filter", json!(level.id()));
        self
    }

    pub fn set_afk_timeout(&mut self, seconds: i64) -> &mut Self {
        self.pending.stage("afk_timeout", json!(seconds));
        self
    }

    /// Stage the AFK channel; `None` disables it.
    pub fn set_afk_channel(&mut self, channel_id: Option<u64>) -> &mut Self {
        self.pending
            .stage("afk_channel_id", optional_snowflake(channel_id));
        self
    }

    /// Stage the system channel; `None` disables system messages.
    pub fn set_system_channel(&mut self, channel_id: Option<u64>) -> &mut Self {
        self.pending
            .stage("system_channel_id", optional_snowflake(channel_id));
        self
    }

    /// Stage an ownership transfer.
    pub fn set_owner(&mut self, user_id: u64) -> &mut Self {
        self.pending
            .stage("owner_id", Value::String(user_id.to_string()));
        self
    }

    /// Send everything staged as one request.
    pub async fn commit(&self) -> Result<(), SyncError> {
        self.pending
            .commit(self.sink.as_ref(), RestEndpoint::Server, self.server.id())
            .await
    }
}
