//! End-to-end behavior of the mirror through its public API.
//!
//! Each test drives a seeded [`Mirror`] with gateway snapshots or staged
//! updates and checks the observable outcome: cache contents, delivered
//! change events and outbound requests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use cordsync::{
    CacheSeed, DiffOutcome, EntityCache, FieldValue, GatewayPayload, Mirror, OverwriteSubject,
    Permissions, RequestSink, RestMethod, RestRequest, ServerChange, ServerField, SyncError,
    VerificationLevel,
};

#[derive(Default)]
struct RecordingSink {
    requests: Mutex<Vec<RestRequest>>,
    fail_with: Option<String>,
}

impl RecordingSink {
    fn failing(message: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RequestSink for RecordingSink {
    async fn execute(&self, request: RestRequest) -> Result<(), SyncError> {
        self.requests.lock().push(request);
        match &self.fail_with {
            Some(message) => Err(SyncError::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

fn seed() -> CacheSeed {
    serde_json::from_value(json!({
        "users": [
            {"id": "1", "username": "founder"},
            {"id": "123", "username": "successor"}
        ],
        "channels": [
            {"id": "10", "guild_id": "500", "type": 0, "name": "general"},
            {"id": "11", "guild_id": "500", "type": 2, "name": "afk"},
            {"id": "12", "guild_id": "500", "type": 0, "name": "bare"}
        ],
        "servers": [
            {
                "id": "500",
                "name": "Lobby",
                "icon": null,
                "verification_level": 1,
                "region": "us-east",
                "owner_id": "1",
                "system_channel_id": "10",
                "afk_channel_id": "11",
                "afk_timeout": 300
            }
        ]
    }))
    .unwrap()
}

fn mirror_with(sink: Arc<RecordingSink>) -> Mirror {
    let mirror = Mirror::new(EntityCache::new(), sink);
    mirror.hydrate(seed()).unwrap();
    mirror
}

fn mirror() -> Mirror {
    mirror_with(Arc::new(RecordingSink::default()))
}

/// Record every change event delivered to global listeners.
fn record_changes(mirror: &Mirror) -> Arc<Mutex<Vec<ServerChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&changes);
    mirror.listeners().add_all(move |event| {
        log.lock().push(event.change.clone());
        Ok(())
    });
    changes
}

fn field_values(mirror: &Mirror, server_id: u64) -> Vec<FieldValue> {
    ServerField::ALL
        .iter()
        .map(|field| mirror.cache().current_value(server_id, *field).unwrap())
        .collect()
}

fn update(mirror: &Mirror, data: Value) -> DiffOutcome {
    mirror.handle_guild_update(None, data).unwrap()
}

#[test]
fn test_identical_snapshot_produces_no_events() {
    let mirror = mirror();
    let changes = record_changes(&mirror);
    let before = field_values(&mirror, 500);

    let outcome = update(
        &mirror,
        json!({
            "id": "500",
            "name": "Lobby",
            "icon": null,
            "verification_level": 1,
            "region": "us-east",
            "owner_id": "1",
            "system_channel_id": "10",
            "afk_channel_id": "11",
            "afk_timeout": 300
        }),
    );

    assert_eq!(
        outcome,
        DiffOutcome::Applied {
            changed: 0,
            unresolved: 0
        }
    );
    assert!(changes.lock().is_empty());
    assert_eq!(field_values(&mirror, 500), before);
}

#[test]
fn test_two_changed_fields_produce_two_records() {
    let mirror = mirror();
    let changes = record_changes(&mirror);

    update(
        &mirror,
        json!({"id": "500", "afk_timeout": 900, "verification_level": 3}),
    );

    let server = mirror.cache().get(500).unwrap();
    assert_eq!(server.afk_timeout(), 900);
    assert_eq!(server.verification_level(), VerificationLevel::High);

    let changes = changes.lock();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().any(|c| c.field() == ServerField::AfkTimeout));
    assert!(changes.iter().any(|c| c.field() == ServerField::VerificationLevel));
}

#[test]
fn test_server_listener_runs_before_global_once_each() {
    let mirror = mirror();
    let server = mirror.cache().get(500).unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&calls);
    mirror.listeners().add(ServerField::Name, move |_| {
        log.lock().push("global");
        Ok(())
    });
    let log = Arc::clone(&calls);
    server.listeners().add(ServerField::Name, move |_| {
        log.lock().push("server");
        Ok(())
    });

    update(&mirror, json!({"id": "500", "name": "Renamed"}));

    assert_eq!(*calls.lock(), vec!["server", "global"]);
}

#[test]
fn test_failing_server_listener_does_not_block_global() {
    let mirror = mirror();
    let server = mirror.cache().get(500).unwrap();
    server
        .listeners()
        .add(ServerField::Name, |_| Err("listener broke".into()));
    let changes = record_changes(&mirror);

    update(&mirror, json!({"id": "500", "name": "Renamed", "afk_timeout": 60}));

    // Both fields were still written and reached the global listener.
    assert_eq!(changes.lock().len(), 2);
    assert_eq!(server.name(), "Renamed");
    assert_eq!(server.afk_timeout(), 60);
}

#[test]
fn test_unavailable_snapshot_changes_nothing() {
    let mirror = mirror();
    let changes = record_changes(&mirror);
    let before = field_values(&mirror, 500);

    let outcome = update(
        &mirror,
        json!({"id": "500", "unavailable": true, "name": "Other", "afk_timeout": 1}),
    );

    assert_eq!(outcome, DiffOutcome::Unavailable);
    assert!(changes.lock().is_empty());
    assert_eq!(field_values(&mirror, 500), before);
}

#[test]
fn test_untracked_server_is_ignored() {
    let mirror = mirror();
    let changes = record_changes(&mirror);

    let outcome = update(&mirror, json!({"id": "999", "name": "Stranger"}));

    assert_eq!(outcome, DiffOutcome::Untracked);
    assert!(changes.lock().is_empty());
    assert!(mirror.cache().get(999).is_none());
}

#[tokio::test]
async fn test_empty_commit_sends_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let mirror = mirror_with(Arc::clone(&sink));

    mirror.channel_updater(10).unwrap().commit().await.unwrap();
    mirror.server_updater(500).unwrap().commit().await.unwrap();

    assert!(sink.requests().is_empty());
}

#[tokio::test]
async fn test_commit_body_contains_only_staged_fields() {
    let sink = Arc::new(RecordingSink::default());
    let mirror = mirror_with(Arc::clone(&sink));

    let mut rename = mirror.channel_updater(10).unwrap();
    rename.set_name("foo");
    rename.commit().await.unwrap();

    let mut overwrite = mirror.channel_updater(12).unwrap();
    overwrite.add_permission_overwrite(OverwriteSubject::Member(42), Permissions::new(8, 0));
    overwrite.commit().await.unwrap();

    let requests = sink.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, RestMethod::Patch);
    assert_eq!(requests[0].path(), "/channels/10");
    assert_eq!(requests[0].body, Some(json!({"name": "foo"})));
    assert_eq!(requests[1].path(), "/channels/12");
    assert_eq!(
        requests[1].body,
        Some(json!({
            "permission_overwrites": [
                {"id": "42", "type": "member", "allow": 8, "deny": 0}
            ]
        }))
    );
}

#[test]
fn test_owner_change_resolves_cached_user() {
    let mirror = mirror();
    let server = mirror.cache().get(500).unwrap();
    let previous = server.owner().unwrap();
    let successor = mirror.cache().user(123).unwrap();
    let changes = record_changes(&mirror);

    update(&mirror, json!({"id": "500", "owner_id": "123"}));

    assert!(Arc::ptr_eq(&server.owner().unwrap(), &successor));
    assert_eq!(server.owner_id(), Some(123));

    let changes = changes.lock();
    assert_eq!(changes.len(), 1);
    match &changes[0] {
        ServerChange::Owner(change) => {
            assert!(Arc::ptr_eq(change.old.as_ref().unwrap(), &previous));
            assert!(Arc::ptr_eq(change.new.as_ref().unwrap(), &successor));
        }
        other => panic!("unexpected change: {:?}", other),
    }
}

#[test]
fn test_unknown_owner_is_skipped_until_cached() {
    let mirror = mirror();
    let server = mirror.cache().get(500).unwrap();
    let changes = record_changes(&mirror);

    let outcome = update(&mirror, json!({"id": "500", "owner_id": "777"}));

    assert_eq!(
        outcome,
        DiffOutcome::Applied {
            changed: 0,
            unresolved: 1
        }
    );
    assert!(changes.lock().is_empty());
    assert_eq!(server.owner().unwrap().id(), 1);
    assert_eq!(server.owner_id(), Some(777));

    // The user shows up, and the next snapshot completes the transfer.
    let newcomer = mirror.cache().insert_user(777, "newcomer");
    update(&mirror, json!({"id": "500", "owner_id": "777"}));

    assert!(Arc::ptr_eq(&server.owner().unwrap(), &newcomer));
    assert_eq!(server.unresolved_reference(ServerField::Owner), None);
    assert_eq!(changes.lock().len(), 1);
}

#[test]
fn test_transfer_back_to_current_owner_drops_pending_id() {
    let mirror = mirror();
    let server = mirror.cache().get(500).unwrap();
    let changes = record_changes(&mirror);

    update(&mirror, json!({"id": "500", "owner_id": "777"}));
    assert_eq!(server.owner_id(), Some(777));

    update(&mirror, json!({"id": "500", "owner_id": "1"}));

    assert!(changes.lock().is_empty());
    assert_eq!(server.unresolved_reference(ServerField::Owner), None);
    assert_eq!(server.owner_id(), Some(1));
}

#[tokio::test]
async fn test_commit_failure_propagates_and_leaves_cache() {
    let sink = Arc::new(RecordingSink::failing("socket closed"));
    let mirror = mirror_with(Arc::clone(&sink));
    let before = field_values(&mirror, 500);

    let mut updater = mirror.server_updater(500).unwrap();
    updater.set_name("Renamed").set_afk_timeout(60);
    let err = updater.commit().await.unwrap_err();

    assert!(matches!(err, SyncError::Transport(ref msg) if msg == "socket closed"));
    assert_eq!(sink.requests().len(), 1);
    assert_eq!(field_values(&mirror, 500), before);
    assert_eq!(mirror.cache().get(500).unwrap().name(), "Lobby");
}

#[test]
fn test_channel_reference_scoped_to_server() {
    let mirror = mirror();
    mirror.cache().track_server(600);
    let server = mirror.cache().get(600).unwrap();

    // Channel 10 belongs to server 500.
    update(&mirror, json!({"id": "600", "system_channel_id": "10"}));

    assert!(server.system_channel().is_none());
    assert_eq!(server.unresolved_reference(ServerField::SystemChannel), Some(10));
}

#[test]
fn test_payload_sequence_reaches_listeners() {
    let mirror = mirror();
    let sequences = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&sequences);
    mirror.listeners().add(ServerField::Region, move |event| {
        log.lock().push(event.context.sequence);
        Ok(())
    });

    mirror
        .handle_payload(GatewayPayload::new(
            "GUILD_UPDATE",
            Some(41),
            json!({"id": "500", "region": "eu-west"}),
        ))
        .unwrap();

    assert_eq!(*sequences.lock(), vec![Some(41)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_snapshots_for_different_servers() {
    let mirror = Arc::new(Mirror::new(
        EntityCache::new(),
        Arc::new(RecordingSink::default()),
    ));
    for id in 1..=8u64 {
        mirror.cache().track_server(id);
    }
    let delivered = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&delivered);
    mirror.listeners().add(ServerField::AfkTimeout, move |_| {
        *counter.lock() += 1;
        Ok(())
    });

    let mut handles = Vec::new();
    for id in 1..=8u64 {
        let mirror = Arc::clone(&mirror);
        handles.push(tokio::task::spawn_blocking(move || {
            for timeout in 1..=50i64 {
                mirror
                    .handle_guild_update(None, json!({"id": id.to_string(), "afk_timeout": timeout}))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for id in 1..=8u64 {
        assert_eq!(mirror.cache().get(id).unwrap().afk_timeout(), 50);
    }
    assert_eq!(*delivered.lock(), 8 * 50);
}
