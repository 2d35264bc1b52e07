//! Client-side mirror of chat server state.
//!
//! This crate keeps a local cache of servers, channels and users in sync
//! with authoritative snapshots pushed by the gateway, and turns local
//! edits into REST requests.
//!
//! ## Features
//!
//! - **Cache**: Concurrent entity cache with interned user and channel references
//! - **Differ**: Table-driven snapshot diffing that emits one record per changed field
//! - **Dispatch**: Typed change events delivered to server-scoped and global listeners
//! - **Updaters**: Staged channel and server edits committed as a single PATCH
//! - **Gateway**: Payload envelope and a feed task that drives the mirror

pub mod cache;
mod config;
pub mod differ;
pub mod dispatcher;
mod error;
pub mod event;
pub mod field;
pub mod gateway;
pub mod listener;
pub mod mirror;
pub mod resolver;
pub mod rest;
pub mod types;
pub mod updater;

pub use cache::{Channel, EntityCache, HasOverwriteTables, OverwriteTables, Server, User};
pub use config::{ClientConfig, DEFAULT_API_BASE_URL};
pub use differ::{DiffOutcome, GuildSnapshot, SnapshotDiffer};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::SyncError;
pub use event::{ChangeEvent, ChangeRecord, EventContext, FieldChange, ServerChange};
pub use field::{FieldValue, ServerField};
pub use gateway::{FeedSummary, GatewayPayload, run_feed};
pub use listener::{Listener, ListenerError, ListenerId, ListenerRegistry};
pub use mirror::{CacheSeed, ChannelSeed, Mirror, OverwriteSeed, UserSeed};
pub use resolver::{EntityRef, ForeignKeyResolver, LookupKind};
pub use rest::{HttpSink, RequestSink, RestEndpoint, RestMethod, RestRequest};
pub use types::*;
pub use updater::{ChannelUpdater, PendingUpdate, ServerUpdater};
