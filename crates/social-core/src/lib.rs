//! Core model of the social graph client.
//!
//! This crate holds everything that does not touch the network: the error
//! taxonomy, the session lifecycle, the pending event queue, the feed cache
//! and the notice channel used to report background work.

/// Broadcast channel for background notices.
pub mod channel;
/// Error taxonomy with stable numeric codes.
pub mod error;
/// Feed cache with unread tracking.
pub mod feed;
/// Notice normalization for applied flushes.
pub mod normalization;
/// Pending event mutations awaiting a flush.
pub mod queue;
/// Backoff policy used by flush retries.
pub mod retry;
/// Session lifecycle state machine.
pub mod state_machine;
/// Users, connections, events and feed payloads.
pub mod types;

pub use channel::{NoticeChannel, NoticeStream};
pub use error::{
    AuthErrorCode, ClientErrorCode, ConnectionErrorCode, ErrorCategory, EventErrorCode,
    ServerErrorCode, SocialError, UserErrorCode, classify_http_status,
};
pub use feed::{FeedCache, FeedMergeError};
pub use normalization::{feed_updated, notices_for_flush};
pub use queue::{DeleteOutcome, EventQueue, FlushBatch, FlushReport, QueueEntry, QueuedMutation};
pub use retry::RetryPolicy;
pub use state_machine::{SessionCommand, SessionStateMachine};
pub use types::{
    ClientNotice, Connection, ConnectionType, DeleteRequest, Event, EventMutation, EventObject,
    EventVisibility, FeedPage, FeedSnapshot, LocalEventHandle, MutationAck, MutationOutcome,
    ObjectRef, RemoteDelete, SessionState, SocialConnectionsRequest, User,
};
