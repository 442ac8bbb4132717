use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SocialError;

/// Lifecycle state of a session context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    /// No authenticated user; gated operations are rejected.
    LoggedOut,
    /// A login, create-and-login or session restore flow is running.
    LoggingIn,
    /// Session token and current user are available.
    LoggedIn,
    /// Logout or current-user deletion is clearing session state.
    LoggingOut,
}

/// An application user of the social graph service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct User {
    /// Server-assigned id; immutable once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "user_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Only sent when creating or updating the user; the service never returns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// External platform key (for example `facebook`) to the user's id there.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub social_ids: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn with_username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn with_email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// The user's id on an external platform, if linked.
    pub fn social_id(&self, platform: &str) -> Option<&str> {
        self.social_ids.get(platform).map(String::as_str)
    }

    /// Copy of the user without the write-only password field.
    pub fn without_password(&self) -> Self {
        Self {
            password: None,
            ..self.clone()
        }
    }
}

/// Type of a connection edge between two users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Symmetric-by-convention friendship.
    Friend,
    /// The source user follows the target user.
    Follow,
    /// The target user follows the source user.
    Followers,
}

impl ConnectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Follow => "follow",
            Self::Followers => "followers",
        }
    }

    /// The same relation seen from the other end of the edge.
    pub fn inverse(self) -> Self {
        match self {
            Self::Friend => Self::Friend,
            Self::Follow => Self::Followers,
            Self::Followers => Self::Follow,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed typed edge between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_from_id: Option<String>,
    pub user_to_id: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(connection_type: ConnectionType, user_to_id: impl Into<String>) -> Self {
        Self {
            user_from_id: None,
            user_to_id: user_to_id.into(),
            connection_type,
            created_at: None,
        }
    }
}

/// Bulk connection import from an external platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocialConnectionsRequest {
    /// Platform key, for example `facebook` or `twitter`.
    pub platform: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    /// Current user's id on the platform.
    pub platform_user_id: String,
    /// Platform ids of the users to connect to.
    pub connection_ids: Vec<String>,
}

/// Who may see an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventVisibility {
    Private,
    Connections,
    Public,
    Global,
}

/// Hydrated object an event was performed on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EventObject {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Language code to display name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub display_names: BTreeMap<String, String>,
}

impl EventObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// The thing an event refers to: a bare object id or a hydrated object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectRef {
    Id(String),
    Object(EventObject),
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object(object) => &object.id,
        }
    }
}

impl From<&str> for ObjectRef {
    fn from(id: &str) -> Self {
        Self::Id(id.to_owned())
    }
}

impl From<String> for ObjectRef {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<EventObject> for ObjectRef {
    fn from(object: EventObject) -> Self {
        Self::Object(object)
    }
}

/// Provisional client-side handle for an event that has not been sent yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LocalEventHandle(Uuid);

impl LocalEventHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalEventHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalEventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// An action performed by a user on an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Event {
    /// Server-assigned id. Must be unset when the event is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<EventObject>,
    /// Secondary object, e.g. the album a photo was added to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<EventVisibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Feed marker set by the service; always `false` outside feed responses.
    #[serde(default, skip_serializing)]
    pub is_unread: bool,
    /// Set once the event has been handed to the event queue.
    #[serde(skip)]
    pub local_handle: Option<LocalEventHandle>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, object: impl Into<ObjectRef>) -> Self {
        let mut event = Self {
            event_type: event_type.into(),
            ..Self::default()
        };
        match object.into() {
            ObjectRef::Id(id) => event.object_id = Some(id),
            ObjectRef::Object(object) => {
                event.object_id = Some(object.id.clone());
                event.object = Some(object);
            }
        }
        event
    }

    /// Id of the object the event refers to, from either representation.
    pub fn object_key(&self) -> Option<&str> {
        self.object_id
            .as_deref()
            .or_else(|| self.object.as_ref().map(|object| object.id.as_str()))
    }

    pub fn matches(&self, event_type: &str, object_id: &str) -> bool {
        self.event_type == event_type && self.object_key() == Some(object_id)
    }
}

/// Which event a delete call refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteRequest {
    /// Handle returned when the event was queued.
    Handle(LocalEventHandle),
    /// An event value, queued or already sent.
    Event(Event),
    /// The current user's event of this type on this object.
    Matching {
        event_type: String,
        object: ObjectRef,
    },
}

/// Remote side of a delete instruction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemoteDelete {
    EventId(String),
    Matching { event_type: String, object_id: String },
}

/// One mutation handed to the transport during a flush.
#[derive(Debug, Clone, PartialEq)]
pub enum EventMutation {
    Create {
        handle: LocalEventHandle,
        event: Event,
    },
    Delete(RemoteDelete),
}

/// Successful result of a single flushed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationAck {
    /// The service stored the event and returned it with its id.
    Created {
        handle: LocalEventHandle,
        event: Event,
    },
    Deleted,
}

/// Per-mutation flush result, positionally matching the submitted batch.
pub type MutationOutcome = Result<MutationAck, SocialError>;

/// Feed contents returned by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeedPage {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(rename = "unread_events_count", default)]
    pub unread_count: usize,
}

/// Feed state as seen by callers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedSnapshot {
    /// Most-recent-first.
    pub events: Vec<Event>,
    pub unread_count: usize,
}

/// Background notifications published by a session context.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    /// Session lifecycle transition.
    SessionChanged { state: SessionState },
    /// A flush finished and its results were applied.
    FlushCompleted {
        created: usize,
        deleted: usize,
        requeued: usize,
    },
    /// Queued mutations were dropped after a terminal failure.
    FlushAbandoned { dropped: usize, error: SocialError },
    /// The cached feed changed.
    FeedUpdated { unread_count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_object_key_prefers_object_id() {
        let by_id = Event::new("like", "post1");
        assert_eq!(by_id.object_key(), Some("post1"));
        assert!(by_id.object.is_none());

        let hydrated = Event::new("like", EventObject::new("post2"));
        assert_eq!(hydrated.object_key(), Some("post2"));
        assert!(hydrated.matches("like", "post2"));
        assert!(!hydrated.matches("share", "post2"));
    }

    #[test]
    fn user_wire_names_follow_service_fields() {
        let user = User::with_username("alice", "secret");
        let json = serde_json::to_value(&user).expect("user should serialize");
        assert_eq!(json["user_name"], "alice");
        assert_eq!(json["password"], "secret");
        assert!(json.get("id").is_none());

        let stripped = serde_json::to_value(user.without_password()).expect("serialize");
        assert!(stripped.get("password").is_none());
    }

    #[test]
    fn unread_marker_is_read_but_never_written() {
        let event: Event = serde_json::from_str(
            r#"{"id":"e1","type":"like","object_id":"post1","is_unread":true}"#,
        )
        .expect("event should parse");
        assert!(event.is_unread);
        assert_eq!(event.local_handle, None);

        let json = serde_json::to_value(&event).expect("event should serialize");
        assert!(json.get("is_unread").is_none());
        assert_eq!(json["type"], "like");
    }

    #[test]
    fn connection_types_invert_direction() {
        assert_eq!(ConnectionType::Follow.inverse(), ConnectionType::Followers);
        assert_eq!(ConnectionType::Friend.inverse(), ConnectionType::Friend);
        assert_eq!(
            serde_json::to_value(ConnectionType::Followers).expect("serialize"),
            "followers"
        );
    }
}
