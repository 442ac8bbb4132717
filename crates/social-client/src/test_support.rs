use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use social_core::{
    Connection, ConnectionType, Event, EventMutation, FeedPage, MutationAck, MutationOutcome,
    SocialConnectionsRequest, SocialError, User,
};
use tokio::sync::Notify;
use url::Url;

use crate::{
    client::SocialClient,
    config::ClientConfig,
    transport::{AuthenticatedUser, Credentials, Transport},
};

/// Scripted transport that records every call.
#[derive(Default)]
pub(crate) struct MockTransport {
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, VecDeque<SocialError>>>,
    submitted: Mutex<Vec<Vec<EventMutation>>>,
    social_requests: Mutex<Vec<SocialConnectionsRequest>>,
    login_user: Mutex<Option<User>>,
    feed: Mutex<FeedPage>,
    unread: Mutex<Vec<Event>>,
    unread_count: Mutex<usize>,
    submit_gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) submit_started: Notify,
    next_event_id: AtomicU64,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_731_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    pub(crate) fn feed_event(id: &str, secs: i64, unread: bool) -> Event {
        Event {
            id: Some(id.to_owned()),
            user_id: Some("u2".into()),
            created_at: Some(Self::at(secs)),
            is_unread: unread,
            ..Event::new("like", format!("post-{id}"))
        }
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|call| **call == name)
            .count()
    }

    /// Fail the next call of `method` with `error`.
    pub(crate) fn fail_next(&self, method: &'static str, error: SocialError) {
        self.failures
            .lock()
            .expect("failures lock")
            .entry(method)
            .or_default()
            .push_back(error);
    }

    pub(crate) fn submitted(&self) -> Vec<Vec<EventMutation>> {
        self.submitted.lock().expect("submitted lock").clone()
    }

    pub(crate) fn social_requests(&self) -> Vec<SocialConnectionsRequest> {
        self.social_requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn set_login_user(&self, user: User) {
        *self.login_user.lock().expect("user lock") = Some(user);
    }

    pub(crate) fn set_feed(&self, page: FeedPage) {
        *self.feed.lock().expect("feed lock") = page;
    }

    pub(crate) fn set_unread(&self, events: Vec<Event>) {
        *self.unread.lock().expect("unread lock") = events;
    }

    pub(crate) fn set_unread_count(&self, count: usize) {
        *self.unread_count.lock().expect("count lock") = count;
    }

    /// Block `submit_events` until the returned gate is notified.
    pub(crate) fn hold_submits(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.submit_gate.lock().expect("gate lock") = Some(gate.clone());
        gate
    }

    fn record(&self, method: &'static str) -> Result<(), SocialError> {
        self.calls.lock().expect("calls lock").push(method);
        match self
            .failures
            .lock()
            .expect("failures lock")
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn default_user(username: &str) -> User {
        User {
            id: Some("u1".into()),
            username: Some(username.to_owned()),
            ..User::default()
        }
    }

    fn acknowledge(&self, mutation: &EventMutation) -> MutationOutcome {
        match mutation {
            EventMutation::Create { handle, event } => {
                let n = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
                let secs = 1_000 + i64::try_from(n).expect("small id");
                Ok(MutationAck::Created {
                    handle: *handle,
                    event: Event {
                        id: Some(format!("srv-{n}")),
                        user_id: Some("u1".into()),
                        created_at: Some(Self::at(secs)),
                        ..event.clone()
                    },
                })
            }
            EventMutation::Delete(_) => Ok(MutationAck::Deleted),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_user(&self, user: &User) -> Result<User, SocialError> {
        self.record("create_user")?;
        Ok(User {
            id: Some("u1".into()),
            ..user.without_password()
        })
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthenticatedUser, SocialError> {
        self.record("login")?;
        let user = self
            .login_user
            .lock()
            .expect("user lock")
            .clone()
            .unwrap_or_else(|| Self::default_user(credentials.identifier()));
        Ok(AuthenticatedUser {
            user,
            session_token: "session-1".into(),
        })
    }

    async fn logout(&self, _session: &str) -> Result<(), SocialError> {
        self.record("logout")
    }

    async fn retrieve_current_user(&self, _session: &str) -> Result<User, SocialError> {
        self.record("retrieve_current_user")?;
        Ok(Self::default_user("alice"))
    }

    async fn update_current_user(&self, _session: &str, user: &User) -> Result<User, SocialError> {
        self.record("update_current_user")?;
        Ok(User {
            id: Some("u1".into()),
            ..user.clone()
        })
    }

    async fn delete_current_user(&self, _session: &str) -> Result<(), SocialError> {
        self.record("delete_current_user")
    }

    async fn retrieve_user(&self, _session: &str, user_id: &str) -> Result<User, SocialError> {
        self.record("retrieve_user")?;
        Ok(User {
            id: Some(user_id.to_owned()),
            ..User::default()
        })
    }

    async fn search_users(&self, _session: &str, term: &str) -> Result<Vec<User>, SocialError> {
        self.record("search_users")?;
        Ok(vec![Self::default_user(term)])
    }

    async fn create_connection(
        &self,
        _session: &str,
        connection: &Connection,
    ) -> Result<Connection, SocialError> {
        self.record("create_connection")?;
        Ok(Connection {
            created_at: Some(Self::at(0)),
            ..connection.clone()
        })
    }

    async fn delete_connection(
        &self,
        _session: &str,
        _connection_type: ConnectionType,
        _user_id: &str,
    ) -> Result<(), SocialError> {
        self.record("delete_connection")
    }

    async fn connected_users(
        &self,
        _session: &str,
        _connection_type: ConnectionType,
        _user_id: Option<&str>,
    ) -> Result<Vec<User>, SocialError> {
        self.record("connected_users")?;
        Ok(Vec::new())
    }

    async fn create_social_connections(
        &self,
        _session: &str,
        request: &SocialConnectionsRequest,
    ) -> Result<Vec<User>, SocialError> {
        self.social_requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.record("create_social_connections")?;
        Ok(Vec::new())
    }

    async fn submit_events(
        &self,
        _session: &str,
        mutations: &[EventMutation],
    ) -> Result<Vec<MutationOutcome>, SocialError> {
        self.record("submit_events")?;
        let gate = self.submit_gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            self.submit_started.notify_one();
            gate.notified().await;
        }
        self.submitted
            .lock()
            .expect("submitted lock")
            .push(mutations.to_vec());
        Ok(mutations
            .iter()
            .map(|mutation| self.acknowledge(mutation))
            .collect())
    }

    async fn retrieve_event(
        &self,
        _session: &str,
        _user_id: Option<&str>,
        event_id: &str,
    ) -> Result<Event, SocialError> {
        self.record("retrieve_event")?;
        Ok(Self::feed_event(event_id, 0, false))
    }

    async fn retrieve_events(
        &self,
        _session: &str,
        _user_id: Option<&str>,
    ) -> Result<Vec<Event>, SocialError> {
        self.record("retrieve_events")?;
        Ok(Vec::new())
    }

    async fn fetch_feed(&self, _session: &str) -> Result<FeedPage, SocialError> {
        self.record("fetch_feed")?;
        Ok(self.feed.lock().expect("feed lock").clone())
    }

    async fn fetch_unread_feed(&self, _session: &str) -> Result<Vec<Event>, SocialError> {
        self.record("fetch_unread_feed")?;
        Ok(self.unread.lock().expect("unread lock").clone())
    }

    async fn fetch_unread_count(&self, _session: &str) -> Result<usize, SocialError> {
        self.record("fetch_unread_count")?;
        Ok(*self.unread_count.lock().expect("count lock"))
    }
}

/// Config with automatic flushing at `interval`, or disabled for `None`.
pub(crate) fn test_config(interval: Option<Duration>) -> ClientConfig {
    ClientConfig::new(
        "app-token",
        Url::parse("https://api.example.com/").expect("valid url"),
    )
    .with_flush_interval(interval.unwrap_or(Duration::ZERO))
}

pub(crate) fn client_with(mock: &Arc<MockTransport>, interval: Option<Duration>) -> SocialClient {
    SocialClient::new(test_config(interval), mock.clone(), None)
}

pub(crate) async fn logged_in(
    mock: &Arc<MockTransport>,
    interval: Option<Duration>,
) -> SocialClient {
    let client = client_with(mock, interval);
    client
        .login(Credentials::username("alice", "pw"))
        .await
        .expect("login should work");
    client
}
