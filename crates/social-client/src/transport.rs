use async_trait::async_trait;
use social_core::{
    Connection, ConnectionType, Event, EventMutation, FeedPage, MutationOutcome, SocialConnectionsRequest,
    SocialError, User,
};

/// Login identifier paired with a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Username { username: String, password: String },
    Email { email: String, password: String },
}

impl Credentials {
    pub fn username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Username {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Email {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Login identifier regardless of kind.
    pub fn identifier(&self) -> &str {
        match self {
            Self::Username { username, .. } => username,
            Self::Email { email, .. } => email,
        }
    }

    pub fn password(&self) -> &str {
        match self {
            Self::Username { password, .. } | Self::Email { password, .. } => password,
        }
    }

    /// Credentials for logging in as `user`, preferring the username.
    pub fn for_user(user: &User) -> Option<Self> {
        let password = user.password.clone()?;
        match (&user.username, &user.email) {
            (Some(username), _) if !username.trim().is_empty() => {
                Some(Self::username(username.clone(), password))
            }
            (_, Some(email)) if !email.trim().is_empty() => Some(Self::email(email.clone(), password)),
            _ => None,
        }
    }
}

/// Successful login: the current user and the session token for later calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user: User,
    pub session_token: String,
}

/// Request/response seam between the client context and the service.
///
/// Every session-scoped call receives the session token explicitly; the
/// transport itself holds no session state.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<User, SocialError>;

    async fn login(&self, credentials: &Credentials) -> Result<AuthenticatedUser, SocialError>;

    async fn logout(&self, session: &str) -> Result<(), SocialError>;

    async fn retrieve_current_user(&self, session: &str) -> Result<User, SocialError>;

    async fn update_current_user(&self, session: &str, user: &User) -> Result<User, SocialError>;

    async fn delete_current_user(&self, session: &str) -> Result<(), SocialError>;

    async fn retrieve_user(&self, session: &str, user_id: &str) -> Result<User, SocialError>;

    async fn search_users(&self, session: &str, term: &str) -> Result<Vec<User>, SocialError>;

    async fn create_connection(
        &self,
        session: &str,
        connection: &Connection,
    ) -> Result<Connection, SocialError>;

    async fn delete_connection(
        &self,
        session: &str,
        connection_type: ConnectionType,
        user_id: &str,
    ) -> Result<(), SocialError>;

    /// Users connected to `user_id`, or to the current user when `None`.
    async fn connected_users(
        &self,
        session: &str,
        connection_type: ConnectionType,
        user_id: Option<&str>,
    ) -> Result<Vec<User>, SocialError>;

    /// Import connections from an external platform; returns the users that
    /// are now connected.
    async fn create_social_connections(
        &self,
        session: &str,
        request: &SocialConnectionsRequest,
    ) -> Result<Vec<User>, SocialError>;

    /// Submit a flush batch. The returned outcomes positionally match
    /// `mutations`.
    async fn submit_events(
        &self,
        session: &str,
        mutations: &[EventMutation],
    ) -> Result<Vec<MutationOutcome>, SocialError>;

    async fn retrieve_event(
        &self,
        session: &str,
        user_id: Option<&str>,
        event_id: &str,
    ) -> Result<Event, SocialError>;

    /// Events of `user_id`, or of the current user when `None`.
    async fn retrieve_events(
        &self,
        session: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<Event>, SocialError>;

    async fn fetch_feed(&self, session: &str) -> Result<FeedPage, SocialError>;

    async fn fetch_unread_feed(&self, session: &str) -> Result<Vec<Event>, SocialError>;

    async fn fetch_unread_count(&self, session: &str) -> Result<usize, SocialError>;
}
