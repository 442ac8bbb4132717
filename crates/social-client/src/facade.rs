use social_core::{
    ClientErrorCode, Connection, ConnectionErrorCode, ConnectionType, SocialConnectionsRequest,
    SocialError, User, UserErrorCode,
};
use tracing::{debug, warn};

use crate::{client::SocialClient, events::validate_user_id};

const MIN_SEARCH_TERM_CHARS: usize = 3;

impl SocialClient {
    pub async fn retrieve_user(&self, user_id: &str) -> Result<User, SocialError> {
        validate_user_id(user_id)?;
        let ticket = self.authenticated("retrieve_user")?;
        self.inner.transport.retrieve_user(&ticket.token, user_id).await
    }

    /// Search users by name; the term needs at least three characters.
    pub async fn search_users(&self, term: &str) -> Result<Vec<User>, SocialError> {
        let term = term.trim();
        if term.chars().count() < MIN_SEARCH_TERM_CHARS {
            return Err(SocialError::user(
                UserErrorCode::SearchTypeMin3Chars,
                format!("search term needs at least {MIN_SEARCH_TERM_CHARS} characters"),
            ));
        }
        let ticket = self.authenticated("search_users")?;
        self.inner.transport.search_users(&ticket.token, term).await
    }

    /// Connect the current user to another user.
    ///
    /// Connecting to oneself and creating `followers` connections are
    /// rejected locally.
    pub async fn create_connection(
        &self,
        mut connection: Connection,
    ) -> Result<Connection, SocialError> {
        let ticket = self.authenticated("create_connection")?;
        validate_user_id(&connection.user_to_id)?;
        validate_connection_type(connection.connection_type)?;
        if let Some(from) = connection.user_from_id.as_deref()
            && ticket.user_id.as_deref() != Some(from)
        {
            return Err(SocialError::client(
                ClientErrorCode::NoPermission,
                format!("cannot create connections for user '{from}'"),
            ));
        }
        reject_self_connection(ticket.user_id.as_deref(), &connection.user_to_id)?;
        connection.user_from_id = ticket.user_id.clone();

        let created = self
            .inner
            .transport
            .create_connection(&ticket.token, &connection)
            .await?;
        debug!(
            connection_type = connection.connection_type.as_str(),
            user_to_id = %connection.user_to_id,
            "connection created"
        );
        Ok(created)
    }

    pub async fn delete_connection(
        &self,
        connection_type: ConnectionType,
        user_id: &str,
    ) -> Result<(), SocialError> {
        let ticket = self.authenticated("delete_connection")?;
        validate_user_id(user_id)?;
        validate_connection_type(connection_type)?;
        reject_self_connection(ticket.user_id.as_deref(), user_id)?;
        self.inner
            .transport
            .delete_connection(&ticket.token, connection_type, user_id)
            .await
    }

    pub async fn follow_user(&self, user_id: &str) -> Result<Connection, SocialError> {
        self.create_connection(Connection::new(ConnectionType::Follow, user_id))
            .await
    }

    pub async fn unfollow_user(&self, user_id: &str) -> Result<(), SocialError> {
        self.delete_connection(ConnectionType::Follow, user_id).await
    }

    pub async fn friend_user(&self, user_id: &str) -> Result<Connection, SocialError> {
        self.create_connection(Connection::new(ConnectionType::Friend, user_id))
            .await
    }

    pub async fn unfriend_user(&self, user_id: &str) -> Result<(), SocialError> {
        self.delete_connection(ConnectionType::Friend, user_id).await
    }

    /// Users connected to `user_id` (the current user when `None`).
    pub async fn retrieve_connected_users(
        &self,
        connection_type: ConnectionType,
        user_id: Option<&str>,
    ) -> Result<Vec<User>, SocialError> {
        if let Some(user_id) = user_id {
            validate_user_id(user_id)?;
        }
        let ticket = self.authenticated("retrieve_connected_users")?;
        self.inner
            .transport
            .connected_users(&ticket.token, connection_type, user_id)
            .await
    }

    pub async fn retrieve_follows(&self, user_id: Option<&str>) -> Result<Vec<User>, SocialError> {
        self.retrieve_connected_users(ConnectionType::Follow, user_id)
            .await
    }

    pub async fn retrieve_followers(&self, user_id: Option<&str>) -> Result<Vec<User>, SocialError> {
        self.retrieve_connected_users(ConnectionType::Followers, user_id)
            .await
    }

    pub async fn retrieve_friends(&self, user_id: Option<&str>) -> Result<Vec<User>, SocialError> {
        self.retrieve_connected_users(ConnectionType::Friend, user_id)
            .await
    }

    /// Import connections to users known by their ids on an external
    /// platform.
    ///
    /// Invalid ids are reported together with any service failure as one
    /// aggregated error; the valid ids are still sent.
    pub async fn create_social_connections(
        &self,
        platform: &str,
        connection_type: ConnectionType,
        external_ids: &[String],
    ) -> Result<Vec<User>, SocialError> {
        let ticket = self.authenticated("create_social_connections")?;
        validate_connection_type(connection_type)?;
        let platform_user_id = self
            .current_user()
            .and_then(|user| user.social_id(platform).map(str::to_owned))
            .ok_or_else(|| {
                SocialError::client(
                    ClientErrorCode::NoSocialIdForPlatform,
                    format!("current user has no id on '{platform}'"),
                )
            })?;

        let mut errors = Vec::new();
        let mut connection_ids = Vec::new();
        for id in external_ids {
            if id.trim().is_empty() {
                errors.push(SocialError::user(
                    UserErrorCode::IdInvalid,
                    format!("empty user id for '{platform}'"),
                ));
            } else if *id == platform_user_id {
                errors.push(SocialError::connection(
                    ConnectionErrorCode::SelfConnectingUser,
                    format!("'{id}' is the current user on '{platform}'"),
                ));
            } else {
                connection_ids.push(id.clone());
            }
        }

        let mut connected = Vec::new();
        if !connection_ids.is_empty() {
            let request = SocialConnectionsRequest {
                platform: platform.to_owned(),
                connection_type,
                platform_user_id,
                connection_ids,
            };
            match self
                .inner
                .transport
                .create_social_connections(&ticket.token, &request)
                .await
            {
                Ok(users) => connected = users,
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            Ok(connected)
        } else {
            warn!(
                failures = errors.len(),
                connected = connected.len(),
                "social connections partially failed"
            );
            Err(SocialError::multiple(errors))
        }
    }
}

fn validate_connection_type(connection_type: ConnectionType) -> Result<(), SocialError> {
    if connection_type == ConnectionType::Followers {
        return Err(SocialError::connection(
            ConnectionErrorCode::TypeIsWrong,
            "followers connections are created by the followed side",
        ));
    }
    Ok(())
}

fn reject_self_connection(current: Option<&str>, user_id: &str) -> Result<(), SocialError> {
    if current == Some(user_id) {
        return Err(SocialError::connection(
            ConnectionErrorCode::SelfConnectingUser,
            "a user cannot connect to themselves",
        ));
    }
    Ok(())
}
