//! reqwest-backed transport speaking the service's JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Method, RequestBuilder, Response, StatusCode,
    header::{HeaderMap, RETRY_AFTER},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use social_core::{
    ClientErrorCode, Connection, ConnectionType, ErrorCategory, Event, EventMutation, FeedPage,
    MutationAck, MutationOutcome, RemoteDelete, SocialConnectionsRequest, SocialError, User,
    classify_http_status,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::ClientConfig,
    transport::{AuthenticatedUser, Credentials, Transport},
};

const API_VERSION: &str = "0.4";
const ERROR_BODY_SNIPPET: usize = 200;

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    errors: Vec<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "user_name", skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    password: &'a str,
}

impl<'a> From<&'a Credentials> for LoginRequest<'a> {
    fn from(credentials: &'a Credentials) -> Self {
        match credentials {
            Credentials::Username { username, password } => Self {
                username: Some(username.as_str()),
                email: None,
                password,
            },
            Credentials::Email { email, password } => Self {
                username: None,
                email: Some(email.as_str()),
                password,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(flatten)]
    user: User,
    session_token: String,
}

#[derive(Debug, Deserialize)]
struct UserList {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct UnreadCount {
    #[serde(rename = "unread_events_count")]
    count: usize,
}

/// JSON-over-HTTP transport. Requests authenticate with basic auth where the
/// application token is the user and the session token the password.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_base: Url,
    app_token: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, SocialError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("social-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                SocialError::transport(
                    ErrorCategory::Internal,
                    format!("failed building http client: {err}"),
                )
            })?;
        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            app_token: config.app_token.clone(),
        })
    }

    /// `{api_base}/0.4/{segments...}` with every segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SocialError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                SocialError::client(
                    ClientErrorCode::InconsistentData,
                    format!("api base {} cannot carry a path", self.api_base),
                )
            })?
            .pop_if_empty()
            .push(API_VERSION)
            .extend(segments);
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        session: Option<&str>,
    ) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.app_token, session)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, SocialError> {
        let response = check_status(builder.send().await.map_err(map_reqwest_error)?).await?;
        response.json::<T>().await.map_err(map_reqwest_error)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), SocialError> {
        check_status(builder.send().await.map_err(map_reqwest_error)?).await?;
        Ok(())
    }

    async fn submit_one(&self, session: &str, mutation: &EventMutation) -> MutationOutcome {
        match mutation {
            EventMutation::Create { handle, event } => {
                let url = self.endpoint(&["me", "events"])?;
                let created: Event = self
                    .send_json(self.request(Method::POST, url, Some(session)).json(event))
                    .await?;
                Ok(MutationAck::Created {
                    handle: *handle,
                    event: created,
                })
            }
            EventMutation::Delete(RemoteDelete::EventId(id)) => {
                let url = self.endpoint(&["me", "events", id.as_str()])?;
                self.send_empty(self.request(Method::DELETE, url, Some(session)))
                    .await?;
                Ok(MutationAck::Deleted)
            }
            EventMutation::Delete(RemoteDelete::Matching {
                event_type,
                object_id,
            }) => {
                let mut url = self.endpoint(&["me", "events"])?;
                url.query_pairs_mut()
                    .append_pair("type", event_type)
                    .append_pair("object_id", object_id);
                self.send_empty(self.request(Method::DELETE, url, Some(session)))
                    .await?;
                Ok(MutationAck::Deleted)
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create_user(&self, user: &User) -> Result<User, SocialError> {
        let url = self.endpoint(&["users"])?;
        self.send_json(self.request(Method::POST, url, None).json(user))
            .await
    }

    async fn login(&self, credentials: &Credentials) -> Result<AuthenticatedUser, SocialError> {
        let url = self.endpoint(&["me", "login"])?;
        let response: LoginResponse = self
            .send_json(
                self.request(Method::POST, url, None)
                    .json(&LoginRequest::from(credentials)),
            )
            .await?;
        Ok(AuthenticatedUser {
            user: response.user,
            session_token: response.session_token,
        })
    }

    async fn logout(&self, session: &str) -> Result<(), SocialError> {
        let url = self.endpoint(&["me", "logout"])?;
        self.send_empty(self.request(Method::DELETE, url, Some(session)))
            .await
    }

    async fn retrieve_current_user(&self, session: &str) -> Result<User, SocialError> {
        let url = self.endpoint(&["me"])?;
        self.send_json(self.request(Method::GET, url, Some(session)))
            .await
    }

    async fn update_current_user(&self, session: &str, user: &User) -> Result<User, SocialError> {
        let url = self.endpoint(&["me"])?;
        self.send_json(self.request(Method::PUT, url, Some(session)).json(user))
            .await
    }

    async fn delete_current_user(&self, session: &str) -> Result<(), SocialError> {
        let url = self.endpoint(&["me"])?;
        self.send_empty(self.request(Method::DELETE, url, Some(session)))
            .await
    }

    async fn retrieve_user(&self, session: &str, user_id: &str) -> Result<User, SocialError> {
        let url = self.endpoint(&["users", user_id])?;
        self.send_json(self.request(Method::GET, url, Some(session)))
            .await
    }

    async fn search_users(&self, session: &str, term: &str) -> Result<Vec<User>, SocialError> {
        let mut url = self.endpoint(&["users", "search"])?;
        url.query_pairs_mut().append_pair("q", term);
        let list: UserList = self
            .send_json(self.request(Method::GET, url, Some(session)))
            .await?;
        Ok(list.users)
    }

    async fn create_connection(
        &self,
        session: &str,
        connection: &Connection,
    ) -> Result<Connection, SocialError> {
        let url = self.endpoint(&["me", "connections"])?;
        self.send_json(
            self.request(Method::POST, url, Some(session))
                .json(connection),
        )
        .await
    }

    async fn delete_connection(
        &self,
        session: &str,
        connection_type: ConnectionType,
        user_id: &str,
    ) -> Result<(), SocialError> {
        let url = self.endpoint(&["me", "connections", connection_type.as_str(), user_id])?;
        self.send_empty(self.request(Method::DELETE, url, Some(session)))
            .await
    }

    async fn connected_users(
        &self,
        session: &str,
        connection_type: ConnectionType,
        user_id: Option<&str>,
    ) -> Result<Vec<User>, SocialError> {
        let collection = connection_collection(connection_type);
        let url = match user_id {
            Some(user_id) => self.endpoint(&["users", user_id, collection])?,
            None => self.endpoint(&["me", collection])?,
        };
        let list: UserList = self
            .send_json(self.request(Method::GET, url, Some(session)))
            .await?;
        Ok(list.users)
    }

    async fn create_social_connections(
        &self,
        session: &str,
        request: &SocialConnectionsRequest,
    ) -> Result<Vec<User>, SocialError> {
        let url = self.endpoint(&["me", "connections", "social"])?;
        let list: UserList = self
            .send_json(self.request(Method::POST, url, Some(session)).json(request))
            .await?;
        Ok(list.users)
    }

    async fn submit_events(
        &self,
        session: &str,
        mutations: &[EventMutation],
    ) -> Result<Vec<MutationOutcome>, SocialError> {
        let mut outcomes = Vec::with_capacity(mutations.len());
        let mut halted: Option<SocialError> = None;

        for mutation in mutations {
            // Later mutations may depend on earlier ones; stop sending once the
            // service is unreachable.
            if let Some(error) = &halted {
                outcomes.push(Err(error.clone()));
                continue;
            }

            let outcome = self.submit_one(session, mutation).await;
            if let Err(error) = &outcome {
                warn!(error = %error, "event mutation failed");
                if error.is_recoverable() {
                    halted = Some(error.clone());
                }
            }
            outcomes.push(outcome);
        }

        debug!(
            submitted = mutations.len(),
            halted = halted.is_some(),
            "submitted event batch"
        );
        Ok(outcomes)
    }

    async fn retrieve_event(
        &self,
        session: &str,
        user_id: Option<&str>,
        event_id: &str,
    ) -> Result<Event, SocialError> {
        let url = match user_id {
            Some(user_id) => self.endpoint(&["users", user_id, "events", event_id])?,
            None => self.endpoint(&["me", "events", event_id])?,
        };
        self.send_json(self.request(Method::GET, url, Some(session)))
            .await
    }

    async fn retrieve_events(
        &self,
        session: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<Event>, SocialError> {
        let url = match user_id {
            Some(user_id) => self.endpoint(&["users", user_id, "events"])?,
            None => self.endpoint(&["me", "events"])?,
        };
        let list: EventList = self
            .send_json(self.request(Method::GET, url, Some(session)))
            .await?;
        Ok(list.events)
    }

    async fn fetch_feed(&self, session: &str) -> Result<FeedPage, SocialError> {
        let url = self.endpoint(&["me", "feed"])?;
        self.send_json(self.request(Method::GET, url, Some(session)))
            .await
    }

    async fn fetch_unread_feed(&self, session: &str) -> Result<Vec<Event>, SocialError> {
        let url = self.endpoint(&["me", "feed", "unread"])?;
        let list: EventList = self
            .send_json(self.request(Method::GET, url, Some(session)))
            .await?;
        Ok(list.events)
    }

    async fn fetch_unread_count(&self, session: &str) -> Result<usize, SocialError> {
        let url = self.endpoint(&["me", "feed", "unread", "count"])?;
        let count: UnreadCount = self
            .send_json(self.request(Method::GET, url, Some(session)))
            .await?;
        Ok(count.count)
    }
}

fn connection_collection(connection_type: ConnectionType) -> &'static str {
    match connection_type {
        ConnectionType::Follow => "follows",
        ConnectionType::Followers => "followers",
        ConnectionType::Friend => "friends",
    }
}

async fn check_status(response: Response) -> Result<Response, SocialError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.bytes().await.map_err(map_reqwest_error)?;
    Err(error_from_response(status, &body, retry_after))
}

/// Map a non-success response onto the taxonomy.
///
/// Service error payloads win, except for rate limiting which stays
/// retryable whatever the body says. Only the first reported error is
/// surfaced.
pub(crate) fn error_from_response(
    status: StatusCode,
    body: &[u8],
    retry_after: Option<Duration>,
) -> SocialError {
    if status != StatusCode::TOO_MANY_REQUESTS
        && let Ok(payload) = serde_json::from_slice::<ErrorPayload>(body)
    {
        let mut errors = payload.errors.into_iter();
        if let Some(first) = errors.next() {
            for extra in errors {
                debug!(
                    code = extra.code,
                    message = %extra.message,
                    "ignoring additional service error"
                );
            }
            return SocialError::from_wire(first.code, first.message);
        }
    }

    let snippet: String = String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_SNIPPET)
        .collect();
    let mut error = SocialError::transport(
        classify_http_status(status.as_u16()),
        format!("http status {}: {}", status.as_u16(), snippet.trim()),
    );
    if let Some(retry_after) = retry_after {
        error = error.with_retry_after(retry_after);
    }
    error
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn map_reqwest_error(err: reqwest::Error) -> SocialError {
    if let Some(status) = err.status() {
        return SocialError::transport(classify_http_status(status.as_u16()), err.to_string());
    }
    if err.is_decode() {
        return SocialError::serialization(err.to_string());
    }
    if err.is_builder() {
        return SocialError::transport(ErrorCategory::Internal, err.to_string());
    }
    // Timeouts, connect failures and broken bodies are all worth retrying.
    SocialError::transport(ErrorCategory::Network, err.to_string())
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;
    use social_core::{EventErrorCode, UserErrorCode};

    use super::*;

    fn transport(base: &str) -> HttpTransport {
        let config = ClientConfig::new("app-token", Url::parse(base).expect("valid url"));
        HttpTransport::new(&config).expect("client should build")
    }

    #[test]
    fn builds_versioned_encoded_endpoints() {
        let http = transport("https://api.example.com/");
        assert_eq!(
            http.endpoint(&["users", "a/b c"]).expect("endpoint").as_str(),
            "https://api.example.com/0.4/users/a%2Fb%20c"
        );

        let nested = transport("http://localhost:8083/social");
        assert_eq!(
            nested.endpoint(&["me", "feed"]).expect("endpoint").as_str(),
            "http://localhost:8083/social/0.4/me/feed"
        );
    }

    #[test]
    fn maps_service_error_payloads() {
        let body = br#"{"errors":[{"code":1001,"message":"user not found"}]}"#;
        let err = error_from_response(StatusCode::NOT_FOUND, body, None);
        assert_eq!(
            err,
            SocialError::user(UserErrorCode::NotFound, "user not found")
        );

        let body = br#"{"errors":[{"code":3008,"message":"a"},{"code":3004,"message":"b"}]}"#;
        let err = error_from_response(StatusCode::BAD_REQUEST, body, None);
        assert_eq!(err, SocialError::event(EventErrorCode::TypeSize, "a"));
    }

    #[test]
    fn conflict_with_several_errors_still_reads_as_existing_account() {
        let body = br#"{"errors":[{"code":1008,"message":"username in use"},{"code":1002,"message":"email exists"}]}"#;
        let err = error_from_response(StatusCode::CONFLICT, body, None);
        assert_eq!(err.code(), Some(1008));
        assert!(err.is_existing_account());
    }

    #[test]
    fn falls_back_to_status_classification() {
        let err = error_from_response(StatusCode::BAD_GATEWAY, b"<html>oops</html>", None);
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_recoverable());

        let err = error_from_response(
            StatusCode::TOO_MANY_REQUESTS,
            br#"{"errors":[{"code":4001,"message":"slow down"}]}"#,
            Some(Duration::from_secs(7)),
        );
        assert_eq!(err.category(), ErrorCategory::RateLimited);
        assert_eq!(err.retry_after_ms(), Some(7_000));
    }

    #[test]
    fn parses_retry_after_seconds_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn login_request_carries_one_identifier() {
        let creds = Credentials::email("alice@example.org", "pw");
        let json = serde_json::to_value(LoginRequest::from(&creds)).expect("serialize");
        assert_eq!(json["email"], "alice@example.org");
        assert!(json.get("user_name").is_none());

        let response: LoginResponse = serde_json::from_str(
            r#"{"id":"u1","user_name":"alice","session_token":"tok-1"}"#,
        )
        .expect("login response should parse");
        assert_eq!(response.user.id.as_deref(), Some("u1"));
        assert_eq!(response.session_token, "tok-1");
    }

    #[test]
    fn connection_collections_match_service_paths() {
        assert_eq!(connection_collection(ConnectionType::Follow), "follows");
        assert_eq!(connection_collection(ConnectionType::Followers), "followers");
        assert_eq!(connection_collection(ConnectionType::Friend), "friends");
    }
}
