use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// Broad error category used for retry decisions and user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input rejected locally or by the service as invalid.
    Validation,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the service.
    RateLimited,
    /// The service failed internally while handling a valid request.
    Server,
    /// Local persistence failure.
    Storage,
    /// Serialization/deserialization failure.
    Serialization,
    /// Client bug or broken invariant.
    Internal,
}

macro_rules! error_codes {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Numeric wire code reported by the service.
            pub fn code(self) -> u16 {
                match self {
                    $( Self::$variant => $code, )+
                }
            }

            /// Resolve a numeric wire code belonging to this group.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:?}({})", self, self.code())
            }
        }
    };
}

error_codes! {
    /// Errors raised by the client itself.
    ClientErrorCode {
        UnknownError = 100,
        MultipleErrors = 101,
        /// Saving or deleting resources the current user does not own, or
        /// calling a session-gated operation while not logged in.
        NoPermission = 102,
        NoSocialIdForPlatform = 103,
        /// A precondition of the request was not fulfilled.
        InconsistentData = 104,
    }
}

error_codes! {
    /// Application user errors, including internal service failures.
    UserErrorCode {
        NotActivated = 1000,
        NotFound = 1001,
        EmailAlreadyExists = 1002,
        EmailInvalid = 1003,
        FirstNameSize = 1004,
        IdInvalid = 1005,
        LastNameSize = 1006,
        UsernameAndEmailAreEmpty = 1007,
        UsernameInUse = 1008,
        SearchTypeMin3Chars = 1009,
        UrlInvalid = 1010,
        UsernameAlreadyExists = 1011,
        UsernameSize = 1012,
        InternalCreation = 1500,
        InternalRead = 1502,
        InternalSessionCreation = 1503,
        InternalSessionDelete = 1504,
        InternalUpdate = 1508,
    }
}

error_codes! {
    /// Connection graph errors.
    ConnectionErrorCode {
        AlreadyExists = 2000,
        NotFound = 2001,
        TypeIsWrong = 2002,
        SelfConnectingUser = 2003,
        UsersNotConnected = 2004,
        InternalConnectingUsers = 2500,
        InternalCreation = 2501,
        InternalRead = 2502,
        InternalUpdate = 2503,
    }
}

error_codes! {
    /// Event and event-list errors.
    EventErrorCode {
        IdInvalid = 3002,
        IdIsAlreadySet = 3003,
        InvalidVisibility = 3004,
        NotFound = 3007,
        TypeSize = 3008,
        InternalCreation = 3500,
        InternalRead = 3501,
        InternalEventsList = 3502,
        InternalUpdate = 3503,
        InternalFollowersList = 3504,
        InternalFollowingList = 3505,
        InternalFriendsList = 3506,
    }
}

error_codes! {
    /// Authentication errors.
    AuthErrorCode {
        Generic = 4001,
        GotBothUsernameAndEmail = 4002,
        GotNoUsernameOrEmail = 4003,
        InvalidApplicationUserCredentials = 4007,
        InvalidEmailAddress = 4008,
        MethodNotSupported = 4009,
        PasswordEmpty = 4010,
        PasswordMismatch = 4011,
        SessionTokenMismatch = 4012,
    }
}

error_codes! {
    /// Generic server-side errors.
    ServerErrorCode {
        InvalidImageUrl = 5000,
    }
}

/// Codes at or above this value within a group are internal service failures.
fn is_internal_code(code: u16) -> bool {
    code % 1000 >= 500
}

/// Error returned by every fallible client operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum SocialError {
    #[error("client error {code}: {message}")]
    Client {
        code: ClientErrorCode,
        message: String,
    },
    #[error("user error {code}: {message}")]
    User { code: UserErrorCode, message: String },
    #[error("connection error {code}: {message}")]
    Connection {
        code: ConnectionErrorCode,
        message: String,
    },
    #[error("event error {code}: {message}")]
    Event { code: EventErrorCode, message: String },
    #[error("auth error {code}: {message}")]
    Auth { code: AuthErrorCode, message: String },
    #[error("server error {code}: {message}")]
    Server {
        code: ServerErrorCode,
        message: String,
    },
    /// Several independent failures from one partially applied operation.
    #[error("{} errors occurred", .errors.len())]
    Multiple { errors: Vec<SocialError> },
    /// Transport failure without a service error payload.
    #[error("transport {category:?}: {message}")]
    Transport {
        category: ErrorCategory,
        message: String,
        /// Optional retry hint in milliseconds.
        retry_after_ms: Option<u64>,
    },
    #[error("storage failure: {message}")]
    Storage { message: String },
    #[error("serialization failure: {message}")]
    Serialization { message: String },
}

impl SocialError {
    pub fn client(code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self::Client {
            code,
            message: message.into(),
        }
    }

    pub fn user(code: UserErrorCode, message: impl Into<String>) -> Self {
        Self::User {
            code,
            message: message.into(),
        }
    }

    pub fn connection(code: ConnectionErrorCode, message: impl Into<String>) -> Self {
        Self::Connection {
            code,
            message: message.into(),
        }
    }

    pub fn event(code: EventErrorCode, message: impl Into<String>) -> Self {
        Self::Event {
            code,
            message: message.into(),
        }
    }

    pub fn auth(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self::Auth {
            code,
            message: message.into(),
        }
    }

    pub fn transport(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Transport {
            category,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Map a numeric code reported by the service onto the taxonomy.
    ///
    /// Unknown codes become `ClientErrorCode::UnknownError` with the code kept
    /// in the message.
    pub fn from_wire(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if let Some(code) = ClientErrorCode::from_code(code) {
            return Self::Client { code, message };
        }
        if let Some(code) = UserErrorCode::from_code(code) {
            return Self::User { code, message };
        }
        if let Some(code) = ConnectionErrorCode::from_code(code) {
            return Self::Connection { code, message };
        }
        if let Some(code) = EventErrorCode::from_code(code) {
            return Self::Event { code, message };
        }
        if let Some(code) = AuthErrorCode::from_code(code) {
            return Self::Auth { code, message };
        }
        if let Some(code) = ServerErrorCode::from_code(code) {
            return Self::Server { code, message };
        }
        Self::Client {
            code: ClientErrorCode::UnknownError,
            message: format!("unrecognized error code {code}: {message}"),
        }
    }

    /// Aggregate failures; a single error is returned unchanged and nested
    /// aggregates are flattened.
    pub fn multiple(errors: impl IntoIterator<Item = SocialError>) -> Self {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                Self::Multiple { errors } => flat.extend(errors),
                other => flat.push(other),
            }
        }
        if flat.len() == 1
            && let Some(single) = flat.pop()
        {
            return single;
        }
        Self::Multiple { errors: flat }
    }

    /// Build the error returned by session-gated operations outside `LoggedIn`.
    pub fn invalid_state(current: SessionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::client(
            ClientErrorCode::NoPermission,
            format!("cannot run '{action}' while session is {current:?}"),
        )
    }

    /// Attach a retry hint. Only transport failures carry one.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        if let Self::Transport { retry_after_ms, .. } = &mut self {
            *retry_after_ms = Some(retry_after.as_millis() as u64);
        }
        self
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Transport { retry_after_ms, .. } => *retry_after_ms,
            Self::Multiple { errors } => errors.iter().filter_map(Self::retry_after_ms).max(),
            _ => None,
        }
    }

    /// Numeric taxonomy code, when the error belongs to the taxonomy.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Client { code, .. } => Some(code.code()),
            Self::User { code, .. } => Some(code.code()),
            Self::Connection { code, .. } => Some(code.code()),
            Self::Event { code, .. } => Some(code.code()),
            Self::Auth { code, .. } => Some(code.code()),
            Self::Server { code, .. } => Some(code.code()),
            Self::Multiple { .. } => Some(ClientErrorCode::MultipleErrors.code()),
            Self::Transport { .. } | Self::Storage { .. } | Self::Serialization { .. } => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Client { code, .. } => match code {
                ClientErrorCode::UnknownError => ErrorCategory::Internal,
                ClientErrorCode::NoPermission => ErrorCategory::Auth,
                _ => ErrorCategory::Validation,
            },
            Self::User { code, .. } => group_category(code.code(), ErrorCategory::Validation),
            Self::Connection { code, .. } => {
                group_category(code.code(), ErrorCategory::Validation)
            }
            Self::Event { code, .. } => group_category(code.code(), ErrorCategory::Validation),
            Self::Auth { code, .. } => group_category(code.code(), ErrorCategory::Auth),
            Self::Server { .. } => ErrorCategory::Server,
            Self::Multiple { errors } => errors
                .first()
                .map(Self::category)
                .unwrap_or(ErrorCategory::Internal),
            Self::Transport { category, .. } => *category,
            Self::Storage { .. } => ErrorCategory::Storage,
            Self::Serialization { .. } => ErrorCategory::Serialization,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Multiple { errors } => {
                !errors.is_empty() && errors.iter().all(Self::is_recoverable)
            }
            other => matches!(
                other.category(),
                ErrorCategory::Network | ErrorCategory::RateLimited
            ),
        }
    }

    /// Whether the service reported an already-existing username or email.
    pub fn is_existing_account(&self) -> bool {
        matches!(
            self,
            Self::User {
                code: UserErrorCode::UsernameInUse
                    | UserErrorCode::UsernameAlreadyExists
                    | UserErrorCode::EmailAlreadyExists,
                ..
            }
        )
    }
}

fn group_category(code: u16, default: ErrorCategory) -> ErrorCategory {
    if is_internal_code(code) {
        ErrorCategory::Server
    } else {
        default
    }
}

/// Map HTTP status codes without a service error payload to categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        408 | 429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Validation,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), ErrorCategory::Auth);
        assert_eq!(classify_http_status(429), ErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), ErrorCategory::Validation);
        assert_eq!(classify_http_status(503), ErrorCategory::Network);
        assert_eq!(classify_http_status(700), ErrorCategory::Internal);
    }

    #[test]
    fn maps_wire_codes_onto_groups() {
        assert_eq!(
            SocialError::from_wire(3003, "id set"),
            SocialError::event(EventErrorCode::IdIsAlreadySet, "id set")
        );
        assert_eq!(
            SocialError::from_wire(2003, "self"),
            SocialError::connection(ConnectionErrorCode::SelfConnectingUser, "self")
        );
        assert_eq!(
            SocialError::from_wire(4012, "token"),
            SocialError::auth(AuthErrorCode::SessionTokenMismatch, "token")
        );
        assert!(matches!(
            SocialError::from_wire(5000, "img"),
            SocialError::Server {
                code: ServerErrorCode::InvalidImageUrl,
                ..
            }
        ));
    }

    #[test]
    fn unknown_wire_codes_keep_the_code_in_the_message() {
        let err = SocialError::from_wire(9999, "boom");
        match err {
            SocialError::Client { code, message } => {
                assert_eq!(code, ClientErrorCode::UnknownError);
                assert!(message.contains("9999"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn internal_codes_are_server_category() {
        let err = SocialError::from_wire(3500, "create failed");
        assert_eq!(err.category(), ErrorCategory::Server);
        assert_eq!(err.code(), Some(3500));

        let err = SocialError::from_wire(3008, "type too long");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = SocialError::invalid_state(SessionState::LoggedOut, "create_connection");
        assert_eq!(err.code(), Some(102));
        assert_eq!(err.category(), ErrorCategory::Auth);
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = SocialError::transport(ErrorCategory::RateLimited, "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms(), Some(3000));
        assert!(err.is_recoverable());
    }

    #[test]
    fn multiple_flattens_and_unwraps_singletons() {
        let single = SocialError::multiple([SocialError::storage("disk")]);
        assert_eq!(single, SocialError::storage("disk"));

        let nested = SocialError::multiple([
            SocialError::multiple([
                SocialError::storage("a"),
                SocialError::serialization("b"),
            ]),
            SocialError::storage("c"),
        ]);
        match nested {
            SocialError::Multiple { errors } => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            SocialError::multiple([SocialError::storage("a"), SocialError::storage("b")]).code(),
            Some(101)
        );
    }

    #[test]
    fn only_network_and_rate_limit_failures_are_recoverable() {
        assert!(SocialError::transport(ErrorCategory::Network, "reset").is_recoverable());
        assert!(!SocialError::transport(ErrorCategory::Auth, "denied").is_recoverable());
        assert!(!SocialError::event(EventErrorCode::TypeSize, "empty").is_recoverable());
        assert!(!SocialError::from_wire(3500, "internal").is_recoverable());
    }
}
