use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use social_core::{
    AuthErrorCode, ClientErrorCode, EventQueue, FeedCache, NoticeChannel, NoticeStream,
    SessionCommand, SessionState, SessionStateMachine, SocialError, User, UserErrorCode,
};
use social_platform::{FileCredentialStore, SessionPersistence};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    http::HttpTransport,
    scheduler::FlushScheduler,
    transport::{AuthenticatedUser, Credentials, Transport},
};

#[derive(Debug, Default)]
pub(crate) struct SessionContext {
    pub(crate) machine: SessionStateMachine,
    pub(crate) session_token: Option<String>,
    pub(crate) current_user: Option<User>,
    /// Bumped whenever a session ends; results of older requests are dropped.
    pub(crate) epoch: u64,
}

#[derive(Debug, Default)]
pub(crate) struct FlushBackoff {
    pub(crate) consecutive_failures: u32,
    pub(crate) not_before: Option<Instant>,
}

/// Token, epoch and user of the session a request runs under.
#[derive(Debug, Clone)]
pub(crate) struct SessionTicket {
    pub(crate) token: String,
    pub(crate) epoch: u64,
    pub(crate) user_id: Option<String>,
}

// Lock order: session, then queue, then feed, then backoff.
pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    persistence: Option<SessionPersistence>,
    session: Mutex<SessionContext>,
    queue: Mutex<EventQueue>,
    feed: RwLock<FeedCache>,
    pub(crate) notices: NoticeChannel,
    pub(crate) flush_lock: tokio::sync::Mutex<()>,
    backoff: Mutex<FlushBackoff>,
    pub(crate) scheduler: FlushScheduler,
}

impl ClientInner {
    pub(crate) fn session(&self) -> MutexGuard<'_, SessionContext> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn queue(&self) -> MutexGuard<'_, EventQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn feed(&self) -> RwLockReadGuard<'_, FeedCache> {
        self.feed.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn feed_mut(&self) -> RwLockWriteGuard<'_, FeedCache> {
        self.feed.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn backoff(&self) -> MutexGuard<'_, FlushBackoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Session context of the social graph client.
///
/// Cloning is cheap and every clone shares the same session, event queue
/// and feed cache. Operations that need an authenticated user fail with
/// `NoPermission` outside `LoggedIn` without touching the network.
#[derive(Clone)]
pub struct SocialClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl SocialClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        persistence: Option<SessionPersistence>,
    ) -> Self {
        let notices = NoticeChannel::new(config.notice_buffer);
        let feed = FeedCache::new(config.feed_max_items);
        let scheduler = FlushScheduler::new(config.flush_interval);
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                persistence,
                session: Mutex::new(SessionContext::default()),
                queue: Mutex::new(EventQueue::new()),
                feed: RwLock::new(feed),
                notices,
                flush_lock: tokio::sync::Mutex::new(()),
                backoff: Mutex::new(FlushBackoff::default()),
                scheduler,
            }),
        }
    }

    /// Client over the HTTP transport, persisting the session to
    /// `session_store_path` when one is configured.
    pub fn with_http(config: ClientConfig) -> Result<Self, SocialError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let persistence = config.session_store_path.as_ref().map(|path| {
            SessionPersistence::new(
                Arc::new(FileCredentialStore::new(path.clone())),
                config.session_service.clone(),
            )
        });
        Ok(Self::new(config, transport, persistence))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Subscribe to session, flush and feed notices.
    pub fn subscribe(&self) -> NoticeStream {
        self.inner.notices.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.session().machine.state()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.session().machine.is_logged_in()
    }

    /// The authenticated user, if any.
    pub fn current_user(&self) -> Option<User> {
        self.inner.session().current_user.clone()
    }

    pub async fn login(&self, credentials: Credentials) -> Result<User, SocialError> {
        validate_credentials(&credentials)?;
        self.begin_login(SessionCommand::Login)?;
        let result = self.inner.transport.login(&credentials).await;
        self.finish_login(result, true)
    }

    /// Create the user and log in. A user that already exists is logged in
    /// with the same credentials instead.
    pub async fn create_and_login_user(&self, user: User) -> Result<User, SocialError> {
        let credentials = credentials_for_new_user(&user)?;
        self.begin_login(SessionCommand::Login)?;

        let result = match self.inner.transport.create_user(&user).await {
            Ok(created) => {
                debug!(user_id = created.id.as_deref().unwrap_or("-"), "user created");
                self.inner.transport.login(&credentials).await
            }
            Err(err) if err.is_existing_account() => {
                info!("user already exists; logging in instead");
                self.inner.transport.login(&credentials).await
            }
            Err(err) => Err(err),
        };
        self.finish_login(result, true)
    }

    /// Resume the persisted session without contacting the service.
    ///
    /// Returns `None` when nothing usable was persisted.
    pub async fn restore_session(&self) -> Result<Option<User>, SocialError> {
        self.begin_login(SessionCommand::RestoreSession)?;
        let Some(persistence) = self.inner.persistence.clone() else {
            self.abort_login();
            return Ok(None);
        };

        // Credential stores may hit the filesystem or the OS keychain.
        let loaded = tokio::task::spawn_blocking(move || persistence.load())
            .await
            .unwrap_or_else(|err| {
                Err(SocialError::storage(format!(
                    "session load task failed: {err}"
                )))
            });
        match loaded {
            Ok(Some(session)) => self
                .finish_login(
                    Ok(AuthenticatedUser {
                        user: session.user,
                        session_token: session.session_token,
                    }),
                    false,
                )
                .map(Some),
            Ok(None) => {
                debug!("no persisted session to restore");
                self.abort_login();
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "failed loading persisted session");
                self.abort_login();
                Err(err)
            }
        }
    }

    /// End the session. Local state is cleared even when the service call
    /// fails; that failure is still returned.
    pub async fn logout(&self) -> Result<(), SocialError> {
        let (token, notices) = {
            let mut session = self.inner.session();
            let notices = session.machine.apply(&SessionCommand::Logout)?;
            (session.session_token.clone(), notices)
        };
        self.inner.notices.emit_all(notices);
        self.inner.scheduler.stop();

        let remote = match &token {
            Some(token) => self.inner.transport.logout(token).await,
            None => Ok(()),
        };
        self.clear_local_session();

        match remote {
            Ok(()) => {
                info!("logged out");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "remote logout failed; local session cleared");
                Err(err)
            }
        }
    }

    /// Re-fetch the current user and overwrite the cached copy.
    pub async fn retrieve_current_user(&self) -> Result<User, SocialError> {
        let ticket = self.authenticated("retrieve_current_user")?;
        let user = self
            .inner
            .transport
            .retrieve_current_user(&ticket.token)
            .await?;
        self.replace_current_user(&ticket, user)
    }

    pub async fn update_current_user(&self, user: User) -> Result<User, SocialError> {
        let ticket = self.authenticated("update_current_user")?;
        if let (Some(id), Some(current)) = (user.id.as_deref(), ticket.user_id.as_deref())
            && id != current
        {
            return Err(SocialError::client(
                ClientErrorCode::NoPermission,
                format!("cannot update user '{id}' from the session of '{current}'"),
            ));
        }
        validate_profile(&user)?;

        let updated = self
            .inner
            .transport
            .update_current_user(&ticket.token, &user)
            .await?;
        self.replace_current_user(&ticket, updated)
    }

    /// Delete the current user remotely and end the session. On failure the
    /// session stays logged in.
    pub async fn delete_current_user(&self) -> Result<(), SocialError> {
        let (token, notices) = {
            let mut session = self.inner.session();
            let notices = session.machine.apply(&SessionCommand::DeleteCurrentUser)?;
            (session.session_token.clone().unwrap_or_default(), notices)
        };
        self.inner.notices.emit_all(notices);

        match self.inner.transport.delete_current_user(&token).await {
            Ok(()) => {
                self.clear_local_session();
                info!("current user deleted");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "current user deletion failed");
                let notice = self.inner.session().machine.on_logout_aborted();
                match notice {
                    Ok(notice) => self.inner.notices.emit(notice),
                    Err(state_err) => warn!(error = %state_err, "unexpected session state"),
                }
                Err(err)
            }
        }
    }

    pub(crate) fn authenticated(&self, action: &'static str) -> Result<SessionTicket, SocialError> {
        ticket_for(&mut self.inner.session(), action)
    }

    fn begin_login(&self, command: SessionCommand) -> Result<(), SocialError> {
        let notices = self.inner.session().machine.apply(&command)?;
        self.inner.notices.emit_all(notices);
        Ok(())
    }

    fn abort_login(&self) {
        let notice = self.inner.session().machine.on_auth_result(false);
        match notice {
            Ok(notice) => self.inner.notices.emit(notice),
            Err(err) => warn!(error = %err, "unexpected session state"),
        }
    }

    fn finish_login(
        &self,
        result: Result<AuthenticatedUser, SocialError>,
        persist: bool,
    ) -> Result<User, SocialError> {
        let AuthenticatedUser {
            user,
            session_token,
        } = match result {
            Ok(authenticated) => authenticated,
            Err(err) => {
                warn!(error = %err, "login failed");
                self.abort_login();
                return Err(err);
            }
        };

        let user = user.without_password();
        if persist {
            self.persist_session(&session_token, &user);
        }

        let notice = {
            let mut session = self.inner.session();
            let notice = session.machine.on_auth_result(true)?;
            session.session_token = Some(session_token);
            session.current_user = Some(user.clone());
            notice
        };
        *self.inner.backoff() = FlushBackoff::default();
        self.inner.notices.emit(notice);
        self.start_flush_timer();

        info!(
            user_id = user.id.as_deref().unwrap_or("-"),
            "session established"
        );
        Ok(user)
    }

    fn replace_current_user(&self, ticket: &SessionTicket, user: User) -> Result<User, SocialError> {
        let user = user.without_password();
        {
            let mut session = self.inner.session();
            ensure_current(&session, ticket, "replace_current_user")?;
            session.current_user = Some(user.clone());
        }
        self.persist_session(&ticket.token, &user);
        Ok(user)
    }

    fn persist_session(&self, session_token: &str, user: &User) {
        if let Some(persistence) = &self.inner.persistence
            && let Err(err) = persistence.save(session_token, user)
        {
            warn!(error = %err, "failed persisting session; continuing without it");
        }
    }

    fn clear_local_session(&self) {
        self.inner.scheduler.stop();
        let (dropped, notice) = {
            let mut session = self.inner.session();
            session.epoch = session.epoch.wrapping_add(1);
            session.session_token = None;
            session.current_user = None;
            let dropped = self.inner.queue().clear();
            self.inner.feed_mut().clear();
            (dropped, session.machine.on_logout_complete())
        };
        *self.inner.backoff() = FlushBackoff::default();

        if dropped > 0 {
            warn!(dropped, "discarded unsent event mutations at session end");
        }
        if let Some(persistence) = &self.inner.persistence
            && let Err(err) = persistence.clear()
        {
            warn!(error = %err, "failed clearing persisted session");
        }
        match notice {
            Ok(notice) => self.inner.notices.emit(notice),
            Err(err) => warn!(error = %err, "unexpected session state"),
        }
    }

    fn start_flush_timer(&self) {
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                SocialClient { inner }.flush_on_timer().await;
                true
            }
        });
    }
}

pub(crate) fn ticket_for(
    session: &mut SessionContext,
    action: &'static str,
) -> Result<SessionTicket, SocialError> {
    session
        .machine
        .apply(&SessionCommand::Authenticated { action })?;
    let token = session.session_token.clone().ok_or_else(|| {
        SocialError::client(
            ClientErrorCode::InconsistentData,
            "logged in without a session token",
        )
    })?;
    Ok(SessionTicket {
        token,
        epoch: session.epoch,
        user_id: session.current_user.as_ref().and_then(|user| user.id.clone()),
    })
}

/// Fail when the session a request started under has ended meanwhile.
pub(crate) fn ensure_current(
    session: &SessionContext,
    ticket: &SessionTicket,
    action: &str,
) -> Result<(), SocialError> {
    if session.epoch != ticket.epoch || !session.machine.is_logged_in() {
        return Err(SocialError::invalid_state(session.machine.state(), action));
    }
    Ok(())
}

fn validate_credentials(credentials: &Credentials) -> Result<(), SocialError> {
    if credentials.identifier().trim().is_empty() {
        return Err(SocialError::auth(
            AuthErrorCode::GotNoUsernameOrEmail,
            "login requires a username or an email",
        ));
    }
    if credentials.password().is_empty() {
        return Err(SocialError::auth(
            AuthErrorCode::PasswordEmpty,
            "password must not be empty",
        ));
    }
    if let Credentials::Email { email, .. } = credentials
        && !email.contains('@')
    {
        return Err(SocialError::auth(
            AuthErrorCode::InvalidEmailAddress,
            format!("'{email}' is not an email address"),
        ));
    }
    Ok(())
}

fn credentials_for_new_user(user: &User) -> Result<Credentials, SocialError> {
    let has = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    if !has(&user.username) && !has(&user.email) {
        return Err(SocialError::user(
            UserErrorCode::UsernameAndEmailAreEmpty,
            "a new user needs a username or an email",
        ));
    }
    validate_profile(user)?;
    let credentials = Credentials::for_user(user).ok_or_else(|| {
        SocialError::auth(AuthErrorCode::PasswordEmpty, "a new user needs a password")
    })?;
    validate_credentials(&credentials)?;
    Ok(credentials)
}

fn validate_profile(user: &User) -> Result<(), SocialError> {
    if user
        .username
        .as_deref()
        .is_some_and(|username| username.trim().is_empty())
    {
        return Err(SocialError::user(
            UserErrorCode::UsernameSize,
            "username must not be blank",
        ));
    }
    if let Some(email) = user.email.as_deref()
        && !email.contains('@')
    {
        return Err(SocialError::user(
            UserErrorCode::EmailInvalid,
            format!("'{email}' is not an email address"),
        ));
    }
    Ok(())
}
