use crate::{
    error::SocialError,
    types::{ClientNotice, SessionState},
};

/// Session-level actions validated against the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Login, or create-and-login.
    Login,
    /// Restore a persisted session without contacting the service.
    RestoreSession,
    Logout,
    DeleteCurrentUser,
    /// Any operation that requires an authenticated session.
    Authenticated { action: &'static str },
}

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::LoggedOut,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    pub fn apply(&mut self, command: &SessionCommand) -> Result<Vec<ClientNotice>, SocialError> {
        match command {
            SessionCommand::Login => self.transition_from_state(
                SessionState::LoggedOut,
                SessionState::LoggingIn,
                "login",
            ),
            SessionCommand::RestoreSession => self.transition_from_state(
                SessionState::LoggedOut,
                SessionState::LoggingIn,
                "restore_session",
            ),
            SessionCommand::Logout => self.transition_from_state(
                SessionState::LoggedIn,
                SessionState::LoggingOut,
                "logout",
            ),
            SessionCommand::DeleteCurrentUser => self.transition_from_state(
                SessionState::LoggedIn,
                SessionState::LoggingOut,
                "delete_current_user",
            ),
            SessionCommand::Authenticated { action } => {
                if self.is_logged_in() {
                    Ok(Vec::new())
                } else {
                    Err(SocialError::invalid_state(self.state, *action))
                }
            }
        }
    }

    pub fn on_auth_result(&mut self, success: bool) -> Result<ClientNotice, SocialError> {
        let next = if success {
            SessionState::LoggedIn
        } else {
            SessionState::LoggedOut
        };
        self.resolve_from(SessionState::LoggingIn, next, "on_auth_result")
    }

    /// Finish a logout or current-user deletion.
    pub fn on_logout_complete(&mut self) -> Result<ClientNotice, SocialError> {
        self.resolve_from(
            SessionState::LoggingOut,
            SessionState::LoggedOut,
            "on_logout_complete",
        )
    }

    /// Return to `LoggedIn` after a current-user deletion was refused.
    pub fn on_logout_aborted(&mut self) -> Result<ClientNotice, SocialError> {
        self.resolve_from(
            SessionState::LoggingOut,
            SessionState::LoggedIn,
            "on_logout_aborted",
        )
    }

    fn resolve_from(
        &mut self,
        expected: SessionState,
        next: SessionState,
        action: &str,
    ) -> Result<ClientNotice, SocialError> {
        if self.state != expected {
            return Err(SocialError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(ClientNotice::SessionChanged { state: next })
    }

    fn transition_from_state(
        &mut self,
        expected: SessionState,
        next: SessionState,
        action: &str,
    ) -> Result<Vec<ClientNotice>, SocialError> {
        Ok(vec![self.resolve_from(expected, next, action)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientErrorCode;

    #[test]
    fn runs_happy_path_state_transitions() {
        let mut sm = SessionStateMachine::default();
        assert_eq!(sm.state(), SessionState::LoggedOut);

        sm.apply(&SessionCommand::Login).expect("login must work");
        assert_eq!(sm.state(), SessionState::LoggingIn);

        sm.on_auth_result(true).expect("auth should resolve");
        assert_eq!(sm.state(), SessionState::LoggedIn);

        sm.apply(&SessionCommand::Authenticated {
            action: "create_event",
        })
        .expect("gated action allowed while logged in");

        sm.apply(&SessionCommand::Logout).expect("logout should work");
        assert_eq!(sm.state(), SessionState::LoggingOut);

        let notice = sm.on_logout_complete().expect("logout should complete");
        assert_eq!(
            notice,
            ClientNotice::SessionChanged {
                state: SessionState::LoggedOut
            }
        );
    }

    #[test]
    fn failed_auth_returns_to_logged_out() {
        let mut sm = SessionStateMachine::default();
        sm.apply(&SessionCommand::Login).expect("login must work");
        sm.on_auth_result(false).expect("auth should resolve");
        assert_eq!(sm.state(), SessionState::LoggedOut);
    }

    #[test]
    fn rejects_gated_actions_outside_logged_in() {
        let mut sm = SessionStateMachine::default();
        let err = sm
            .apply(&SessionCommand::Authenticated {
                action: "create_connection",
            })
            .expect_err("gated action should fail when logged out");
        assert!(matches!(
            err,
            SocialError::Client {
                code: ClientErrorCode::NoPermission,
                ..
            }
        ));

        sm.apply(&SessionCommand::Login).expect("login must work");
        sm.apply(&SessionCommand::Authenticated {
            action: "create_connection",
        })
        .expect_err("gated action should fail while logging in");
    }

    #[test]
    fn rejects_second_login_and_logout_when_logged_out() {
        let mut sm = SessionStateMachine::default();
        sm.apply(&SessionCommand::Logout)
            .expect_err("logout requires a session");

        sm.apply(&SessionCommand::Login).expect("login must work");
        sm.apply(&SessionCommand::RestoreSession)
            .expect_err("restore while logging in must fail");
    }

    #[test]
    fn aborted_delete_returns_to_logged_in() {
        let mut sm = SessionStateMachine::default();
        sm.apply(&SessionCommand::RestoreSession).expect("restore");
        sm.on_auth_result(true).expect("auth");
        sm.apply(&SessionCommand::DeleteCurrentUser).expect("delete");
        sm.on_logout_aborted().expect("abort");
        assert_eq!(sm.state(), SessionState::LoggedIn);
    }
}
