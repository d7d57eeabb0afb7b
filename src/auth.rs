use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::error::AppError;
use crate::models::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    pub email_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The auth service has not reported yet.
    Loading,
    SignedOut,
    SignedIn(AuthUser),
}

/// Current-user signal fed by the external auth service.
///
/// Cloning is cheap and every clone observes the same state.
#[derive(Debug, Clone)]
pub struct AuthSession {
    tx: Arc<watch::Sender<AuthState>>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState::Loading);
        Self { tx: Arc::new(tx) }
    }

    pub fn signed_in(user: UserId) -> Self {
        let session = Self::new();
        session.sign_in(user, true);
        session
    }

    pub fn sign_in(&self, id: UserId, email_verified: bool) {
        info!("auth state: signed in as {}", id);
        self.tx.send_replace(AuthState::SignedIn(AuthUser { id, email_verified }));
    }

    pub fn sign_out(&self) {
        info!("auth state: signed out");
        self.tx.send_replace(AuthState::SignedOut);
    }

    pub fn state(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.tx.borrow(), AuthState::Loading)
    }

    pub fn current_user(&self) -> Option<UserId> {
        match &*self.tx.borrow() {
            AuthState::SignedIn(user) => Some(user.id.clone()),
            _ => None,
        }
    }

    pub fn require_user(&self) -> Result<UserId, AppError> {
        self.current_user().ok_or(AppError::AuthenticationRequired)
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }
}
