//! Login lifecycle and the owned, per-visitor session store.
//!
//! States: `unauthenticated -> {pending_role_selection | authenticated} -> unauthenticated`.
//! A credential pair valid for several roles parks the session in
//! `PendingRoleSelection`, which is the only state holding the submitted
//! credentials and the only state `select_role` accepts.
//!
//! Transitions are serialized: at most one of submit/select/switch/restore/
//! adopt/logout runs at a time and a second call while one is in flight is
//! rejected with `SessionError::Busy`. State is only written after the
//! collaborator call returns, so a dropped future leaves the session untouched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::actor::Actor;
use super::provider::{AuthGrant, IdentityProvider, LoginOutcome, LoginRequest};
use super::role::Role;
use crate::backend::ApiError;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unauthenticated,
    PendingRoleSelection,
    Authenticated,
}

struct PendingLogin {
    credentials: LoginRequest,
    available_roles: Vec<Role>,
}

struct ActiveSession {
    actor: Actor,
    token: String,
    available_roles: Vec<Role>,
    expires_at: Instant,
}

enum SessionState {
    Unauthenticated,
    PendingRoleSelection(PendingLogin),
    Authenticated(ActiveSession),
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            SessionState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionState::PendingRoleSelection(_) => SessionStatus::PendingRoleSelection,
            SessionState::Authenticated(_) => SessionStatus::Authenticated,
        }
    }
}

/// Point-in-time copy of the session. `actor` is set exactly when `status` is `Authenticated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub actor: Option<Actor>,
    pub available_roles: Vec<Role>,
    /// A collaborator call for this session is in flight.
    pub resolving: bool,
    pub last_error: Option<AppError>,
}

/// Result of a credential submission or role choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginStep {
    Authenticated { actor: Actor, landing: String },
    PendingRoleSelection { available_roles: Vec<Role> },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("another session transition is already in progress")]
    Busy,
    #[error("'{action}' is not allowed while the session is {state:?}")]
    InvalidTransition { action: &'static str, state: SessionStatus },
    #[error("role {0} is not one of the roles offered for these credentials")]
    RoleNotOffered(Role),
    #[error("{0}")]
    Rejected(AppError),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Busy => AppError::conflict("session_busy", "A sign-in request is already in progress."),
            SessionError::InvalidTransition { action, .. } => AppError::conflict("invalid_session_transition".to_string(), format!("'{}' is not available right now.", action)),
            SessionError::RoleNotOffered(role) => AppError::validation("role_not_offered".to_string(), format!("{} is not available for this account.", role.label())),
            SessionError::Rejected(app) => app,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub dashboard_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self { Self { ttl: Duration::from_secs(60 * 60), dashboard_path: "/dashboard".to_string() } }
}

/// One unit of in-flight work on the resolving counter, released on every
/// exit path including cancellation.
struct Resolving<'a>(&'a AtomicUsize);

impl<'a> Resolving<'a> {
    fn start(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Resolving<'_> {
    fn drop(&mut self) { self.0.fetch_sub(1, Ordering::SeqCst); }
}

/// Owned form of `Resolving` carried by a spawned restore.
struct PendingRestore<P: IdentityProvider>(Arc<SessionStore<P>>);

impl<P: IdentityProvider> Drop for PendingRestore<P> {
    fn drop(&mut self) { self.0.resolving.fetch_sub(1, Ordering::SeqCst); }
}

/// Post-login landing rule. Seekers go home; everyone else goes back to the
/// captured path, or the dashboard when nothing (or `/`) was captured.
pub fn landing_path(role: Role, captured: Option<&str>, dashboard_path: &str) -> String {
    if role == Role::PropertySeeker {
        return "/".to_string();
    }
    match captured {
        Some(p) if !p.is_empty() && p != "/" => p.to_string(),
        _ => dashboard_path.to_string(),
    }
}

pub struct SessionStore<P: IdentityProvider> {
    provider: Arc<P>,
    config: SessionConfig,
    state: RwLock<SessionState>,
    return_to: RwLock<Option<String>>,
    last_error: RwLock<Option<AppError>>,
    transition: tokio::sync::Mutex<()>,
    resolving: AtomicUsize,
}

impl<P: IdentityProvider> SessionStore<P> {
    pub fn new(provider: Arc<P>, config: SessionConfig) -> Self {
        Self {
            provider,
            config,
            state: RwLock::new(SessionState::Unauthenticated),
            return_to: RwLock::new(None),
            last_error: RwLock::new(None),
            transition: tokio::sync::Mutex::new(()),
            resolving: AtomicUsize::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<P> { &self.provider }

    pub fn config(&self) -> &SessionConfig { &self.config }

    pub fn is_resolving(&self) -> bool { self.resolving.load(Ordering::SeqCst) > 0 }

    /// Read the session, expiring it first when its lifetime is over.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.expire_if_due();
        let state = self.state.read();
        let (actor, available_roles) = match &*state {
            SessionState::Unauthenticated => (None, Vec::new()),
            SessionState::PendingRoleSelection(p) => (None, p.available_roles.clone()),
            SessionState::Authenticated(a) => (Some(a.actor.clone()), a.available_roles.clone()),
        };
        SessionSnapshot {
            status: state.status(),
            actor,
            available_roles,
            resolving: self.is_resolving(),
            last_error: self.last_error.read().clone(),
        }
    }

    pub fn status(&self) -> SessionStatus { self.snapshot().status }

    pub fn actor(&self) -> Option<Actor> { self.snapshot().actor }

    /// Bearer token of the authenticated session, for collaborator calls made on its behalf.
    pub fn access_token(&self) -> Option<String> {
        self.expire_if_due();
        match &*self.state.read() {
            SessionState::Authenticated(a) => Some(a.token.clone()),
            _ => None,
        }
    }

    /// Remember where the visitor was headed when they were sent to log in.
    pub fn capture_return_path(&self, path: &str) {
        *self.return_to.write() = Some(path.to_string());
    }

    pub fn return_path(&self) -> Option<String> { self.return_to.read().clone() }

    pub fn clear_error(&self) { *self.last_error.write() = None; }

    fn expire_if_due(&self) {
        let due = matches!(&*self.state.read(), SessionState::Authenticated(a) if Instant::now() >= a.expires_at);
        if !due {
            return;
        }
        // Leave it to the in-flight transition if there is one; it will see the expiry next read.
        let Ok(_permit) = self.transition.try_lock() else { return; };
        let mut state = self.state.write();
        let due = matches!(&*state, SessionState::Authenticated(a) if Instant::now() >= a.expires_at);
        if !due {
            return;
        }
        let SessionState::Authenticated(expired) = std::mem::replace(&mut *state, SessionState::Unauthenticated) else {
            return;
        };
        drop(state);
        info!(target: "session", actor = %expired.actor.id, "session expired");
        self.revoke_in_background(expired.token);
    }

    /// Tell the provider a token is finished with. Reads can happen outside a
    /// runtime, in which case the token is left to its own expiry.
    fn revoke_in_background(&self, token: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(target: "session", "no runtime, token left to expire");
            return;
        };
        let provider = Arc::clone(&self.provider);
        handle.spawn(async move {
            if let Err(e) = provider.logout(&token).await {
                warn!(target: "session", error = %e, "expired token could not be revoked");
            }
        });
    }

    fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, SessionError> {
        self.transition.try_lock().map_err(|_| {
            debug!(target: "session", "transition rejected: busy");
            SessionError::Busy
        })
    }

    fn activate(&self, grant: AuthGrant) -> LoginStep {
        let role = grant.actor.role;
        let landing = landing_path(role, self.return_to.write().take().as_deref(), &self.config.dashboard_path);
        let actor = grant.actor.clone();
        info!(target: "session", actor = %actor.id, role = %role, landing = %landing, "authenticated");
        *self.state.write() = SessionState::Authenticated(ActiveSession {
            actor: grant.actor,
            token: grant.access_token,
            available_roles: grant.available_roles,
            expires_at: Instant::now() + self.config.ttl,
        });
        *self.last_error.write() = None;
        LoginStep::Authenticated { actor, landing }
    }

    fn fail(&self, err: ApiError) -> SessionError {
        let app: AppError = err.into();
        *self.last_error.write() = Some(app.clone());
        SessionError::Rejected(app)
    }

    /// Attempt a login. One role: authenticated. Several roles and none named:
    /// pending role selection. Failure: unauthenticated with the error kept.
    pub async fn submit_credentials(&self, email: &str, password: &str, role: Option<Role>) -> Result<LoginStep, SessionError> {
        let _permit = self.begin()?;
        let status = self.state.read().status();
        if status == SessionStatus::Authenticated {
            return Err(SessionError::InvalidTransition { action: "submit_credentials", state: status });
        }
        let credentials = LoginRequest { email: email.trim().to_string(), password: password.to_string(), role };
        let _resolving = Resolving::start(&self.resolving);
        *self.last_error.write() = None;
        debug!(target: "session", email = %credentials.email, role = ?role, "credentials submitted");

        match self.provider.login(&credentials).await {
            Ok(LoginOutcome::Active(grant)) => Ok(self.activate(grant)),
            Ok(LoginOutcome::RequireRoleSelection { available_roles }) => {
                info!(target: "session", roles = ?available_roles, "credentials map to several roles");
                *self.state.write() = SessionState::PendingRoleSelection(PendingLogin {
                    credentials: LoginRequest { role: None, ..credentials },
                    available_roles: available_roles.clone(),
                });
                Ok(LoginStep::PendingRoleSelection { available_roles })
            }
            Err(e) => {
                warn!(target: "session", error = %e, "login failed");
                *self.state.write() = SessionState::Unauthenticated;
                Err(self.fail(e))
            }
        }
    }

    /// Finish a pending login with one of the offered roles.
    ///
    /// Calling this outside `pending_role_selection` is a caller bug and is
    /// reported as `InvalidTransition`. A role that was not offered is rejected
    /// without touching the state. A network failure keeps the session pending
    /// so the choice can be retried; any other failure ends it.
    pub async fn select_role(&self, role: Role) -> Result<LoginStep, SessionError> {
        let _permit = self.begin()?;
        let credentials = {
            let state = self.state.read();
            let SessionState::PendingRoleSelection(pending) = &*state else {
                let current = state.status();
                error!(target: "session", state = ?current, "select_role called outside pending_role_selection");
                return Err(SessionError::InvalidTransition { action: "select_role", state: current });
            };
            if !pending.available_roles.contains(&role) {
                return Err(SessionError::RoleNotOffered(role));
            }
            LoginRequest { role: Some(role), ..pending.credentials.clone() }
        };
        let _resolving = Resolving::start(&self.resolving);

        match self.provider.login(&credentials).await {
            Ok(LoginOutcome::Active(grant)) => Ok(self.activate(grant)),
            Ok(LoginOutcome::RequireRoleSelection { .. }) => {
                warn!(target: "session", role = %role, "role choice was not accepted");
                Err(self.fail(ApiError::InvalidCredentials(format!("Unable to sign in as {}.", role.label()))))
            }
            Err(e @ ApiError::Network(_)) => {
                warn!(target: "session", error = %e, "role selection failed, still pending");
                Err(self.fail(e))
            }
            Err(e) => {
                warn!(target: "session", error = %e, "role selection rejected");
                *self.state.write() = SessionState::Unauthenticated;
                Err(self.fail(e))
            }
        }
    }

    /// Change the active role of an authenticated session to another role the credentials hold.
    pub async fn switch_role(&self, role: Role) -> Result<LoginStep, SessionError> {
        let _permit = self.begin()?;
        let token = {
            let state = self.state.read();
            let SessionState::Authenticated(active) = &*state else {
                return Err(SessionError::InvalidTransition { action: "switch_role", state: state.status() });
            };
            if !active.available_roles.contains(&role) {
                return Err(SessionError::RoleNotOffered(role));
            }
            active.token.clone()
        };
        let _resolving = Resolving::start(&self.resolving);
        match self.provider.switch_role(&token, role).await {
            Ok(grant) => {
                let actor = grant.actor.clone();
                info!(target: "session", actor = %actor.id, role = %role, "role switched");
                *self.state.write() = SessionState::Authenticated(ActiveSession {
                    actor: grant.actor,
                    token: grant.access_token,
                    available_roles: grant.available_roles,
                    expires_at: Instant::now() + self.config.ttl,
                });
                let landing = landing_path(role, None, &self.config.dashboard_path);
                Ok(LoginStep::Authenticated { actor, landing })
            }
            Err(e) => {
                warn!(target: "session", error = %e, "role switch failed");
                Err(self.fail(e))
            }
        }
    }

    /// Resume a session from a persisted token. An unusable token just leaves
    /// the session unauthenticated.
    pub async fn restore(&self, token: &str) -> Result<SessionSnapshot, SessionError> {
        {
            let _permit = self.begin()?;
            let status = self.state.read().status();
            if status != SessionStatus::Unauthenticated {
                return Err(SessionError::InvalidTransition { action: "restore", state: status });
            }
            let _resolving = Resolving::start(&self.resolving);
            match self.provider.current_actor(token).await {
                Ok(grant) => {
                    self.activate(grant);
                }
                Err(e) => {
                    info!(target: "session", error = %e, "stored session could not be restored");
                }
            }
        }
        Ok(self.snapshot())
    }

    /// Run `restore` as a background task. The session reads as resolving from
    /// the moment this returns, so a guard check right after it answers `awaiting`.
    pub fn spawn_restore(self: &Arc<Self>, token: String) -> tokio::task::JoinHandle<Option<SessionSnapshot>> {
        self.resolving.fetch_add(1, Ordering::SeqCst);
        let pending = PendingRestore(Arc::clone(self));
        tokio::spawn(async move {
            let store = Arc::clone(&pending.0);
            let out = store.restore(&token).await;
            drop(pending);
            match out {
                Ok(_) => Some(store.snapshot()),
                Err(e) => {
                    debug!(target: "session", error = %e, "background restore skipped");
                    None
                }
            }
        })
    }

    /// Take over a grant obtained elsewhere (a completed registration). New
    /// accounts land on the dashboard whatever their role.
    pub fn adopt(&self, grant: AuthGrant) -> Result<LoginStep, SessionError> {
        let _permit = self.begin()?;
        Ok(match self.activate(grant) {
            LoginStep::Authenticated { actor, .. } => LoginStep::Authenticated { actor, landing: self.config.dashboard_path.clone() },
            pending => pending,
        })
    }

    /// Drop the session, its actor, any pending role list and the captured
    /// return path, then revoke the token with the provider.
    ///
    /// Local state is cleared before the provider is called, so a failed or
    /// dropped revocation still leaves the visitor signed out.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let _permit = self.begin()?;
        let previous = std::mem::replace(&mut *self.state.write(), SessionState::Unauthenticated);
        *self.return_to.write() = None;
        *self.last_error.write() = None;
        let SessionState::Authenticated(active) = previous else {
            return Ok(());
        };
        info!(target: "session", actor = %active.actor.id, "logout");
        if let Err(e) = self.provider.logout(&active.token).await {
            warn!(target: "session", error = %e, "token revocation failed");
        }
        Ok(())
    }
}
