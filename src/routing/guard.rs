//! Navigation guard.
//!
//! Evaluated on every navigation and never cached, so a role switch or
//! logout takes effect on the next guarded transition.

use serde::Serialize;
use tracing::debug;

use super::table::{normalize_path, Access, RouteTable};
use crate::identity::{IdentityProvider, Role, SessionSnapshot, SessionStatus, SessionStore};

pub const LOGIN_PATH: &str = "/login";

/// What the guard needs to know about a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionView {
    Resolving,
    /// Includes a login parked in role selection; no actor exists yet.
    Unauthenticated,
    Authenticated(Role),
}

impl From<&SessionSnapshot> for SessionView {
    fn from(s: &SessionSnapshot) -> Self {
        if s.resolving {
            return SessionView::Resolving;
        }
        match (s.status, &s.actor) {
            (SessionStatus::Authenticated, Some(actor)) => SessionView::Authenticated(actor.role),
            _ => SessionView::Unauthenticated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    Render,
    Awaiting,
    Redirect {
        to: String,
        /// Requested path handed to the login flow; absent for under-privileged redirects.
        #[serde(skip_serializing_if = "Option::is_none")]
        return_to: Option<String>,
    },
}

/// `/login?from=<urlencoded path>`
pub fn login_redirect(requested: &str) -> String {
    format!("{}?from={}", LOGIN_PATH, urlencoding::encode(requested))
}

/// Decode a `from` query value. Only same-site absolute paths are accepted.
pub fn return_path_from_query(raw: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw).ok()?;
    let p = decoded.trim();
    if !p.starts_with('/') || p.starts_with("//") || p.contains('\\') {
        return None;
    }
    Some(p.to_string())
}

/// The four guard rules, first match wins.
pub fn decide(session: SessionView, required: Option<&[Role]>, requested: &str, dashboard_path: &str) -> GuardDecision {
    match session {
        SessionView::Resolving => GuardDecision::Awaiting,
        SessionView::Unauthenticated => GuardDecision::Redirect {
            to: login_redirect(requested),
            return_to: Some(requested.to_string()),
        },
        SessionView::Authenticated(role) => match required {
            Some(roles) if !roles.contains(&role) => GuardDecision::Redirect { to: dashboard_path.to_string(), return_to: None },
            _ => GuardDecision::Render,
        },
    }
}

/// Guard bound to a route table and the configured dashboard path.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    table: RouteTable,
    dashboard_path: String,
}

impl Default for RouteGuard {
    fn default() -> Self { Self::new(RouteTable::standard().clone(), "/dashboard") }
}

impl RouteGuard {
    pub fn new<S: Into<String>>(table: RouteTable, dashboard_path: S) -> Self {
        Self { table, dashboard_path: dashboard_path.into() }
    }

    pub fn table(&self) -> &RouteTable { &self.table }

    pub fn access_for(&self, path: &str) -> Access { self.table.access_for(path) }

    /// Decide for a snapshot without side effects. Public routes always render.
    pub fn check(&self, session: &SessionSnapshot, path: &str) -> GuardDecision {
        let access = self.table.access_for(path);
        let decision = match access {
            Access::Public => GuardDecision::Render,
            Access::Authenticated | Access::Roles(_) => {
                decide(SessionView::from(session), access.required_roles(), normalize_path(path), &self.dashboard_path)
            }
        };
        debug!(target: "guard", path = %path, pattern = ?self.table.pattern_for(path), decision = ?decision, "navigation checked");
        decision
    }

    /// Check a navigation and, when it is sent to login, remember the requested path on the session.
    pub fn navigate<P: IdentityProvider>(&self, store: &SessionStore<P>, path: &str) -> GuardDecision {
        let decision = self.check(&store.snapshot(), path);
        if let GuardDecision::Redirect { return_to: Some(requested), .. } = &decision {
            store.capture_return_path(requested);
        }
        decision
    }
}
