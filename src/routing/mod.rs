//! Route surface and the navigation guard.

mod table;
mod guard;

pub use table::{Access, RouteTable};
pub use guard::{decide, login_redirect, return_path_from_query, GuardDecision, RouteGuard, SessionView, LOGIN_PATH};
