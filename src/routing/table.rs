//! Path patterns and the access each one requires.
//!
//! Patterns use `:name` for a single path segment and a trailing `*` for
//! "this path and anything below it". Entries are checked in order, so more
//! specific patterns come first. Paths that match nothing are public.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::identity::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "access", content = "roles", rename_all = "snake_case")]
pub enum Access {
    Public,
    Authenticated,
    Roles(&'static [Role]),
}

impl Access {
    /// Role allowlist, if the route has one.
    pub fn required_roles(&self) -> Option<&'static [Role]> {
        match self {
            Access::Roles(r) => Some(*r),
            _ => None,
        }
    }
}

const SEEKER: &[Role] = &[Role::PropertySeeker];
const LISTER: &[Role] = &[Role::PropertyOwner, Role::Agent];
const AGENT: &[Role] = &[Role::Agent];
const ADMIN: &[Role] = &[Role::Admin];

const STANDARD_ROUTES: &[(&str, Access)] = &[
    ("/dashboard*", Access::Authenticated),
    ("/profile", Access::Authenticated),
    ("/edit-profile", Access::Authenticated),
    ("/settings", Access::Authenticated),
    ("/saved-properties", Access::Roles(SEEKER)),
    ("/preferences", Access::Roles(SEEKER)),
    ("/viewed-history", Access::Roles(SEEKER)),
    ("/add-property", Access::Roles(LISTER)),
    ("/properties/:id/edit", Access::Roles(LISTER)),
    ("/my-properties", Access::Roles(LISTER)),
    ("/property-stats", Access::Roles(LISTER)),
    ("/manage-clients", Access::Roles(AGENT)),
    ("/add-client", Access::Roles(AGENT)),
    ("/clients/:id/edit", Access::Roles(AGENT)),
    ("/clients/:id", Access::Roles(AGENT)),
    ("/admin/ml-system", Access::Roles(ADMIN)),
    ("/", Access::Public),
    ("/search", Access::Public),
    ("/properties", Access::Public),
    ("/properties/:id", Access::Public),
    ("/login", Access::Public),
    ("/register", Access::Public),
    ("/contact", Access::Public),
    ("/about", Access::Public),
    ("/faq", Access::Public),
    ("/blog", Access::Public),
    ("/services", Access::Public),
    ("/market-tips", Access::Public),
    ("/privacy", Access::Public),
    ("/terms", Access::Public),
    ("/social", Access::Public),
];

static STANDARD: Lazy<RouteTable> = Lazy::new(|| RouteTable::new(STANDARD_ROUTES));

fn pattern_to_regex(pattern: &str) -> Regex {
    let (body, open) = match pattern.strip_suffix('*') {
        Some(b) => (b, true),
        None => (pattern, false),
    };
    let mut s = String::from("^");
    for (i, seg) in body.split('/').enumerate() {
        if i > 0 {
            s.push('/');
        }
        if seg.starts_with(':') {
            s.push_str("[^/]+");
        } else {
            s.push_str(&regex::escape(seg));
        }
    }
    if open {
        s.push_str("(/.*)?");
    }
    s.push('$');
    Regex::new(&s).unwrap_or_else(|_| Regex::new("^$").expect("empty regex"))
}

/// Strip query, fragment and trailing slash so `/settings/?tab=1` matches `/settings`.
pub(crate) fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let p = &path[..end];
    let p = if p.len() > 1 { p.trim_end_matches('/') } else { p };
    if p.is_empty() { "/" } else { p }
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    pattern: &'static str,
    regex: Regex,
    access: Access,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn new(entries: &[(&'static str, Access)]) -> Self {
        let routes = entries
            .iter()
            .map(|&(pattern, access)| CompiledRoute { pattern, regex: pattern_to_regex(pattern), access })
            .collect();
        Self { routes }
    }

    /// The front end's route surface.
    pub fn standard() -> &'static RouteTable { &STANDARD }

    pub fn access_for(&self, path: &str) -> Access {
        self.matching(path).map(|r| r.access).unwrap_or(Access::Public)
    }

    /// Pattern that matched, for logging.
    pub fn pattern_for(&self, path: &str) -> Option<&'static str> { self.matching(path).map(|r| r.pattern) }

    fn matching(&self, path: &str) -> Option<&CompiledRoute> {
        let p = normalize_path(path);
        self.routes.iter().find(|r| r.regex.is_match(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_surface() {
        let t = RouteTable::standard();
        assert_eq!(t.access_for("/dashboard"), Access::Authenticated);
        assert_eq!(t.access_for("/dashboard/listings/3"), Access::Authenticated);
        assert_eq!(t.access_for("/dashboards"), Access::Public);
        assert_eq!(t.access_for("/preferences"), Access::Roles(SEEKER));
        assert_eq!(t.access_for("/properties/17/edit"), Access::Roles(LISTER));
        assert_eq!(t.access_for("/properties/17"), Access::Public);
        assert_eq!(t.access_for("/clients/9"), Access::Roles(AGENT));
        assert_eq!(t.access_for("/admin/ml-system?tab=stats"), Access::Roles(ADMIN));
        assert_eq!(t.access_for("/settings/"), Access::Authenticated);
        assert_eq!(t.access_for("/no/such/page"), Access::Public);
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/a/b/?x=1#frag"), "/a/b");
    }
}
