use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The single active role an actor carries for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PropertySeeker,
    PropertyOwner,
    Agent,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::PropertySeeker, Role::PropertyOwner, Role::Agent, Role::Admin];

    /// Roles a visitor may pick in the registration wizard. Admin accounts are provisioned elsewhere.
    pub const REGISTRABLE: [Role; 3] = [Role::PropertySeeker, Role::PropertyOwner, Role::Agent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PropertySeeker => "property_seeker",
            Role::PropertyOwner => "property_owner",
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }

    /// Human label, e.g. "Property Owner".
    pub fn label(&self) -> &'static str {
        match self {
            Role::PropertySeeker => "Property Seeker",
            Role::PropertyOwner => "Property Owner",
            Role::Agent => "Agent",
            Role::Admin => "Admin",
        }
    }

    /// Lenient parse of a role name as backends hand it out.
    ///
    /// Accepts canonical names, legacy spellings (`property_agent`, `Owner`),
    /// and JSON-encoded single-element lists such as `["property_owner"]`.
    /// Returns `None` for anything that does not name a known role.
    pub fn normalize(raw: &str) -> Option<Role> {
        let mut s = raw.trim().to_string();
        if s.contains('[') || s.contains('{') || s.contains('"') {
            s = match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(serde_json::Value::Array(items)) => items
                    .first()
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_default(),
                Ok(serde_json::Value::String(inner)) => inner,
                _ => s.chars().filter(|c| !matches!(c, '[' | ']' | '"' | '\\')).collect(),
            };
        }
        let lower = s.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        if lower.contains("seeker") {
            Some(Role::PropertySeeker)
        } else if lower.contains("owner") {
            Some(Role::PropertyOwner)
        } else if lower.contains("agent") {
            Some(Role::Agent)
        } else if lower.contains("admin") {
            Some(Role::Admin)
        } else {
            None
        }
    }

    /// Collect roles from whatever shape a user payload carries: a string,
    /// an array of strings, or a JSON-encoded string. Order is kept, duplicates dropped.
    pub fn collect_from_value(value: &serde_json::Value) -> Vec<Role> {
        let mut out: Vec<Role> = Vec::new();
        let mut push = |r: Option<Role>| {
            if let Some(r) = r {
                if !out.contains(&r) {
                    out.push(r);
                }
            }
        };
        match value {
            serde_json::Value::String(s) => {
                if s.trim_start().starts_with('[') {
                    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(s) {
                        for it in items.iter() {
                            push(it.as_str().and_then(Role::normalize));
                        }
                        return out;
                    }
                }
                push(Role::normalize(s));
            }
            serde_json::Value::Array(items) => {
                for it in items.iter() {
                    push(it.as_str().and_then(Role::normalize));
                }
            }
            _ => {}
        }
        out
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::normalize(s).ok_or_else(|| format!("unknown role '{}'", s))
    }
}
