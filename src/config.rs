//! Process configuration from environment variables and command-line flags.
//! Flags override the environment; anything unset or unparsable keeps its default.

use std::time::Duration;

use crate::identity::{EditPolicy, SessionConfig};

pub const DEFAULT_HTTP_PORT: u16 = 7880;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub http_port: u16,
    /// REST backend root; `None` runs the in-process backend.
    pub api_base: Option<String>,
    pub session_ttl: Duration,
    pub dashboard_path: String,
    pub edit_policy: EditPolicy,
    pub seed_demo: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            api_base: None,
            session_ttl: Duration::from_secs(3600),
            dashboard_path: "/dashboard".to_string(),
            edit_policy: EditPolicy::RelaxedOwnerRole,
            seed_demo: true,
        }
    }
}

fn parse_port(val: Option<String>) -> Option<u16> {
    val?.trim().parse::<u16>().ok()
}

fn parse_u64(val: Option<String>) -> Option<u64> {
    val?.trim().parse::<u64>().ok()
}

fn parse_bool(val: Option<String>) -> Option<bool> {
    match val?.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let i = args.iter().position(|a| a == flag)?;
    args.get(i + 1).filter(|v| !v.starts_with("--")).cloned()
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let d = Self::default();
        let owner_grant = parse_bool(get("ESTATE_OWNER_ROLE_EDIT_GRANT")).unwrap_or(true);
        Self {
            http_port: parse_port(get("ESTATE_HTTP_PORT")).unwrap_or(d.http_port),
            api_base: get("ESTATE_API_BASE").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            session_ttl: parse_u64(get("ESTATE_SESSION_TTL_SECS")).map(Duration::from_secs).unwrap_or(d.session_ttl),
            dashboard_path: get("ESTATE_DASHBOARD_PATH")
                .map(|s| s.trim().to_string())
                .filter(|s| s.starts_with('/'))
                .unwrap_or(d.dashboard_path),
            edit_policy: if owner_grant { EditPolicy::RelaxedOwnerRole } else { EditPolicy::OwnerById },
            seed_demo: parse_bool(get("ESTATE_SEED_DEMO")).unwrap_or(d.seed_demo),
        }
    }

    /// `--http-port N`, `--api-base URL`, `--no-seed`.
    pub fn apply_args(mut self, args: &[String]) -> Self {
        if let Some(p) = parse_port(flag_value(args, "--http-port")) {
            self.http_port = p;
        }
        if let Some(base) = flag_value(args, "--api-base") {
            self.api_base = Some(base);
        }
        if args.iter().any(|a| a == "--no-seed") {
            self.seed_demo = false;
        }
        self
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig { ttl: self.session_ttl, dashboard_path: self.dashboard_path.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(AppConfig::from_lookup(|_| None), AppConfig::default());
    }

    #[test]
    fn reads_and_validates_env() {
        let c = AppConfig::from_lookup(lookup(&[
            ("ESTATE_HTTP_PORT", "9001"),
            ("ESTATE_API_BASE", " http://api.local/api "),
            ("ESTATE_SESSION_TTL_SECS", "60"),
            ("ESTATE_DASHBOARD_PATH", "home"),
            ("ESTATE_OWNER_ROLE_EDIT_GRANT", "off"),
            ("ESTATE_SEED_DEMO", "no"),
        ]));
        assert_eq!(c.http_port, 9001);
        assert_eq!(c.api_base.as_deref(), Some("http://api.local/api"));
        assert_eq!(c.session_ttl, Duration::from_secs(60));
        assert_eq!(c.dashboard_path, "/dashboard");
        assert_eq!(c.edit_policy, EditPolicy::OwnerById);
        assert!(!c.seed_demo);
    }

    #[test]
    fn flags_override() {
        let args: Vec<String> = ["estate_gate", "--http-port", "8080", "--no-seed"].iter().map(|s| s.to_string()).collect();
        let c = AppConfig::from_lookup(lookup(&[("ESTATE_HTTP_PORT", "9001")])).apply_args(&args);
        assert_eq!(c.http_port, 8080);
        assert!(!c.seed_demo);
    }
}
