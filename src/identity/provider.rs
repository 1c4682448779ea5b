//! Identity collaborator contract and an in-process implementation.
//!
//! The session state machine only depends on `IdentityProvider`. The REST
//! implementation lives in `backend::http`; `LocalIdentityProvider` keeps
//! Argon2-hashed accounts in memory for the dev server and tests.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use base64::Engine;
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use tracing::{debug, info};

use super::actor::Actor;
use super::role::Role;
use crate::backend::ApiError;

#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

impl Debug for LoginRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// A successful sign-in: who the actor is and the bearer token that proves it.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub actor: Actor,
    pub access_token: String,
    /// Every role the same credentials hold; used for role switching.
    pub available_roles: Vec<Role>,
}

impl Debug for AuthGrant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGrant")
            .field("actor", &self.actor)
            .field("access_token", &"<redacted>")
            .field("available_roles", &self.available_roles)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Active(AuthGrant),
    /// Credentials are valid for several roles and none was named.
    RequireRoleSelection { available_roles: Vec<Role> },
}

#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub full_name: String,
    pub phone_number: String,
    pub company_name: Option<String>,
}

impl Debug for RegistrationRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("full_name", &self.full_name)
            .field("phone_number", &self.phone_number)
            .field("company_name", &self.company_name)
            .finish()
    }
}

pub trait IdentityProvider: Send + Sync + 'static {
    fn login(&self, req: &LoginRequest) -> impl Future<Output = Result<LoginOutcome, ApiError>> + Send;

    fn register(&self, req: &RegistrationRequest) -> impl Future<Output = Result<AuthGrant, ApiError>> + Send;

    /// Resolve a previously issued token back to its grant.
    fn current_actor(&self, token: &str) -> impl Future<Output = Result<AuthGrant, ApiError>> + Send;

    /// Re-issue a grant for another role held by the same credentials.
    fn switch_role(&self, token: &str, role: Role) -> impl Future<Output = Result<AuthGrant, ApiError>> + Send;

    /// Invalidate a token so it can no longer be restored or switched.
    fn logout(&self, token: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Debug, Clone)]
struct LocalAccount {
    id: String,
    email: String,
    role: Role,
    password_hash: String,
    full_name: Option<String>,
}

impl LocalAccount {
    fn actor(&self) -> Actor {
        let mut a = Actor::new(self.id.clone(), self.role).with_email(self.email.clone());
        a.full_name = self.full_name.clone();
        a
    }
}

#[derive(Debug, Clone)]
struct IssuedToken {
    account_id: String,
    expires_at: Instant,
}

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

pub struct LocalIdentityProvider {
    argon2: Argon2<'static>,
    accounts: RwLock<Vec<LocalAccount>>,
    tokens: RwLock<HashMap<String, IssuedToken>>,
    token_ttl: Duration,
    next_id: AtomicU64,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self { Self::with_argon2(Argon2::default()) }
}

fn gen_token() -> String {
    let mut buf = [0u8; 32];
    if getrandom::getrandom(&mut buf).is_err() {
        return uuid::Uuid::new_v4().simple().to_string();
    }
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn same_email(a: &str, b: &str) -> bool { a.trim().eq_ignore_ascii_case(b.trim()) }

impl LocalIdentityProvider {
    pub fn new() -> Self { Self::default() }

    /// Provider with explicit Argon2 cost parameters (cheap ones keep tests fast).
    pub fn with_params(params: Params) -> Self {
        Self::with_argon2(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn with_argon2(argon2: Argon2<'static>) -> Self {
        Self {
            argon2,
            accounts: RwLock::new(Vec::new()),
            tokens: RwLock::new(HashMap::new()),
            token_ttl: DEFAULT_TOKEN_TTL,
            next_id: AtomicU64::new(1),
        }
    }

    /// Lifetime of issued tokens; keep it equal to the session TTL.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn token_ttl(&self) -> Duration { self.token_ttl }

    /// Tokens that are issued and not yet expired or revoked.
    pub fn live_token_count(&self) -> usize {
        let now = Instant::now();
        self.tokens.read().values().filter(|t| t.expires_at > now).count()
    }

    fn hash_password(&self, password: &str) -> Result<String, ApiError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| ApiError::Internal(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| ApiError::Internal(e.to_string()))?;
        let phc = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .to_string();
        Ok(phc)
    }

    fn verify_password(&self, hash: &str, password: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self.argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    /// Create an account directly, bypassing registration rules. Returns the new actor id.
    pub fn add_account(&self, email: &str, password: &str, role: Role, full_name: Option<&str>) -> Result<String, ApiError> {
        if self.accounts.read().iter().any(|a| same_email(&a.email, email) && a.role == role) {
            return Err(ApiError::Rejected {
                status: 409,
                message: format!("An account with this email already exists for the {} role.", role.label()),
            });
        }
        let password_hash = self.hash_password(password)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.accounts.write().push(LocalAccount {
            id: id.clone(),
            email: email.trim().to_string(),
            role,
            password_hash,
            full_name: full_name.map(str::to_string),
        });
        info!(target: "auth", id = %id, role = %role, "local account created");
        Ok(id)
    }

    fn roles_for_email(&self, email: &str) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .accounts
            .read()
            .iter()
            .filter(|a| same_email(&a.email, email))
            .map(|a| a.role)
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }

    fn issue(&self, account: &LocalAccount) -> AuthGrant {
        let token = gen_token();
        let now = Instant::now();
        let mut tokens = self.tokens.write();
        tokens.retain(|_, t| t.expires_at > now);
        tokens.insert(token.clone(), IssuedToken { account_id: account.id.clone(), expires_at: now + self.token_ttl });
        drop(tokens);
        AuthGrant {
            actor: account.actor(),
            access_token: token,
            available_roles: self.roles_for_email(&account.email),
        }
    }

    /// Account behind a live token. An expired token is removed on sight.
    fn account_for_token(&self, token: &str) -> Option<LocalAccount> {
        let issued = self.tokens.read().get(token).cloned()?;
        if Instant::now() >= issued.expires_at {
            self.tokens.write().remove(token);
            debug!(target: "auth", "expired token rejected");
            return None;
        }
        self.accounts.read().iter().find(|a| a.id == issued.account_id).cloned()
    }

    /// Revoke a token; returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool { self.tokens.write().remove(token).is_some() }
}

impl IdentityProvider for LocalIdentityProvider {
    async fn login(&self, req: &LoginRequest) -> Result<LoginOutcome, ApiError> {
        let candidates: Vec<LocalAccount> = self
            .accounts
            .read()
            .iter()
            .filter(|a| same_email(&a.email, &req.email))
            .cloned()
            .collect();
        let matching: Vec<LocalAccount> = candidates
            .into_iter()
            .filter(|a| self.verify_password(&a.password_hash, &req.password))
            .collect();
        if matching.is_empty() {
            return Err(ApiError::InvalidCredentials("Invalid email or password.".into()));
        }
        if let Some(role) = req.role {
            let Some(acct) = matching.iter().find(|a| a.role == role) else {
                return Err(ApiError::InvalidCredentials(format!("No {} account exists for these credentials.", role.label())));
            };
            return Ok(LoginOutcome::Active(self.issue(acct)));
        }
        if matching.len() == 1 {
            return Ok(LoginOutcome::Active(self.issue(&matching[0])));
        }
        let mut available_roles: Vec<Role> = matching.iter().map(|a| a.role).collect();
        available_roles.sort();
        available_roles.dedup();
        debug!(target: "auth", roles = ?available_roles, "login requires role selection");
        Ok(LoginOutcome::RequireRoleSelection { available_roles })
    }

    async fn register(&self, req: &RegistrationRequest) -> Result<AuthGrant, ApiError> {
        let id = self.add_account(&req.email, &req.password, req.role, Some(req.full_name.as_str()))?;
        let acct = self
            .accounts
            .read()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Account {}", id)))?;
        Ok(self.issue(&acct))
    }

    async fn current_actor(&self, token: &str) -> Result<AuthGrant, ApiError> {
        let acct = self
            .account_for_token(token)
            .ok_or_else(|| ApiError::InvalidCredentials("Session token is invalid or expired.".into()))?;
        Ok(AuthGrant {
            actor: acct.actor(),
            access_token: token.to_string(),
            available_roles: self.roles_for_email(&acct.email),
        })
    }

    async fn switch_role(&self, token: &str, role: Role) -> Result<AuthGrant, ApiError> {
        let current = self
            .account_for_token(token)
            .ok_or_else(|| ApiError::InvalidCredentials("Session token is invalid or expired.".into()))?;
        let target = self
            .accounts
            .read()
            .iter()
            .find(|a| same_email(&a.email, &current.email) && a.role == role)
            .cloned()
            .ok_or_else(|| ApiError::Rejected {
                status: 403,
                message: format!("You do not have a {} account.", role.label()),
            })?;
        self.revoke(token);
        Ok(self.issue(&target))
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        if self.revoke(token) {
            debug!(target: "auth", "token revoked");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn cheap_local_provider() -> LocalIdentityProvider {
    LocalIdentityProvider::with_params(Params::new(8, 1, 1, None).expect("argon2 params"))
}
