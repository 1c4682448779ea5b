//!
//! estate_gate HTTP server
//! -----------------------
//! Backend-for-frontend exposing the session state machine, the route guard,
//! the registration wizard and the property permission views over JSON.
//!
//! Responsibilities:
//! - One visitor per `estate_session` cookie, each owning a `SessionStore`,
//!   at most one registration draft, and the view scope its loads run under.
//! - Guard checks on every protected request; nothing is cached between requests.
//! - Errors render as `{"status":"error","error":{...}}` with the matching HTTP status.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use getrandom::getrandom;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::backend::{Backend, HttpBackend, MemoryBackend, UpdatePayload};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::identity::{
    AccountFields, AuthorizationEngine, DefaultAccountValidator, EditPolicy, LocalIdentityProvider, ProfileFields,
    RegistrationDraft, RegistrationError, Role, SessionStore,
};
use crate::routing::{return_path_from_query, GuardDecision, RouteGuard};
use crate::views::{self, ViewScope, ViewState};

pub const SESSION_COOKIE: &str = "estate_session";

/// Everything one browser owns on the server.
pub struct Visitor {
    pub session: Arc<SessionStore<Backend>>,
    draft: tokio::sync::Mutex<Option<RegistrationDraft>>,
    scope: RwLock<ViewScope>,
    last_seen: RwLock<Instant>,
}

impl Visitor {
    fn new(backend: Arc<Backend>, config: &AppConfig) -> Self {
        Self {
            session: Arc::new(SessionStore::new(backend, config.session_config())),
            draft: tokio::sync::Mutex::new(None),
            scope: RwLock::new(ViewScope::mount("visitor")),
            last_seen: RwLock::new(Instant::now()),
        }
    }

    fn scope(&self) -> ViewScope { self.scope.read().clone() }

    /// Views started under the old identity must not deliver results to the new one.
    fn remount(&self) {
        let mut s = self.scope.write();
        s.unmount();
        *s = ViewScope::mount("visitor");
    }
}

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub config: Arc<AppConfig>,
    pub engine: AuthorizationEngine,
    pub guard: Arc<RouteGuard>,
    visitors: Arc<RwLock<HashMap<String, Arc<Visitor>>>>,
}

impl AppState {
    pub fn new(backend: Backend, config: AppConfig) -> Self {
        let engine = AuthorizationEngine::with_policy(config.edit_policy);
        let guard = RouteGuard::new(crate::routing::RouteTable::standard().clone(), config.dashboard_path.clone());
        Self {
            backend: Arc::new(backend),
            engine,
            guard: Arc::new(guard),
            config: Arc::new(config),
            visitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Visitor for the request's cookie, creating one when the cookie is missing or unknown.
    /// The second value is a fresh session id that must be sent back as a cookie.
    fn visitor(&self, headers: &HeaderMap) -> (Arc<Visitor>, Option<String>) {
        if let Some(sid) = parse_cookie(headers, SESSION_COOKIE) {
            if let Some(v) = self.visitors.read().get(&sid).cloned() {
                *v.last_seen.write() = Instant::now();
                return (v, None);
            }
        }
        self.prune_idle();
        let sid = gen_sid();
        let v = Arc::new(Visitor::new(self.backend.clone(), &self.config));
        self.visitors.write().insert(sid.clone(), v.clone());
        (v, Some(sid))
    }

    /// Remove the request's visitor, if it has one.
    fn forget(&self, headers: &HeaderMap) -> Option<Arc<Visitor>> {
        let sid = parse_cookie(headers, SESSION_COOKIE)?;
        self.visitors.write().remove(&sid)
    }

    fn prune_idle(&self) {
        let cutoff = self.config.session_ttl * 2;
        self.visitors.write().retain(|_, v| v.last_seen.read().elapsed() < cutoff);
    }

    pub fn visitor_count(&self) -> usize { self.visitors.read().len() }
}

fn gen_sid() -> String {
    let mut bytes = [0u8; 16];
    if getrandom(&mut bytes).is_err() {
        return uuid::Uuid::new_v4().simple().to_string();
    }
    let mut sid = String::with_capacity(32);
    use std::fmt::Write as _;
    for b in &bytes {
        let _ = write!(&mut sid, "{:02x}", b);
    }
    sid
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        if let Some((k, v)) = part.trim().split_once('=') {
            if k == name {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn session_cookie(sid: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{}={}; HttpOnly; SameSite=Strict; Path=/", SESSION_COOKIE, sid))
        .unwrap_or_else(|_| HeaderValue::from_static("estate_session=; Path=/"))
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("estate_session=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict; Path=/")
}

/// Attach the cookie for a newly created visitor.
fn with_sid(new_sid: Option<String>, resp: impl IntoResponse) -> Response {
    let mut resp = resp.into_response();
    if let Some(sid) = new_sid {
        resp.headers_mut().append(header::SET_COOKIE, session_cookie(&sid));
    }
    resp
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retryable = self.retryable();
        (status, Json(json!({"status": "error", "error": self, "retryable": retryable}))).into_response()
    }
}

fn ok(body: Value) -> Response {
    let mut m = match body {
        Value::Object(m) => m,
        other => {
            let mut m = Map::new();
            m.insert("data".to_string(), other);
            m
        }
    };
    m.insert("status".to_string(), Value::String("ok".to_string()));
    (StatusCode::OK, Json(Value::Object(m))).into_response()
}

/// Non-render guard outcomes as responses: 202 while resolving, 303 for redirects.
fn guard_response(decision: &GuardDecision) -> Option<Response> {
    match decision {
        GuardDecision::Render => None,
        GuardDecision::Awaiting => Some((StatusCode::ACCEPTED, Json(json!({"status": "awaiting", "decision": decision}))).into_response()),
        GuardDecision::Redirect { to, .. } => {
            let mut headers = HeaderMap::new();
            if let Ok(loc) = HeaderValue::from_str(to) {
                headers.insert(header::LOCATION, loc);
            }
            Some((StatusCode::SEE_OTHER, headers, Json(json!({"status": "redirect", "decision": decision}))).into_response())
        }
    }
}

fn view_closed() -> Response {
    AppError::conflict("view_closed", "The page changed before loading finished.").into_response()
}

fn parse_role(raw: &str) -> Result<Role, AppError> {
    Role::normalize(raw).ok_or_else(|| AppError::validation("unknown_role".to_string(), format!("'{}' is not a recognised account type.", raw)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "estate_gate ok" }))
        .route("/session", get(get_session))
        .route("/session/login", post(login))
        .route("/session/select-role", post(select_role))
        .route("/session/switch-role", post(switch_role))
        .route("/session/restore", post(restore))
        .route("/session/logout", post(logout))
        .route("/guard", get(guard_check))
        .route("/properties/{id}", get(property_detail))
        .route("/properties/{id}/edit", get(property_edit).post(property_save))
        .route("/register", get(register_view))
        .route("/register/role", post(register_role))
        .route("/register/account", post(register_account))
        .route("/register/back", post(register_back))
        .route("/register/submit", post(register_submit))
        .route("/admin/ml-system", get(ml_panel))
        .route("/admin/ml-system/retrain", post(ml_retrain))
        .with_state(state)
}

/// Build the backend the configuration asks for.
pub fn build_backend(config: &AppConfig) -> anyhow::Result<Backend> {
    match &config.api_base {
        Some(base) => {
            let http = HttpBackend::new(base).map_err(|e| anyhow::anyhow!("backend setup failed: {}", e))?;
            Ok(Backend::Http(http))
        }
        None => {
            let mem = MemoryBackend::new(LocalIdentityProvider::new().with_token_ttl(config.session_ttl));
            if config.seed_demo {
                mem.seed_demo().map_err(|e| anyhow::anyhow!("demo seed failed: {}", e))?;
            }
            Ok(Backend::Memory(mem))
        }
    }
}

pub async fn run_with_config(config: AppConfig) -> anyhow::Result<()> {
    let backend = build_backend(&config)?;
    info!(
        target: "startup",
        "estate_gate starting: http_port={}, backend={}, session_ttl={}s, dashboard={}",
        config.http_port,
        backend.ident(),
        config.session_ttl.as_secs(),
        config.dashboard_path
    );
    if config.edit_policy == EditPolicy::RelaxedOwnerRole {
        warn!(target: "startup", "edit policy: any property_owner may edit any property (ESTATE_OWNER_ROLE_EDIT_GRANT=false restricts owners to their own listings)");
    }
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = router(AppState::new(backend, config));
    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Entry point reading configuration from the environment.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(AppConfig::from_env()).await
}

fn session_body(v: &Visitor) -> Value {
    json!({"session": v.session.snapshot(), "return_to": v.session.return_path()})
}

async fn get_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (v, sid) = state.visitor(&headers);
    with_sid(sid, ok(session_body(&v)))
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
    #[serde(default)]
    role: Option<String>,
    /// Raw `from` value of the login page URL.
    #[serde(default)]
    from: Option<String>,
}

async fn login(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<LoginPayload>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let role = match payload.role.as_deref().map(parse_role).transpose() {
        Ok(r) => r,
        Err(e) => return with_sid(sid, e),
    };
    if let Some(from) = payload.from.as_deref().and_then(return_path_from_query) {
        v.session.capture_return_path(&from);
    }
    let resp = match v.session.submit_credentials(&payload.email, &payload.password, role).await {
        Ok(step) => {
            v.remount();
            ok(json!({"step": step, "session": v.session.snapshot(), "access_token": v.session.access_token()}))
        }
        Err(e) => AppError::from(e).into_response(),
    };
    with_sid(sid, resp)
}

#[derive(Debug, Deserialize)]
struct RolePayload {
    role: String,
}

async fn select_role(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<RolePayload>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let role = match parse_role(&payload.role) {
        Ok(r) => r,
        Err(e) => return with_sid(sid, e),
    };
    let resp = match v.session.select_role(role).await {
        Ok(step) => {
            v.remount();
            ok(json!({"step": step, "session": v.session.snapshot(), "access_token": v.session.access_token()}))
        }
        Err(e) => AppError::from(e).into_response(),
    };
    with_sid(sid, resp)
}

async fn switch_role(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<RolePayload>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let role = match parse_role(&payload.role) {
        Ok(r) => r,
        Err(e) => return with_sid(sid, e),
    };
    let resp = match v.session.switch_role(role).await {
        Ok(step) => {
            v.remount();
            ok(json!({"step": step, "session": v.session.snapshot(), "access_token": v.session.access_token()}))
        }
        Err(e) => AppError::from(e).into_response(),
    };
    with_sid(sid, resp)
}

#[derive(Debug, Deserialize)]
struct RestorePayload {
    token: String,
}

async fn restore(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<RestorePayload>) -> Response {
    let (v, sid) = state.visitor(&headers);
    v.session.spawn_restore(payload.token);
    with_sid(sid, (StatusCode::ACCEPTED, Json(json!({"status": "resolving"}))))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(v) = state.forget(&headers) {
        v.scope().unmount();
        if let Err(e) = v.session.logout().await {
            warn!(target: "session", "logout during a transition: {}", e);
        }
    }
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, clear_session_cookie());
    (StatusCode::OK, h, Json(json!({"status": "ok"}))).into_response()
}

#[derive(Debug, Deserialize)]
struct GuardQuery {
    path: String,
}

async fn guard_check(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<GuardQuery>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let decision = state.guard.navigate(&v.session, &q.path);
    with_sid(sid, ok(json!({"path": q.path, "access": state.guard.access_for(&q.path), "decision": decision})))
}

async fn property_detail(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let actor = v.session.actor();
    let token = v.session.access_token();
    let scope = v.scope();
    let loaded = scope
        .settle(views::load_property_detail(state.backend.as_ref(), &state.engine, actor.as_ref(), &id, token.as_deref()))
        .await;
    let resp = match loaded {
        None => view_closed(),
        Some(Ok(view)) => ok(json!({"view": ViewState::Ready(view)})),
        Some(Err(e)) => e.into_response(),
    };
    with_sid(sid, resp)
}

async fn property_edit(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let decision = state.guard.navigate(&v.session, &format!("/properties/{}/edit", id));
    if let Some(r) = guard_response(&decision) {
        return with_sid(sid, r);
    }
    let actor = v.session.actor();
    let token = v.session.access_token();
    let scope = v.scope();
    let loaded = scope
        .settle(views::load_property_edit(state.backend.as_ref(), &state.engine, actor.as_ref(), &id, token.as_deref()))
        .await;
    let resp = match loaded {
        None => view_closed(),
        Some(Ok(view)) => ok(json!({"view": ViewState::Ready(view)})),
        Some(Err(e)) => e.into_response(),
    };
    with_sid(sid, resp)
}

async fn property_save(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>, Json(form): Json<Map<String, Value>>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let decision = state.guard.navigate(&v.session, &format!("/properties/{}/edit", id));
    if let Some(r) = guard_response(&decision) {
        return with_sid(sid, r);
    }
    let payload = match UpdatePayload::from_form(&form) {
        Ok(p) => p,
        Err(e) => return with_sid(sid, e),
    };
    let actor = v.session.actor();
    let token = v.session.access_token();
    let scope = v.scope();
    let saved = scope
        .settle(views::save_property_edit(state.backend.as_ref(), &state.engine, actor.as_ref(), &id, &payload, token.as_deref()))
        .await;
    let resp = match saved {
        None => view_closed(),
        Some(Ok(record)) => ok(json!({"property": record})),
        Some(Err(e)) => e.into_response(),
    };
    with_sid(sid, resp)
}

fn registration_error(err: RegistrationError, draft: &RegistrationDraft) -> Response {
    let (status, app) = match &err {
        RegistrationError::InvalidTransition { .. } => (StatusCode::CONFLICT, AppError::conflict("invalid_step".to_string(), err.to_string())),
        RegistrationError::RoleNotRegistrable(_) => (StatusCode::BAD_REQUEST, AppError::validation("role_not_registrable".to_string(), err.to_string())),
        RegistrationError::Invalid(_) => (StatusCode::BAD_REQUEST, AppError::validation("invalid_fields".to_string(), err.to_string())),
        RegistrationError::Submission(e) => (StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_REQUEST), e.clone()),
    };
    (status, Json(json!({"status": "error", "error": app, "draft": draft.view()}))).into_response()
}

#[derive(Debug, Deserialize)]
struct RegisterQuery {
    #[serde(default, rename = "type")]
    role: Option<String>,
}

async fn register_view(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<RegisterQuery>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let mut slot = v.draft.lock().await;
    if slot.is_none() {
        let preset = q.role.as_deref().and_then(Role::normalize);
        let draft = match preset {
            Some(role) => RegistrationDraft::with_role(role).unwrap_or_default(),
            None => RegistrationDraft::new(),
        };
        *slot = Some(draft);
    }
    let view = slot.as_ref().map(RegistrationDraft::view);
    with_sid(sid, ok(json!({"draft": view})))
}

async fn register_role(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<RolePayload>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let role = match parse_role(&payload.role) {
        Ok(r) => r,
        Err(e) => return with_sid(sid, e),
    };
    let mut slot = v.draft.lock().await;
    let draft = slot.get_or_insert_with(RegistrationDraft::new);
    let resp = match draft.choose_role(role) {
        Ok(()) => ok(json!({"draft": draft.view()})),
        Err(e) => registration_error(e, draft),
    };
    with_sid(sid, resp)
}

async fn register_account(State(state): State<AppState>, headers: HeaderMap, Json(fields): Json<AccountFields>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let mut slot = v.draft.lock().await;
    let draft = slot.get_or_insert_with(RegistrationDraft::new);
    let resp = match draft.submit_account(fields, &DefaultAccountValidator) {
        Ok(()) => ok(json!({"draft": draft.view()})),
        Err(e) => registration_error(e, draft),
    };
    with_sid(sid, resp)
}

async fn register_back(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (v, sid) = state.visitor(&headers);
    let mut slot = v.draft.lock().await;
    let draft = slot.get_or_insert_with(RegistrationDraft::new);
    let resp = match draft.back() {
        Ok(()) => ok(json!({"draft": draft.view()})),
        Err(e) => registration_error(e, draft),
    };
    with_sid(sid, resp)
}

async fn register_submit(State(state): State<AppState>, headers: HeaderMap, Json(fields): Json<ProfileFields>) -> Response {
    let (v, sid) = state.visitor(&headers);
    let mut slot = v.draft.lock().await;
    let draft = slot.get_or_insert_with(RegistrationDraft::new);
    let grant = match draft.submit_profile(fields, &DefaultAccountValidator, state.backend.as_ref()).await {
        Ok(g) => g,
        Err(e) => return with_sid(sid, registration_error(e, draft)),
    };
    *slot = None;
    drop(slot);
    let resp = match v.session.adopt(grant) {
        Ok(step) => {
            v.remount();
            ok(json!({"step": step, "session": v.session.snapshot(), "access_token": v.session.access_token()}))
        }
        Err(e) => AppError::from(e).into_response(),
    };
    with_sid(sid, resp)
}

async fn ml_panel(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (v, sid) = state.visitor(&headers);
    let decision = state.guard.navigate(&v.session, "/admin/ml-system");
    if let Some(r) = guard_response(&decision) {
        return with_sid(sid, r);
    }
    let actor = v.session.actor();
    let token = v.session.access_token();
    let resp = match v.scope().settle(views::load_ml_panel(state.backend.as_ref(), actor.as_ref(), token.as_deref())).await {
        None => view_closed(),
        Some(Ok(view)) => ok(json!({"view": ViewState::Ready(view)})),
        Some(Err(e)) => e.into_response(),
    };
    with_sid(sid, resp)
}

async fn ml_retrain(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (v, sid) = state.visitor(&headers);
    let decision = state.guard.navigate(&v.session, "/admin/ml-system");
    if let Some(r) = guard_response(&decision) {
        return with_sid(sid, r);
    }
    let actor = v.session.actor();
    let token = v.session.access_token();
    let resp = match v.scope().settle(views::retrain_model(state.backend.as_ref(), actor.as_ref(), token.as_deref())).await {
        None => view_closed(),
        Some(Ok(view)) => ok(json!({"view": ViewState::Ready(view)})),
        Some(Err(e)) => e.into_response(),
    };
    with_sid(sid, resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing() {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_static("a=1; estate_session=abc; b=2"));
        assert_eq!(parse_cookie(&h, SESSION_COOKIE).as_deref(), Some("abc"));
        assert_eq!(parse_cookie(&HeaderMap::new(), SESSION_COOKIE), None);
    }

    #[test]
    fn session_ids_are_hex_and_distinct() {
        let a = gen_sid();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, gen_sid());
    }
}
