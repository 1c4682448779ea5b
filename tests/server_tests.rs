//! HTTP surface tests: drive the router in-process with `oneshot` against the
//! seeded in-memory backend.

use anyhow::Result;
use argon2::Params;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use estate_gate::backend::{Backend, MemoryBackend};
use estate_gate::config::AppConfig;
use estate_gate::identity::LocalIdentityProvider;
use estate_gate::server::{router, AppState};

fn app() -> Result<Router> {
    let identity = LocalIdentityProvider::with_params(Params::new(8, 1, 1, None).map_err(|e| anyhow::anyhow!(e.to_string()))?);
    let mem = MemoryBackend::new(identity);
    mem.seed_demo()?;
    let config = AppConfig { seed_demo: false, ..AppConfig::default() };
    Ok(router(AppState::new(Backend::Memory(mem), config)))
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    fn cookie(&self) -> Option<String> {
        let raw = self.headers.get(header::SET_COOKIE)?.to_str().ok()?;
        raw.split(';').next().map(str::to_string)
    }

    fn location(&self) -> Option<&str> { self.headers.get(header::LOCATION)?.to_str().ok() }
}

async fn send(app: &Router, method: Method, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Result<Reply> {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(c) = cookie {
        req = req.header(header::COOKIE, c);
    }
    let req = match body {
        Some(v) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(serde_json::to_vec(&v)?))?,
        None => req.body(Body::empty())?,
    };
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    Ok(Reply { status, headers, body })
}

/// Log in and return the visitor's cookie.
async fn login(app: &Router, email: &str) -> Result<(String, Reply)> {
    let r = send(app, Method::POST, "/session/login", None, Some(json!({"email": email, "password": "Password1"}))).await?;
    let cookie = r.cookie().expect("session cookie");
    Ok((cookie, r))
}

#[tokio::test]
async fn anonymous_edit_redirects_to_login_and_remembers_the_path() -> Result<()> {
    let app = app()?;
    let r = send(&app, Method::GET, "/properties/1/edit", None, None).await?;
    assert_eq!(r.status, StatusCode::SEE_OTHER);
    assert_eq!(r.location(), Some("/login?from=%2Fproperties%2F1%2Fedit"));
    let cookie = r.cookie().expect("cookie");
    assert!(r.headers.get(header::SET_COOKIE).and_then(|v| v.to_str().ok()).is_some_and(|v| v.contains("HttpOnly")));

    let s = send(&app, Method::GET, "/session", Some(&cookie), None).await?;
    assert_eq!(s.body["session"]["status"], "unauthenticated");
    assert_eq!(s.body["return_to"], "/properties/1/edit");

    let l = send(
        &app,
        Method::POST,
        "/session/login",
        Some(&cookie),
        Some(json!({"email": "agent@example.com", "password": "Password1"})),
    )
    .await?;
    assert_eq!(l.status, StatusCode::OK);
    assert_eq!(l.body["step"]["status"], "authenticated");
    assert_eq!(l.body["step"]["landing"], "/properties/1/edit");
    assert!(l.body["access_token"].is_string());
    Ok(())
}

#[tokio::test]
async fn public_detail_renders_without_a_session() -> Result<()> {
    let app = app()?;
    let r = send(&app, Method::GET, "/properties/2", None, None).await?;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["view"]["state"], "ready");
    assert_eq!(r.body["view"]["data"]["can_edit_affordance"], false);

    let missing = send(&app, Method::GET, "/properties/99", None, None).await?;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.body["error"]["type"], "not_found");
    Ok(())
}

#[tokio::test]
async fn agent_edits_only_assigned_listings() -> Result<()> {
    let app = app()?;
    let (cookie, _) = login(&app, "agent@example.com").await?;

    let ok = send(&app, Method::GET, "/properties/3/edit", Some(&cookie), None).await?;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.body["view"]["data"]["decision"]["reason"], "id_match_agent");

    let denied = send(&app, Method::GET, "/properties/4/edit", Some(&cookie), None).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(denied.body["error"]["type"], "permission");
    assert_eq!(denied.body["retryable"], false);
    Ok(())
}

#[tokio::test]
async fn seeker_is_sent_to_dashboard_from_lister_and_admin_pages() -> Result<()> {
    let app = app()?;
    let (cookie, r) = login(&app, "seeker@example.com").await?;
    assert_eq!(r.body["step"]["landing"], "/");

    for path in ["/properties/1/edit", "/admin/ml-system"] {
        let g = send(&app, Method::GET, path, Some(&cookie), None).await?;
        assert_eq!(g.status, StatusCode::SEE_OTHER, "{}", path);
        assert_eq!(g.location(), Some("/dashboard"));
    }
    Ok(())
}

#[tokio::test]
async fn dual_account_picks_a_role_then_switches() -> Result<()> {
    let app = app()?;
    let (cookie, r) = login(&app, "dual@example.com").await?;
    assert_eq!(r.body["step"]["status"], "pending_role_selection");
    assert_eq!(r.body["step"]["available_roles"], json!(["property_owner", "agent"]));

    let bad = send(&app, Method::POST, "/session/select-role", Some(&cookie), Some(json!({"role": "admin"}))).await?;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    let still = send(&app, Method::GET, "/session", Some(&cookie), None).await?;
    assert_eq!(still.body["session"]["status"], "pending_role_selection");

    let picked = send(&app, Method::POST, "/session/select-role", Some(&cookie), Some(json!({"role": "property_owner"}))).await?;
    assert_eq!(picked.status, StatusCode::OK);
    assert_eq!(picked.body["session"]["actor"]["role"], "property_owner");

    let switched = send(&app, Method::POST, "/session/switch-role", Some(&cookie), Some(json!({"role": "agent"}))).await?;
    assert_eq!(switched.status, StatusCode::OK);
    assert_eq!(switched.body["session"]["actor"]["role"], "agent");
    Ok(())
}

#[tokio::test]
async fn owner_saves_an_edit_and_title_is_required() -> Result<()> {
    let app = app()?;
    let (cookie, _) = login(&app, "owner@example.com").await?;

    let saved = send(
        &app,
        Method::POST,
        "/properties/1/edit",
        Some(&cookie),
        Some(json!({"title": "Hillside villa, renovated", "is_featured": true, "amenities": [{"amen_id": 2}, 5]})),
    )
    .await?;
    assert_eq!(saved.status, StatusCode::OK);
    assert_eq!(saved.body["property"]["title"], "Hillside villa, renovated");
    assert_eq!(saved.body["property"]["amenities"], json!(["2", "5"]));

    let untitled = send(&app, Method::POST, "/properties/1/edit", Some(&cookie), Some(json!({"title": " "}))).await?;
    assert_eq!(untitled.status, StatusCode::BAD_REQUEST);
    assert_eq!(untitled.body["error"]["message"], "Property title is required");
    Ok(())
}

#[tokio::test]
async fn admin_retrains_the_model() -> Result<()> {
    let app = app()?;
    let (cookie, _) = login(&app, "admin@example.com").await?;

    let panel = send(&app, Method::GET, "/admin/ml-system", Some(&cookie), None).await?;
    assert_eq!(panel.status, StatusCode::OK);
    assert_eq!(panel.body["view"]["data"]["stats"]["interaction_count"], 42);

    let retrained = send(&app, Method::POST, "/admin/ml-system/retrain", Some(&cookie), None).await?;
    assert_eq!(retrained.status, StatusCode::OK);
    assert_eq!(retrained.body["view"]["data"]["message"], "Model retrained successfully");
    assert!(retrained.body["view"]["data"]["stats"]["model_info"]["trained_at"].is_string());
    Ok(())
}

#[tokio::test]
async fn registration_wizard_creates_and_signs_in_an_agent() -> Result<()> {
    let app = app()?;
    let start = send(&app, Method::GET, "/register?type=agent", None, None).await?;
    let cookie = start.cookie().expect("cookie");
    assert_eq!(start.body["draft"]["step"], "account_details");
    assert_eq!(start.body["draft"]["company_field"]["label"], "Company Name (Optional)");

    let weak = send(
        &app,
        Method::POST,
        "/register/account",
        Some(&cookie),
        Some(json!({"email": "new.agent@example.com", "password": "short", "confirm_password": "short"})),
    )
    .await?;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);
    assert_eq!(weak.body["draft"]["step"], "account_details");
    assert!(weak.body["draft"]["errors"]["password"].is_string());

    let account = send(
        &app,
        Method::POST,
        "/register/account",
        Some(&cookie),
        Some(json!({"email": "new.agent@example.com", "password": "Secret123", "confirm_password": "Secret123"})),
    )
    .await?;
    assert_eq!(account.status, StatusCode::OK);
    assert_eq!(account.body["draft"]["step"], "profile_details");

    let done = send(
        &app,
        Method::POST,
        "/register/submit",
        Some(&cookie),
        Some(json!({"full_name": "New Agent", "phone_number": "876-555-1234", "company_name": "Island Realty"})),
    )
    .await?;
    assert_eq!(done.status, StatusCode::OK);
    assert_eq!(done.body["step"]["landing"], "/dashboard");
    assert_eq!(done.body["session"]["actor"]["role"], "agent");

    let fresh = send(&app, Method::GET, "/register", Some(&cookie), None).await?;
    assert_eq!(fresh.body["draft"]["step"], "role_selection");
    Ok(())
}

#[tokio::test]
async fn admin_cannot_be_registered() -> Result<()> {
    let app = app()?;
    let r = send(&app, Method::POST, "/register/role", None, Some(json!({"role": "admin"}))).await?;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.body["draft"]["step"], "role_selection");
    Ok(())
}

#[tokio::test]
async fn logout_clears_cookie_and_session() -> Result<()> {
    let app = app()?;
    let (cookie, _) = login(&app, "owner@example.com").await?;
    let out = send(&app, Method::POST, "/session/logout", Some(&cookie), None).await?;
    assert_eq!(out.status, StatusCode::OK);
    let set = out.headers.get(header::SET_COOKIE).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    assert!(set.contains("1970"));

    let after = send(&app, Method::GET, "/properties/1/edit", Some(&cookie), None).await?;
    assert_eq!(after.status, StatusCode::SEE_OTHER);
    Ok(())
}

#[tokio::test]
async fn guard_endpoint_reports_access_and_decision() -> Result<()> {
    let app = app()?;
    let r = send(&app, Method::GET, "/guard?path=/manage-clients", None, None).await?;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body["access"]["access"], "roles");
    assert_eq!(r.body["access"]["roles"], json!(["agent"]));
    assert_eq!(r.body["decision"]["decision"], "redirect");
    assert_eq!(r.body["decision"]["to"], "/login?from=%2Fmanage-clients");
    Ok(())
}

#[tokio::test]
async fn restore_with_a_bad_token_settles_unauthenticated() -> Result<()> {
    let app = app()?;
    let r = send(&app, Method::POST, "/session/restore", None, Some(json!({"token": "bogus"}))).await?;
    assert_eq!(r.status, StatusCode::ACCEPTED);
    let cookie = r.cookie().expect("cookie");
    for _ in 0..50 {
        let s = send(&app, Method::GET, "/session", Some(&cookie), None).await?;
        if s.body["session"]["resolving"] == false {
            assert_eq!(s.body["session"]["status"], "unauthenticated");
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    anyhow::bail!("restore never settled")
}
