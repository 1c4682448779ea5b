//! REST backend client.
//!
//! `base` is the API root (for example `http://localhost:5000/api`); every
//! endpoint is joined onto it. Bearer tokens are passed per call because one
//! client serves every visitor session.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ApiError, ModelAdmin, ModelStats, PropertyApi, PropertyRecord, UpdatePayload};
use crate::identity::{id_string, Actor, AuthGrant, IdentityProvider, LoginOutcome, LoginRequest, RegistrationRequest, Role};

#[derive(Clone)]
pub struct HttpBackend {
    base: Url,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base: &str) -> Result<Self, ApiError> {
        let mut base = base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| ApiError::Internal(format!("invalid API base URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Internal(format!("http client: {}", e)))?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url { &self.base }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Internal(format!("bad endpoint '{}': {}", path, e)))
    }

    fn headers(token: Option<&str>) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(t) = token {
            let v = HeaderValue::from_str(&format!("Bearer {}", t)).map_err(|_| ApiError::Internal("token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, v);
        }
        Ok(headers)
    }

    async fn call(&self, method: Method, path: &str, token: Option<&str>, body: Option<Value>, what: &str) -> Result<(StatusCode, Value), ApiError> {
        let url = self.url(path)?;
        debug!(target: "backend", method = %method, url = %url, "request");
        let mut req = self.client.request(method, url).headers(Self::headers(token)?);
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        read_response(resp, what).await
    }

    async fn get_list(&self, path: &str, key: &str) -> Result<Vec<Value>, ApiError> {
        let (_, body) = self.call(Method::GET, path, None, None, key).await?;
        list_from(body, key)
    }
}

async fn read_response(resp: reqwest::Response, what: &str) -> Result<(StatusCode, Value), ApiError> {
    let status = resp.status();
    let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;
    let body: Value = if text.trim().is_empty() { Value::Null } else { serde_json::from_str(&text).unwrap_or(Value::String(text)) };
    if status.is_success() {
        return Ok((status, body));
    }
    // Role disambiguation arrives as a 400 carrying the candidate roles.
    if status == StatusCode::BAD_REQUEST && body.get("require_user_type").and_then(Value::as_bool) == Some(true) {
        return Ok((status, body));
    }
    let message = body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status));
    warn!(target: "backend", status = status.as_u16(), what = %what, "request failed");
    Err(match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(what.to_string()),
        StatusCode::UNAUTHORIZED => ApiError::InvalidCredentials(message),
        StatusCode::INTERNAL_SERVER_ERROR => ApiError::Internal(message),
        s if s.is_server_error() => ApiError::Network(message),
        s => ApiError::Rejected { status: s.as_u16(), message },
    })
}

fn list_from(body: Value, key: &str) -> Result<Vec<Value>, ApiError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut m) => match m.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(ApiError::Decode(format!("'{}' is not a list", key))),
        },
        _ => Err(ApiError::Decode(format!("unexpected '{}' response", key))),
    }
}

/// Turn `{access_token, user}` into a grant. The active role is the backend's
/// `active_user_type`, else the requested role, else the first role listed.
pub(crate) fn grant_from_body(body: &Value, requested: Option<Role>, token_fallback: Option<&str>) -> Result<AuthGrant, ApiError> {
    let user = body.get("user").unwrap_or(body);
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .or(token_fallback)
        .ok_or_else(|| ApiError::Decode("response has no access_token".into()))?
        .to_string();
    let id = user.get("id").or_else(|| user.get("user_id")).and_then(id_string).ok_or_else(|| ApiError::Decode("user has no id".into()))?;

    let mut roles = Vec::new();
    for key in ["user_type", "roles", "role"] {
        if let Some(v) = user.get(key) {
            roles = Role::collect_from_value(v);
            if !roles.is_empty() {
                break;
            }
        }
    }
    let active = ["active_user_type", "active_role"]
        .iter()
        .find_map(|k| user.get(*k).and_then(Value::as_str).and_then(Role::normalize))
        .or(requested.filter(|r| roles.is_empty() || roles.contains(r)))
        .or_else(|| roles.first().copied())
        .ok_or_else(|| ApiError::Decode("user has no recognizable role".into()))?;
    if !roles.contains(&active) {
        roles.push(active);
    }

    let mut actor = Actor::new(id, active);
    actor.email = user.get("email").and_then(Value::as_str).map(str::to_string);
    actor.full_name = user
        .get("full_name")
        .or_else(|| user.get("profile").and_then(|p| p.get("full_name")))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(AuthGrant { actor, access_token, available_roles: roles })
}

impl IdentityProvider for HttpBackend {
    async fn login(&self, req: &LoginRequest) -> Result<LoginOutcome, ApiError> {
        let mut body = json!({"email": req.email, "password": req.password});
        if let Some(r) = req.role {
            body["user_type"] = json!(r.as_str());
        }
        let (status, resp) = self.call(Method::POST, "auth/login", None, Some(body), "Account").await?;
        if status == StatusCode::BAD_REQUEST {
            let available_roles = resp.get("user_types").map(Role::collect_from_value).unwrap_or_default();
            return Ok(LoginOutcome::RequireRoleSelection { available_roles });
        }
        grant_from_body(&resp, req.role, None).map(LoginOutcome::Active)
    }

    async fn register(&self, req: &RegistrationRequest) -> Result<AuthGrant, ApiError> {
        let body = json!({
            "email": req.email,
            "password": req.password,
            "user_type": req.role.as_str(),
            "full_name": req.full_name,
            "phone_number": req.phone_number,
            "company_name": req.company_name,
        });
        let (_, resp) = self.call(Method::POST, "auth/register", None, Some(body), "Account").await?;
        grant_from_body(&resp, Some(req.role), None)
    }

    async fn current_actor(&self, token: &str) -> Result<AuthGrant, ApiError> {
        let (_, resp) = self.call(Method::GET, "auth/me", Some(token), None, "Account").await?;
        grant_from_body(&resp, None, Some(token))
    }

    async fn switch_role(&self, token: &str, role: Role) -> Result<AuthGrant, ApiError> {
        let body = json!({"user_type": role.as_str()});
        let (_, resp) = self.call(Method::POST, "auth/switch-account", Some(token), Some(body), "Account").await?;
        grant_from_body(&resp, Some(role), None)
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        self.call(Method::POST, "auth/logout", Some(token), None, "Session").await?;
        Ok(())
    }
}

impl PropertyApi for HttpBackend {
    async fn get_property_by_id(&self, id: &str, token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        let what = format!("Property {}", id);
        let (_, body) = self.call(Method::GET, &format!("properties/{}", urlencoding::encode(id)), token, None, &what).await?;
        PropertyRecord::from_value(body)
    }

    async fn get_property_types(&self) -> Result<Vec<Value>, ApiError> { self.get_list("property-types", "property_types").await }

    async fn get_parishes(&self) -> Result<Vec<Value>, ApiError> { self.get_list("parishes", "parishes").await }

    async fn get_amenities(&self) -> Result<Vec<Value>, ApiError> { self.get_list("amenities", "amenities").await }

    async fn update_property(&self, id: &str, payload: &UpdatePayload, token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        let what = format!("Property {}", id);
        let url = self.url(&format!("properties/{}", urlencoding::encode(id)))?;
        let mut form = reqwest::multipart::Form::new();
        for (k, v) in payload.fields() {
            form = form.text(k.clone(), v.render());
        }
        for a in payload.amenities() {
            form = form.text("amenities", a.clone());
        }
        for img in payload.images() {
            let part = reqwest::multipart::Part::bytes(img.bytes.clone())
                .file_name(img.file_name.clone())
                .mime_str(&img.content_type)
                .map_err(|e| ApiError::Internal(format!("image content type: {}", e)))?;
            form = form.part("images", part);
        }
        debug!(target: "backend", url = %url, parts = payload.text_parts().len(), "multipart update");
        let resp = self
            .client
            .put(url)
            .headers(Self::headers(token)?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let (_, body) = read_response(resp, &what).await?;
        PropertyRecord::from_value(body)
    }
}

impl ModelAdmin for HttpBackend {
    async fn retrain_model(&self, token: Option<&str>) -> Result<(), ApiError> {
        self.call(Method::POST, "recommendations/ml/retrain", token, None, "Model").await?;
        Ok(())
    }

    async fn get_model_stats(&self, token: Option<&str>) -> Result<ModelStats, ApiError> {
        let (_, body) = self.call(Method::GET, "recommendations/ml/stats", token, None, "Model statistics").await?;
        let stats = body.get("stats").cloned().unwrap_or(body);
        serde_json::from_value(stats).map_err(|e| ApiError::Decode(e.to_string()))
    }
}
