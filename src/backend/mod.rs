//! External data collaborators: property records, reference lists and the
//! recommendation model admin endpoints.
//!
//! `Backend` picks one implementation at startup (REST or in-process) and
//! delegates every collaborator trait to it, the same way for identity,
//! property and admin calls.

pub mod http;
pub mod memory;
mod payload;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::identity::{
    id_string, AuthGrant, IdentityProvider, LoginOutcome, LoginRequest, OwnershipSurface, RegistrationRequest, Role,
};

pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use payload::{FieldValue, ImageUpload, UpdatePayload};

/// Failure of a collaborator call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A property as the backend returns it: an open JSON object whose owner and
/// agent may sit under any of the legacy field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyRecord(Map<String, Value>);

impl PropertyRecord {
    pub fn new(fields: Map<String, Value>) -> Self { Self(fields) }

    /// Accepts a bare object or one wrapped as `{ "property": {...} }`.
    pub fn from_value(value: Value) -> Result<Self, ApiError> {
        match value {
            Value::Object(mut m) => match m.remove("property") {
                Some(Value::Object(inner)) => Ok(Self(inner)),
                Some(other) => {
                    m.insert("property".to_string(), other);
                    Ok(Self(m))
                }
                None => Ok(Self(m)),
            },
            other => Err(ApiError::Decode(format!("expected a property object, got {}", kind_of(&other)))),
        }
    }

    pub fn id(&self) -> Option<String> {
        ["property_id", "id"].iter().find_map(|k| self.0.get(*k).and_then(id_string))
    }

    pub fn get(&self, field: &str) -> Option<&Value> { self.0.get(field) }

    pub fn fields(&self) -> &Map<String, Value> { &self.0 }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> { &mut self.0 }

    pub fn into_inner(self) -> Map<String, Value> { self.0 }
}

impl OwnershipSurface for PropertyRecord {
    fn field(&self, name: &str) -> Option<&Value> { self.0.get(name) }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Lookup lists the edit form needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub property_types: Vec<Value>,
    pub parishes: Vec<Value>,
    pub amenities: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub trained_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Recommendation model statistics, computed by the backend and only displayed here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    #[serde(default)]
    pub interaction_count: u64,
    #[serde(default)]
    pub user_count: u64,
    #[serde(default)]
    pub property_count: u64,
    #[serde(default)]
    pub model_info: ModelInfo,
}

pub trait PropertyApi: Send + Sync + 'static {
    fn get_property_by_id(&self, id: &str, token: Option<&str>) -> impl Future<Output = Result<PropertyRecord, ApiError>> + Send;

    fn get_property_types(&self) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    fn get_parishes(&self) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    fn get_amenities(&self) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    fn update_property(&self, id: &str, payload: &UpdatePayload, token: Option<&str>) -> impl Future<Output = Result<PropertyRecord, ApiError>> + Send;
}

pub trait ModelAdmin: Send + Sync + 'static {
    fn retrain_model(&self, token: Option<&str>) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn get_model_stats(&self, token: Option<&str>) -> impl Future<Output = Result<ModelStats, ApiError>> + Send;
}

pub enum Backend {
    Memory(MemoryBackend),
    Http(HttpBackend),
}

impl Backend {
    pub fn ident(&self) -> String {
        match self {
            Backend::Memory(_) => "memory".to_string(),
            Backend::Http(h) => format!("http:{}", h.base()),
        }
    }
}

impl IdentityProvider for Backend {
    async fn login(&self, req: &LoginRequest) -> Result<LoginOutcome, ApiError> {
        match self {
            Backend::Memory(m) => m.login(req).await,
            Backend::Http(h) => h.login(req).await,
        }
    }

    async fn register(&self, req: &RegistrationRequest) -> Result<AuthGrant, ApiError> {
        match self {
            Backend::Memory(m) => m.register(req).await,
            Backend::Http(h) => h.register(req).await,
        }
    }

    async fn current_actor(&self, token: &str) -> Result<AuthGrant, ApiError> {
        match self {
            Backend::Memory(m) => m.current_actor(token).await,
            Backend::Http(h) => h.current_actor(token).await,
        }
    }

    async fn switch_role(&self, token: &str, role: Role) -> Result<AuthGrant, ApiError> {
        match self {
            Backend::Memory(m) => m.switch_role(token, role).await,
            Backend::Http(h) => h.switch_role(token, role).await,
        }
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        match self {
            Backend::Memory(m) => m.logout(token).await,
            Backend::Http(h) => h.logout(token).await,
        }
    }
}

impl PropertyApi for Backend {
    async fn get_property_by_id(&self, id: &str, token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        match self {
            Backend::Memory(m) => m.get_property_by_id(id, token).await,
            Backend::Http(h) => h.get_property_by_id(id, token).await,
        }
    }

    async fn get_property_types(&self) -> Result<Vec<Value>, ApiError> {
        match self {
            Backend::Memory(m) => m.get_property_types().await,
            Backend::Http(h) => h.get_property_types().await,
        }
    }

    async fn get_parishes(&self) -> Result<Vec<Value>, ApiError> {
        match self {
            Backend::Memory(m) => m.get_parishes().await,
            Backend::Http(h) => h.get_parishes().await,
        }
    }

    async fn get_amenities(&self) -> Result<Vec<Value>, ApiError> {
        match self {
            Backend::Memory(m) => m.get_amenities().await,
            Backend::Http(h) => h.get_amenities().await,
        }
    }

    async fn update_property(&self, id: &str, payload: &UpdatePayload, token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        match self {
            Backend::Memory(m) => m.update_property(id, payload, token).await,
            Backend::Http(h) => h.update_property(id, payload, token).await,
        }
    }
}

impl ModelAdmin for Backend {
    async fn retrain_model(&self, token: Option<&str>) -> Result<(), ApiError> {
        match self {
            Backend::Memory(m) => m.retrain_model(token).await,
            Backend::Http(h) => h.retrain_model(token).await,
        }
    }

    async fn get_model_stats(&self, token: Option<&str>) -> Result<ModelStats, ApiError> {
        match self {
            Backend::Memory(m) => m.get_model_stats(token).await,
            Backend::Http(h) => h.get_model_stats(token).await,
        }
    }
}
