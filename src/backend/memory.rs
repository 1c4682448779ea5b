//! In-process backend for the dev server and tests.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{ApiError, ModelAdmin, ModelStats, PropertyApi, PropertyRecord, UpdatePayload};
use crate::identity::{AuthGrant, IdentityProvider, LocalIdentityProvider, LoginOutcome, LoginRequest, RegistrationRequest, Role};

pub struct MemoryBackend {
    identity: LocalIdentityProvider,
    properties: RwLock<BTreeMap<String, PropertyRecord>>,
    property_types: Vec<Value>,
    parishes: Vec<Value>,
    amenities: Vec<Value>,
    stats: RwLock<ModelStats>,
    retrain_count: RwLock<u64>,
}

impl Default for MemoryBackend {
    fn default() -> Self { Self::new(LocalIdentityProvider::new()) }
}

impl MemoryBackend {
    pub fn new(identity: LocalIdentityProvider) -> Self {
        Self {
            identity,
            properties: RwLock::new(BTreeMap::new()),
            property_types: ["House", "Apartment", "Townhouse", "Land", "Commercial"]
                .iter()
                .enumerate()
                .map(|(i, n)| json!({"type_id": i + 1, "name": n}))
                .collect(),
            parishes: ["Kingston", "St. Andrew", "St. Catherine", "St. James", "Manchester", "St. Ann"]
                .iter()
                .enumerate()
                .map(|(i, n)| json!({"parish_id": i + 1, "name": n}))
                .collect(),
            amenities: ["Pool", "Garage", "Garden", "Security", "Air Conditioning", "Gym"]
                .iter()
                .enumerate()
                .map(|(i, n)| json!({"amen_id": i + 1, "name": n}))
                .collect(),
            stats: RwLock::new(ModelStats::default()),
            retrain_count: RwLock::new(0),
        }
    }

    pub fn identity(&self) -> &LocalIdentityProvider { &self.identity }

    /// Store a record under its `property_id`/`id`; returns that id.
    pub fn insert_property(&self, fields: Value) -> Result<String, ApiError> {
        let record = PropertyRecord::from_value(fields)?;
        let id = record.id().ok_or_else(|| ApiError::Decode("property record has no id".into()))?;
        self.properties.write().insert(id.clone(), record);
        self.stats.write().property_count = self.properties.read().len() as u64;
        Ok(id)
    }

    pub fn retrain_count(&self) -> u64 { *self.retrain_count.read() }

    /// Demo data: one account per role plus a dual owner/agent login, and a few
    /// properties whose ownership uses different legacy field names.
    pub fn seed_demo(&self) -> Result<(), ApiError> {
        let seeker = self.identity.add_account("seeker@example.com", "Password1", Role::PropertySeeker, Some("Sam Seeker"))?;
        let owner = self.identity.add_account("owner@example.com", "Password1", Role::PropertyOwner, Some("Olive Owner"))?;
        let agent = self.identity.add_account("agent@example.com", "Password1", Role::Agent, Some("Andre Agent"))?;
        self.identity.add_account("admin@example.com", "Password1", Role::Admin, Some("Ada Admin"))?;
        let dual_owner = self.identity.add_account("dual@example.com", "Password1", Role::PropertyOwner, Some("Dana Dual"))?;
        self.identity.add_account("dual@example.com", "Password1", Role::Agent, Some("Dana Dual"))?;

        self.insert_property(json!({"property_id": 1, "title": "Hillside villa", "price": 450000, "owner_id": owner, "agent_id": agent}))?;
        self.insert_property(json!({"property_id": 2, "title": "Harbour apartment", "price": 180000, "created_by": dual_owner}))?;
        self.insert_property(json!({"property_id": 3, "title": "Garden townhouse", "price": 265000, "userId": owner, "assigned_to": agent.parse::<u64>().unwrap_or_default()}))?;
        self.insert_property(json!({"property_id": 4, "title": "Beach lot", "price": 95000}))?;
        *self.stats.write() = ModelStats {
            interaction_count: 42,
            user_count: 5,
            property_count: self.properties.read().len() as u64,
            ..ModelStats::default()
        };
        info!(target: "backend", seeker = %seeker, "demo data seeded");
        Ok(())
    }
}

impl IdentityProvider for MemoryBackend {
    async fn login(&self, req: &LoginRequest) -> Result<LoginOutcome, ApiError> { self.identity.login(req).await }

    async fn register(&self, req: &RegistrationRequest) -> Result<AuthGrant, ApiError> { self.identity.register(req).await }

    async fn current_actor(&self, token: &str) -> Result<AuthGrant, ApiError> { self.identity.current_actor(token).await }

    async fn switch_role(&self, token: &str, role: Role) -> Result<AuthGrant, ApiError> { self.identity.switch_role(token, role).await }

    async fn logout(&self, token: &str) -> Result<(), ApiError> { self.identity.logout(token).await }
}

impl PropertyApi for MemoryBackend {
    async fn get_property_by_id(&self, id: &str, _token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        self.properties
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Property {}", id)))
    }

    async fn get_property_types(&self) -> Result<Vec<Value>, ApiError> { Ok(self.property_types.clone()) }

    async fn get_parishes(&self) -> Result<Vec<Value>, ApiError> { Ok(self.parishes.clone()) }

    async fn get_amenities(&self) -> Result<Vec<Value>, ApiError> { Ok(self.amenities.clone()) }

    async fn update_property(&self, id: &str, payload: &UpdatePayload, token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        if token.is_none() {
            return Err(ApiError::InvalidCredentials("Authentication required.".into()));
        }
        let mut props = self.properties.write();
        let record = props.get_mut(id).ok_or_else(|| ApiError::NotFound(format!("Property {}", id)))?;
        let fields: &mut Map<String, Value> = record.fields_mut();
        for (k, v) in payload.fields() {
            fields.insert(k.clone(), v.to_json());
        }
        fields.insert(
            "amenities".to_string(),
            Value::Array(payload.amenities().iter().map(|a| Value::String(a.clone())).collect()),
        );
        if !payload.images().is_empty() {
            let images = fields.entry("images").or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = images {
                for img in payload.images() {
                    list.push(Value::String(format!("/uploads/{}-{}", uuid::Uuid::new_v4(), img.file_name)));
                }
            }
        }
        info!(target: "backend", id = %id, fields = payload.fields().len(), images = payload.images().len(), "property updated");
        Ok(record.clone())
    }
}

impl ModelAdmin for MemoryBackend {
    async fn retrain_model(&self, _token: Option<&str>) -> Result<(), ApiError> {
        *self.retrain_count.write() += 1;
        let mut stats = self.stats.write();
        stats.model_info.trained_at = Some(chrono::Utc::now().to_rfc3339());
        info!(target: "backend", "model retrained");
        Ok(())
    }

    async fn get_model_stats(&self, _token: Option<&str>) -> Result<ModelStats, ApiError> { Ok(self.stats.read().clone()) }
}
