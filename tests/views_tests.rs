//! Property and model-admin view tests against stub collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use estate_gate::backend::{ApiError, ModelAdmin, ModelInfo, ModelStats, PropertyApi, PropertyRecord, UpdatePayload};
use estate_gate::error::AppError;
use estate_gate::identity::{Actor, AuthorizationEngine, EditPolicy, Role, EDIT_DENIED_MESSAGE};
use estate_gate::views::{self, ViewScope, ViewState};

#[derive(Default)]
struct StubApi {
    property: Option<Value>,
    parishes_error: Option<ApiError>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
    updates: AtomicUsize,
    retrain_error: Option<ApiError>,
    stats_calls: AtomicUsize,
}

impl StubApi {
    fn with_property(property: Value) -> Self {
        Self { property: Some(property), ..Self::default() }
    }
}

impl PropertyApi for StubApi {
    async fn get_property_by_id(&self, id: &str, _token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match &self.property {
            Some(v) => PropertyRecord::from_value(v.clone()),
            None => Err(ApiError::NotFound(format!("Property {}", id))),
        }
    }

    async fn get_property_types(&self) -> Result<Vec<Value>, ApiError> { Ok(vec![json!({"id": 1, "name": "House"})]) }

    async fn get_parishes(&self) -> Result<Vec<Value>, ApiError> {
        match &self.parishes_error {
            Some(e) => Err(e.clone()),
            None => Ok(vec![json!({"id": 1, "name": "Kingston"})]),
        }
    }

    async fn get_amenities(&self) -> Result<Vec<Value>, ApiError> { Ok(vec![json!({"amen_id": 3, "name": "Pool"})]) }

    async fn update_property(&self, _id: &str, payload: &UpdatePayload, _token: Option<&str>) -> Result<PropertyRecord, ApiError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut record = PropertyRecord::from_value(self.property.clone().unwrap_or_else(|| json!({})))?;
        for (k, v) in payload.fields() {
            record.fields_mut().insert(k.clone(), v.to_json());
        }
        Ok(record)
    }
}

impl ModelAdmin for StubApi {
    async fn retrain_model(&self, _token: Option<&str>) -> Result<(), ApiError> {
        match &self.retrain_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn get_model_stats(&self, _token: Option<&str>) -> Result<ModelStats, ApiError> {
        let n = self.stats_calls.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(ModelStats {
            interaction_count: 10 + n,
            user_count: 2,
            property_count: 4,
            model_info: ModelInfo { trained_at: Some(format!("t{}", n)), ..ModelInfo::default() },
        })
    }
}

fn agent(id: &str) -> Actor { Actor::new(id, Role::Agent) }

#[tokio::test]
async fn assigned_agent_gets_the_edit_form_with_reference_lists() -> Result<()> {
    let api = StubApi::with_property(json!({"property": {"property_id": 5, "title": "Villa", "assigned_to": 9}}));
    let engine = AuthorizationEngine::default();
    let view = views::load_property_edit(&api, &engine, Some(&agent("9")), "5", Some("tok")).await?;
    assert!(view.decision.allowed());
    assert_eq!(view.property.id().as_deref(), Some("5"));
    assert_eq!(view.reference.parishes.len(), 1);
    assert_eq!(view.reference.amenities[0]["amen_id"], 3);
    Ok(())
}

#[tokio::test]
async fn unassigned_agent_is_denied_not_redirected() {
    let api = StubApi::with_property(json!({"property_id": 5, "title": "Villa", "agent_id": "12"}));
    let engine = AuthorizationEngine::default();
    let err = views::load_property_edit(&api, &engine, Some(&agent("9")), "5", Some("tok")).await.unwrap_err();
    assert!(matches!(err, AppError::Permission { .. }));
    assert_eq!(err.message(), EDIT_DENIED_MESSAGE);
    assert!(!ViewState::<()>::from_result(Err(err)).can_retry());
}

#[tokio::test]
async fn owner_policy_controls_owner_edits() -> Result<()> {
    let api = StubApi::with_property(json!({"property_id": 5, "title": "Villa", "owner_id": 3}));
    let stranger = Actor::new("4", Role::PropertyOwner);

    let relaxed = AuthorizationEngine::with_policy(EditPolicy::RelaxedOwnerRole);
    assert!(views::load_property_edit(&api, &relaxed, Some(&stranger), "5", None).await.is_ok());

    let strict = AuthorizationEngine::with_policy(EditPolicy::OwnerById);
    let err = views::load_property_edit(&api, &strict, Some(&stranger), "5", None).await.unwrap_err();
    assert!(matches!(err, AppError::Permission { .. }));
    let owner = Actor::new("3", Role::PropertyOwner);
    assert!(views::load_property_edit(&api, &strict, Some(&owner), "5", None).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn failing_reference_list_fails_the_whole_page() {
    let api = StubApi {
        parishes_error: Some(ApiError::Network("connection reset".into())),
        ..StubApi::with_property(json!({"property_id": 5, "title": "Villa"}))
    };
    let admin = Actor::new("1", Role::Admin);
    let result = views::load_property_edit(&api, &AuthorizationEngine::default(), Some(&admin), "5", None).await;
    let state = ViewState::from_result(result);
    assert!(matches!(state, ViewState::Failed(AppError::Network { .. })));
    assert!(state.can_retry());
}

#[tokio::test]
async fn missing_property_is_not_found_rather_than_forbidden() {
    let api = StubApi::default();
    let err = views::load_property_edit(&api, &AuthorizationEngine::default(), Some(&agent("9")), "77", None).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn detail_page_is_readable_by_anyone() -> Result<()> {
    let api = StubApi::with_property(json!({"property_id": 5, "title": "Villa", "userId": 3}));
    let engine = AuthorizationEngine::default();

    let anon = views::load_property_detail(&api, &engine, None, "5", None).await?;
    assert!(!anon.can_edit_affordance);
    let seeker = Actor::new("3", Role::PropertySeeker);
    assert!(!views::load_property_detail(&api, &engine, Some(&seeker), "5", None).await?.can_edit_affordance);
    let owner = Actor::new("3", Role::PropertyOwner);
    assert!(views::load_property_detail(&api, &engine, Some(&owner), "5", None).await?.can_edit_affordance);
    Ok(())
}

#[tokio::test]
async fn save_validates_and_reauthorizes_before_updating() -> Result<()> {
    let api = StubApi::with_property(json!({"property_id": 5, "title": "Villa", "agent_id": 9}));
    let engine = AuthorizationEngine::default();

    let untitled = UpdatePayload::new().text("price", "100");
    let err = views::save_property_edit(&api, &engine, Some(&agent("9")), "5", &untitled, Some("tok")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
    assert_eq!(api.fetches.load(Ordering::SeqCst), 0);

    let payload = UpdatePayload::new().text("title", "Renamed villa").flag("is_featured", true);
    let err = views::save_property_edit(&api, &engine, Some(&agent("8")), "5", &payload, Some("tok")).await.unwrap_err();
    assert!(matches!(err, AppError::Permission { .. }));
    assert_eq!(api.updates.load(Ordering::SeqCst), 0);

    let saved = views::save_property_edit(&api, &engine, Some(&agent("9")), "5", &payload, Some("tok")).await?;
    assert_eq!(saved.get("title"), Some(&json!("Renamed villa")));
    assert_eq!(api.updates.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn late_results_are_dropped_after_unmount() {
    let api = StubApi {
        delay: Some(Duration::from_millis(50)),
        ..StubApi::with_property(json!({"property_id": 5, "title": "Villa"}))
    };
    let engine = AuthorizationEngine::default();
    let scope = ViewScope::mount("property_detail");
    let pending = scope.settle(views::load_property_detail(&api, &engine, None, "5", None));
    let closer = scope.clone();
    let (out, _) = tokio::join!(pending, async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        closer.unmount();
    });
    assert!(out.is_none());
    assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ml_panel_is_admin_only() {
    let api = StubApi::default();
    let err = views::load_ml_panel(&api, Some(&agent("9")), None).await.unwrap_err();
    assert!(matches!(err, AppError::Permission { .. }));
    assert!(views::load_ml_panel(&api, None, None).await.is_err());
    assert_eq!(api.stats_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retrain_refreshes_stats() -> Result<()> {
    let api = StubApi::default();
    let admin = Actor::new("1", Role::Admin);
    let before = views::load_ml_panel(&api, Some(&admin), Some("tok")).await?;
    assert!(before.message.is_none());

    let after = views::retrain_model(&api, Some(&admin), Some("tok")).await?;
    assert_eq!(after.message.as_deref(), Some("Model retrained successfully"));
    assert_ne!(after.stats.model_info.trained_at, before.stats.model_info.trained_at);
    Ok(())
}

#[tokio::test]
async fn retrain_failures_keep_network_errors_retryable() {
    let admin = Actor::new("1", Role::Admin);

    let rejected = StubApi { retrain_error: Some(ApiError::Rejected { status: 400, message: "no data".into() }), ..StubApi::default() };
    let err = views::retrain_model(&rejected, Some(&admin), None).await.unwrap_err();
    assert!(matches!(err, AppError::Internal { .. }));
    assert!(err.message().starts_with("Failed to retrain model"));

    let offline = StubApi { retrain_error: Some(ApiError::Network("timeout".into())), ..StubApi::default() };
    assert!(views::retrain_model(&offline, Some(&admin), None).await.unwrap_err().retryable());
}
