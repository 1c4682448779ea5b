//! Property detail and edit views.

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{PropertyApi, PropertyRecord, ReferenceData, UpdatePayload};
use crate::error::{AppError, AppResult};
use crate::identity::{Actor, AuthDecision, AuthorizationEngine};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDetailView {
    pub property: PropertyRecord,
    /// Whether to offer an "Edit" button. Reading is never restricted.
    pub can_edit_affordance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyEditView {
    pub property: PropertyRecord,
    pub reference: ReferenceData,
    pub decision: AuthDecision,
}

fn denied(decision: &AuthDecision) -> AppError {
    AppError::permission("edit_forbidden", decision.message().unwrap_or(crate::identity::EDIT_DENIED_MESSAGE))
}

fn edit_decision(engine: &AuthorizationEngine, actor: Option<&Actor>, property: &PropertyRecord) -> AuthDecision {
    let decision = engine.can_edit_opt(actor, property);
    if !decision.allowed() {
        warn!(
            target: "auth",
            actor = actor.map(|a| a.id.as_str()).unwrap_or("-"),
            property = property.id().as_deref().unwrap_or("-"),
            "edit denied"
        );
    }
    decision
}

/// Publicly readable detail page.
pub async fn load_property_detail<B: PropertyApi>(
    api: &B,
    engine: &AuthorizationEngine,
    actor: Option<&Actor>,
    id: &str,
    token: Option<&str>,
) -> AppResult<PropertyDetailView> {
    let property = api.get_property_by_id(id, token).await?;
    let can_edit_affordance = actor.map(|a| engine.can_view(a, &property)).unwrap_or(false);
    Ok(PropertyDetailView { property, can_edit_affordance })
}

/// Edit page: the record and all three reference lists are fetched together
/// and the page is ready only when all four have arrived. The first failure
/// is the page's single error. The edit decision is made after the record
/// is known, never before.
pub async fn load_property_edit<B: PropertyApi>(
    api: &B,
    engine: &AuthorizationEngine,
    actor: Option<&Actor>,
    id: &str,
    token: Option<&str>,
) -> AppResult<PropertyEditView> {
    let (property, property_types, parishes, amenities) = tokio::try_join!(
        api.get_property_by_id(id, token),
        api.get_property_types(),
        api.get_parishes(),
        api.get_amenities(),
    )?;
    let decision = edit_decision(engine, actor, &property);
    if !decision.allowed() {
        return Err(denied(&decision));
    }
    Ok(PropertyEditView { property, reference: ReferenceData { property_types, parishes, amenities }, decision })
}

/// Save an edit. The current record is fetched and authorized again before the update is sent.
pub async fn save_property_edit<B: PropertyApi>(
    api: &B,
    engine: &AuthorizationEngine,
    actor: Option<&Actor>,
    id: &str,
    payload: &UpdatePayload,
    token: Option<&str>,
) -> AppResult<PropertyRecord> {
    payload.validate()?;
    let current = api.get_property_by_id(id, token).await?;
    let decision = edit_decision(engine, actor, &current);
    if !decision.allowed() {
        return Err(denied(&decision));
    }
    let updated = api.update_property(id, payload, token).await?;
    info!(target: "views", property = %id, reason = ?decision.reason(), "property saved");
    Ok(updated)
}
