//! Recommendation model admin panel. Displays backend statistics and can
//! trigger a retrain; owns no state of its own.

use serde::Serialize;
use tracing::info;

use crate::backend::{ModelAdmin, ModelStats};
use crate::error::{AppError, AppResult};
use crate::identity::{Actor, Role};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MlPanelView {
    pub stats: ModelStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn require_admin(actor: Option<&Actor>) -> AppResult<()> {
    match actor {
        Some(a) if a.role == Role::Admin => Ok(()),
        _ => Err(AppError::permission("admin_only", "Only administrators can manage the recommendation model.")),
    }
}

pub async fn load_ml_panel<B: ModelAdmin>(api: &B, actor: Option<&Actor>, token: Option<&str>) -> AppResult<MlPanelView> {
    require_admin(actor)?;
    let stats = api.get_model_stats(token).await?;
    Ok(MlPanelView { stats, message: None })
}

/// Retrain, then reload the statistics so the panel shows the new training time.
pub async fn retrain_model<B: ModelAdmin>(api: &B, actor: Option<&Actor>, token: Option<&str>) -> AppResult<MlPanelView> {
    require_admin(actor)?;
    if let Err(e) = api.retrain_model(token).await {
        let app: AppError = e.into();
        return Err(match app {
            AppError::Network { .. } | AppError::Permission { .. } => app,
            other => AppError::internal("retrain_failed".to_string(), format!("Failed to retrain model: {}", other.message())),
        });
    }
    info!(target: "views", "model retrain triggered");
    let stats = api.get_model_stats(token).await?;
    Ok(MlPanelView { stats, message: Some("Model retrained successfully".to_string()) })
}
