use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::AppError;

/// Mounted flag shared by everything a view started. Once unmounted, results
/// that arrive late are dropped without touching any state.
#[derive(Debug, Clone)]
pub struct ViewScope {
    name: &'static str,
    mounted: Arc<AtomicBool>,
}

impl ViewScope {
    pub fn mount(name: &'static str) -> Self {
        Self { name, mounted: Arc::new(AtomicBool::new(true)) }
    }

    pub fn name(&self) -> &'static str { self.name }

    pub fn is_mounted(&self) -> bool { self.mounted.load(Ordering::SeqCst) }

    pub fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            debug!(target: "views", view = self.name, "unmounted");
        }
    }

    /// Await `fut`; `None` when the view went away while it was pending.
    pub async fn settle<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let out = fut.await;
        if self.is_mounted() {
            Some(out)
        } else {
            debug!(target: "views", view = self.name, "late result discarded");
            None
        }
    }
}

/// What a view shows. `Loading` until every fetch it issued has settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum ViewState<T> {
    Loading,
    Ready(T),
    Failed(AppError),
}

impl<T> ViewState<T> {
    pub fn from_result(r: Result<T, AppError>) -> Self {
        match r {
            Ok(v) => ViewState::Ready(v),
            Err(e) => ViewState::Failed(e),
        }
    }

    /// Retry is offered only for transient failures.
    pub fn can_retry(&self) -> bool {
        matches!(self, ViewState::Failed(e) if e.retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_results_are_dropped_after_unmount() {
        let scope = ViewScope::mount("edit");
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let s2 = scope.clone();
        let pending = tokio::spawn(async move { s2.settle(async { rx.await.unwrap_or(0) }).await });
        scope.unmount();
        tx.send(7).unwrap();
        assert_eq!(pending.await.unwrap(), None);

        let live = ViewScope::mount("detail");
        assert_eq!(live.settle(async { 3 }).await, Some(3));
    }

    #[test]
    fn retry_only_for_network_failures() {
        assert!(ViewState::<()>::Failed(AppError::network("network_error", "down")).can_retry());
        assert!(!ViewState::<()>::Failed(AppError::not_found("not_found", "gone")).can_retry());
        assert!(!ViewState::Ready(1).can_retry());
    }
}
