//! Per-test isolation: a fresh registry bound to the API and the browser

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cleanup::{cleanup_registered_entities, CleanupReport};
use crate::client::ResourceApi;
use crate::factories::{LabelFactory, StatusFactory, TaskFactory, UserFactory};
use crate::playwright::PageController;
use crate::registry::EntityRegistry;

/// Everything a single test needs to create data and tear it down again.
///
/// Factories obtained here register what they create, so [`cleanup`]
/// removes it regardless of how the test ended.
///
/// [`cleanup`]: IsolatedContext::cleanup
#[derive(Clone)]
pub struct IsolatedContext {
    api: Arc<dyn ResourceApi>,
    page: Arc<dyn PageController>,
    registry: Arc<EntityRegistry>,
}

impl IsolatedContext {
    pub fn new(api: Arc<dyn ResourceApi>, page: Arc<dyn PageController>) -> Self {
        Self {
            api,
            page,
            registry: Arc::new(EntityRegistry::new()),
        }
    }

    pub fn api(&self) -> &Arc<dyn ResourceApi> {
        &self.api
    }

    pub fn page(&self) -> &Arc<dyn PageController> {
        &self.page
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn users(&self) -> UserFactory {
        UserFactory::new(self.api.clone()).registering(self.registry.clone())
    }

    pub fn statuses(&self) -> StatusFactory {
        StatusFactory::new(self.api.clone()).registering(self.registry.clone())
    }

    pub fn labels(&self) -> LabelFactory {
        LabelFactory::new(self.api.clone()).registering(self.registry.clone())
    }

    pub fn tasks(&self) -> TaskFactory {
        TaskFactory::new(self.api.clone()).registering(self.registry.clone())
    }

    /// Delete registered entities, then clear cookies and local storage.
    /// Never fails; problems end up in the report and the log.
    pub async fn cleanup(&self) -> CleanupReport {
        let report = cleanup_registered_entities(&self.registry, self.api.as_ref()).await;

        if let Err(e) = self.page.clear_browser_state().await {
            warn!("Failed to clear browser state: {}", e);
        }

        if report.attempted > 0 {
            info!(
                "Cleanup removed {}/{} entities",
                report.deleted(),
                report.attempted
            );
        }
        report
    }
}

/// Run `body` in a fresh context and always clean up afterwards. The body's
/// result is returned untouched; cleanup problems never override it.
pub async fn with_auto_cleanup<T, F, Fut>(
    api: Arc<dyn ResourceApi>,
    page: Arc<dyn PageController>,
    body: F,
) -> (T, CleanupReport)
where
    F: FnOnce(IsolatedContext) -> Fut,
    Fut: Future<Output = T>,
{
    let context = IsolatedContext::new(api, page);
    let outcome = body(context.clone()).await;
    let report = context.cleanup().await;
    (outcome, report)
}
