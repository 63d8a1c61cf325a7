use crate::api::LLMApiProvider; // Import trait
use crate::registry::{ConversationRegistry, SharedRegistry};
use crate::upload::{RetryPolicy, UploadOrchestrator};
use std::sync::Arc;

// Core application state accessible by commands
#[derive(Clone)] // Allow cloning for background tasks
pub struct AppState {
    // Conversations plus the active session; locked briefly per operation
    pub registry: SharedRegistry,
    pub api_provider: Arc<dyn LLMApiProvider>, // Hold the trait object
    pub uploads: UploadOrchestrator,
}

impl AppState {
    pub fn new(
        registry: ConversationRegistry,
        api_provider: Arc<dyn LLMApiProvider>,
        retry: RetryPolicy,
    ) -> Self {
        let registry = registry.shared();
        let uploads = UploadOrchestrator::new(registry.clone(), api_provider.clone(), retry);
        Self {
            registry,
            api_provider,
            uploads,
        }
    }

    /// Replaces the upload orchestrator, e.g. to inject a different sleeper.
    pub fn with_uploads(mut self, uploads: UploadOrchestrator) -> Self {
        self.uploads = uploads;
        self
    }
}
