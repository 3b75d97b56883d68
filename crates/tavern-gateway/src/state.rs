use std::sync::Arc;
use std::time::Duration;

use tavern_llm::prelude::{CompletionBackend, ImageGenerator};
use tavern_storage::prelude::{ChatStore, ObjectStore};

use crate::metrics::GatewayMetrics;

/// Everything a request handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub chat: Arc<dyn CompletionBackend>,
    pub images: Arc<ImageGenerator>,
    pub service_secret: Option<String>,
    pub call_timeout: Duration,
    pub history_limit: usize,
    pub metrics: Arc<GatewayMetrics>,
}
