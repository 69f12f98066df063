use std::sync::Arc;

use facegate_core::faces::FaceService;

/// Shared handler state: the one service instance built at startup.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FaceService>,
}

impl AppState {
    pub fn new(service: FaceService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
