use std::sync::Arc;

use crate::prediction::bus::InvalidationBus;
use crate::prediction::store::PredictionStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Single write path for predictions. Also the bus's recalculator.
    pub store: Arc<PredictionStore>,
    pub bus: InvalidationBus,
}
