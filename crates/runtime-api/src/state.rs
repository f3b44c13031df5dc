use std::sync::Arc;

use runtime_core::{DeliveryQueue, Runtime, RuntimeConfig};

/// Shared app state, following the teacher's `AppState { db: Arc<Database> }`
/// convention - one struct, cloned cheaply into every route/module state.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub config: Arc<RuntimeConfig>,
}

impl AppState {
    pub fn bus(&self) -> runtime_core::SystemBus {
        self.runtime.bus.clone()
    }

    pub fn delivery_queue(&self) -> Arc<DeliveryQueue> {
        self.runtime.delivery_queue.clone()
    }
}
