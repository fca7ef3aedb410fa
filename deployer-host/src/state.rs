//! Shared application state for the host server.

use std::sync::Arc;

use deployer::dispatch::Dispatcher;
use deployer::io::store::JsonFileStore;
use deployer::manager::EndpointManager;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<EndpointManager<JsonFileStore>>,
    /// Same route table the manager deploys into.
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(manager: EndpointManager<JsonFileStore>) -> Self {
        let dispatcher = manager.dispatcher().clone();
        Self {
            manager: Arc::new(manager),
            dispatcher,
        }
    }
}
