//! Standard handler library
//!
//! Collection of built-in service task handlers for common operations

mod debug;
mod http;
mod time;
mod transform;

pub use debug::DebugLogHandler;
pub use http::HttpRequestHandler;
pub use time::DelayHandler;
pub use transform::{JsonParseHandler, JsonStringifyHandler};

use procruntime::ServiceTaskRegistry;
use std::sync::Arc;

/// Register all standard handlers with a registry
pub fn register_all(registry: &mut ServiceTaskRegistry) {
    registry.register(DebugLogHandler::NAME, Arc::new(DebugLogHandler));
    registry.register(HttpRequestHandler::NAME, Arc::new(HttpRequestHandler::new()));
    registry.register(JsonParseHandler::NAME, Arc::new(JsonParseHandler));
    registry.register(JsonStringifyHandler::NAME, Arc::new(JsonStringifyHandler));
    registry.register(DelayHandler::NAME, Arc::new(DelayHandler));
}

/// A registry holding every standard handler
pub fn standard_registry() -> ServiceTaskRegistry {
    let mut registry = ServiceTaskRegistry::new();
    register_all(&mut registry);
    registry
}
