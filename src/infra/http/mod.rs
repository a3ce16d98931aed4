//! axum adapters: the response-caching middleware and the control routes.

mod control;
mod layer;

pub use control::control_router;
pub use layer::{CacheState, response_cache_layer};
