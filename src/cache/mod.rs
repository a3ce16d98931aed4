//! Response cache engine.
//!
//! Wraps an origin operation so that calls with a cacheable verb are served
//! from a per-instance store until their TTL runs out:
//!
//! - **Keys** ([`KeyGenerator`]): `VERB:path:json(input)` by default
//! - **Store** ([`CacheStore`]): in-memory LRU ([`MemoryStore`]) or a JSON
//!   file ([`JsonFileStore`])
//! - **Wrapper** ([`Cached`]): data, timestamps, staleness, refresh and
//!   invalidate for one entry
//!
//! ```no_run
//! use axum::http::Method;
//! use callcache::cache::{CacheConfig, CacheError, CallContext, ResponseCache};
//!
//! # async fn demo() -> Result<(), CacheError> {
//! let cache: ResponseCache<String> = ResponseCache::new(CacheConfig::default());
//! let users = cache.intercept(|id: Option<u32>, _: CallContext| async move {
//!     Ok::<_, CacheError>(format!("user {id:?}"))
//! });
//!
//! let result = users.call(Method::GET, "/users", Some(7)).await?;
//! println!("{}", result.data());
//! # Ok(())
//! # }
//! ```

mod clock;
mod config;
mod engine;
mod entry;
mod error;
mod file_store;
mod intercept;
mod keys;
pub(crate) mod lock;
mod store;
mod wrapper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use engine::{ResponseCache, ResponseCacheBuilder};
pub use entry::{CacheEntry, is_stale};
pub use error::CacheError;
pub use file_store::JsonFileStore;
pub use intercept::{CallContext, Dispatch, Intercepted};
pub use keys::{DefaultKeyGenerator, KEY_DELIMITER, KeyGenerator, input_value};
pub use store::{CacheStore, MemoryStore};
pub use wrapper::Cached;
