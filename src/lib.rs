//! TTL and LRU response caching for dispatched calls.

pub mod cache;
pub mod config;
pub mod infra;
