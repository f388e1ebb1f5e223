//! Video record persistence.
//!
//! This crate provides:
//! - The `VideoRepository` seam used by the worker and the enqueue dispatcher
//! - A Redis implementation with Lua-scripted atomic status transitions
//! - An in-memory implementation for tests and local runs

pub mod error;
pub mod memory;
pub mod redis_repo;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryVideoRepository;
pub use redis_repo::RedisVideoRepository;
pub use repository::VideoRepository;
