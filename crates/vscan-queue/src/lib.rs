//! Work queue for vscan workers.
//!
//! This crate provides:
//! - The `MessageQueue` seam the worker consumes through
//! - A Redis Streams implementation with visibility-timeout redelivery
//! - An in-memory implementation for tests and local runs

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_stream;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use queue::{MessageQueue, ReceivedMessage};
pub use redis_stream::{QueueConfig, RedisStreamQueue};
