//! Redis-backed delivery queue adapter and worker runtime.

mod limiter;
mod redis_queue;
mod runtime;

pub use limiter::{RateLimiterConfig, TokenBucket};
pub use redis_queue::{JobRecord, RedisDeliveryQueue};
pub use runtime::{QueueRuntime, WorkerPoolConfig};
