pub mod dispatcher;
pub mod publisher;
pub mod stream;

pub use dispatcher::{OutboxDispatcher, RetryPolicy};
pub use publisher::{PublisherConfig, PublisherWorker};
pub use stream::{
    MemoryOutboxStream, OutboxError, OutboxRecord, OutboxStream, PendingSummary,
    RedisOutboxStream, StreamEntry,
};
