//! Capability interfaces for the systems this workspace treats as external
//! collaborators: the object store the batch files arrive in, the
//! partitioned stream the shard forwarder publishes onto, and the
//! read-only reference-data cache. Production code talks to these through
//! the traits in this crate; tests substitute the `local` implementations
//! instead of monkey-patching a real client.

pub mod log_sink;
pub mod object_store;
pub mod queue;
pub mod retry;

pub use log_sink::{LogSink, StandardLogSink};
pub use object_store::{ObjectKey, ObjectStore, ObjectStoreError};
pub use queue::{PartitionedQueue, QueueError};
pub use retry::RetryPolicy;
