//! Queue reconciliation with the remote service.

mod backoff;
mod dispatcher;
mod scheduler;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use backoff::BackoffPolicy;
pub use dispatcher::{DispatcherConfig, DrainOutcome, DrainReport, SyncDispatcher};
pub use scheduler::{spawn_sync_loop, SyncLoopHandle};
pub use transport::{
    HttpSyncTransport, SyncAck, SyncError, SyncRequest, SyncTransport, UnconfiguredTransport,
    IDEMPOTENCY_HEADER,
};
