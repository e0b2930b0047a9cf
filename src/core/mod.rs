// Concurrent machinery: reclamation, snapshots, queues, pooling, workers

pub mod hazard;
pub mod message_pool;
pub mod rcu_list;
pub mod ring_queue;
pub mod string_storage;
pub mod worker_pool;

/// Cache-aligned wrapper to prevent false sharing
#[repr(align(64))]
pub(crate) struct CacheAligned<T>(pub T);
