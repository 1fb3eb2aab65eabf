//! Process-wide table of live [`RequestQueue`]s, and the coordinated
//! shutdown spec §4.4 describes: flip every queue to `closing`, kick it
//! once so empty queues exit immediately, then wait for all of them to
//! drain with bounded concurrency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::stream::{self, StreamExt};
use gs_persistence::PersistenceCache;
use gs_tsid::Tsid;

use crate::queue::RequestQueue;

/// How many queues are flushed concurrently during shutdown. Matches the
/// persistence cache's own shutdown fan-out (spec §4.2).
const SHUTDOWN_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum QueueId {
    Entity(Tsid),
    Named(&'static str),
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueId::Entity(tsid) => write!(f, "{tsid}"),
            QueueId::Named(name) => write!(f, "{name}"),
        }
    }
}

pub struct QueueRegistry {
    persistence: Arc<PersistenceCache>,
    queues: StdMutex<HashMap<QueueId, Arc<RequestQueue>>>,
    shutting_down: AtomicBool,
}

impl QueueRegistry {
    pub fn new(persistence: Arc<PersistenceCache>) -> Arc<QueueRegistry> {
        Arc::new(QueueRegistry { persistence, queues: StdMutex::new(HashMap::new()), shutting_down: AtomicBool::new(false) })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The queue for `id`, creating it on first use.
    pub fn get_or_create(&self, id: QueueId) -> Arc<RequestQueue> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(id)
            .or_insert_with(|| RequestQueue::new(id.to_string(), id.to_string(), self.persistence.clone()))
            .clone()
    }

    pub fn get(&self, id: QueueId) -> Option<Arc<RequestQueue>> {
        self.queues.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: QueueId) {
        self.queues.lock().unwrap().remove(&id);
    }

    /// Drain every registered queue (spec §4.4 shutdown): set the global
    /// flag, close every queue, then wait for all of them with bounded
    /// concurrency.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let queues: Vec<Arc<RequestQueue>> = self.queues.lock().unwrap().values().cloned().collect();
        tracing::info!(count = queues.len(), "draining request queues for shutdown");

        // Flip every queue's `closing` flag synchronously, up front, before
        // awaiting anything — otherwise a queue not yet reached by the
        // bounded fan-out below would keep accepting pushes for as long as
        // the queues ahead of it in the concurrency window take to drain.
        let dones: Vec<_> = queues.iter().map(|queue| queue.shutdown()).collect();

        stream::iter(dones)
            .buffer_unordered(SHUTDOWN_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
    }
}
