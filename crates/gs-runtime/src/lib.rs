//! The cooperative scheduling core (spec components 3 and 4): the request
//! context each unit of work runs inside, and the per-entity request queue
//! that serializes access to a top-level entity.

pub mod context;
pub mod queue;
pub mod registry;

pub use context::{run, run_nested, HandlerFn, HandlerResult, RequestContext, RunHandle};
pub use queue::{DoneCallback, EntryHandle, PushOptions, QueueClosed, RequestQueue};
pub use registry::{QueueId, QueueRegistry};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use gs_cluster::{ClusterMap, GsConf};
    use gs_persistence::PersistenceCache;
    use gs_storage::memory::MemoryDriver;
    use gs_tsid::Tsid;

    use super::*;

    fn persistence() -> Arc<PersistenceCache> {
        let mut confs = std::collections::HashMap::new();
        confs.insert("gs-00".to_string(), GsConf { host: "h".into(), port: 1, rpc_port: 2 });
        let cluster = Arc::new(ClusterMap::new(confs, "gs-00".into()).unwrap());
        Arc::new(PersistenceCache::new(
            Arc::new(MemoryDriver::new()),
            cluster,
            gs_persistence::testing::noop_remote(),
        ))
    }

    fn boxed(
        f: impl FnOnce(Arc<RequestContext>) -> futures::future::BoxFuture<'static, HandlerResult>
            + Send
            + 'static,
    ) -> HandlerFn {
        Box::new(f)
    }

    #[tokio::test]
    async fn queue_runs_entries_in_order() {
        let pers = persistence();
        let queue = RequestQueue::new("Pabc", "Pabc", pers);

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            let (tx, rx) = tokio::sync::oneshot::channel();
            queue
                .push(
                    format!("req{i}"),
                    None,
                    boxed(move |_ctx| {
                        Box::pin(async move {
                            order.lock().unwrap().push(i);
                            Ok(serde_json::json!(i))
                        })
                    }),
                    Some(Box::new(move |res| {
                        let _ = tx.send(res);
                    })),
                    PushOptions::default(),
                )
                .unwrap();
            rx.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_handler_does_not_persist_added_entity() {
        let pers = persistence();
        let queue = RequestQueue::new("Labc", "Labc", pers.clone());
        let tsid = Tsid::parse("Iabc").unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        queue
            .push(
                "create_then_fail",
                None,
                boxed(move |ctx| {
                    Box::pin(async move {
                        ctx.persistence().create(tsid, "item", serde_json::Map::new(), 0, false).await?;
                        anyhow::bail!("boom")
                    })
                }),
                Some(Box::new(move |res| {
                    let _ = tx.send(res);
                })),
                PushOptions::default(),
            )
            .unwrap();

        let result = rx.await.unwrap();
        assert!(result.is_err());
        assert!(!pers.exists(&tsid).await.unwrap());
    }

    #[tokio::test]
    async fn nested_push_executes_inline_without_blocking_queue() {
        let pers = persistence();
        let queue = RequestQueue::new("Pabc", "Pabc", pers);
        let calls = Arc::new(AtomicUsize::new(0));

        let (outer_tx, outer_rx) = tokio::sync::oneshot::channel();
        let queue_for_nested = queue.clone();
        let calls2 = calls.clone();
        queue
            .push(
                "outer",
                None,
                boxed(move |ctx| {
                    let queue_for_nested = queue_for_nested.clone();
                    let calls2 = calls2.clone();
                    Box::pin(async move {
                        let (inner_tx, inner_rx) = tokio::sync::oneshot::channel();
                        let calls3 = calls2.clone();
                        queue_for_nested
                            .push(
                                "outer:inner",
                                None,
                                boxed(move |_ctx| {
                                    let calls3 = calls3.clone();
                                    Box::pin(async move {
                                        calls3.fetch_add(1, Ordering::SeqCst);
                                        Ok(serde_json::json!("inner"))
                                    })
                                }),
                                Some(Box::new(move |res| {
                                    let _ = inner_tx.send(res);
                                })),
                                PushOptions::default(),
                            )
                            .unwrap();
                        let inner_result = inner_rx.await.unwrap();
                        assert!(inner_result.is_ok());
                        calls2.fetch_add(1, Ordering::SeqCst);
                        let _ = ctx;
                        Ok(serde_json::json!("outer"))
                    })
                }),
                Some(Box::new(move |res| {
                    let _ = outer_tx.send(res);
                })),
                PushOptions::default(),
            )
            .unwrap();

        outer_rx.await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
