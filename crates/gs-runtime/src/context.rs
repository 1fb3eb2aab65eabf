//! The request context (spec §4.3): the unit of work a queue entry runs
//! inside, its local object cache, and the dirty/added/unload bookkeeping
//! that drives persistence at the end of a handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::BoxFuture;
use gs_model::GameObject;
use gs_persistence::{AmbientContext, Handle, PersistenceCache, PersistenceError};
use gs_tsid::Tsid;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::queue::RequestQueue;

type ObjArc = Arc<AsyncMutex<GameObject>>;
pub type HandlerResult = anyhow::Result<serde_json::Value>;
pub type HandlerFn = Box<dyn FnOnce(Arc<RequestContext>) -> BoxFuture<'static, HandlerResult> + Send>;

/// One unit of work: a client request, a timer tick, an RPC arrival, or an
/// internal chore. Owns the dirty/added/unload sets that `postRequestProc`
/// consumes at the end of `run`.
pub struct RequestContext {
    /// What kind of work this is, used for logging and as the nested-call
    /// tag prefix (spec §4.4).
    pub logtag: String,
    /// Root TSID this unit of work is scoped to, for logging. Global queues
    /// (`_PRELOGIN`, …) have no single entity, so this is a label instead of
    /// a `Tsid`.
    pub owner: String,
    /// Opaque handle to the originating session, if any, for response
    /// routing. The runtime never inspects it; `gs-session` downcasts it
    /// back to its own session type.
    pub session: Option<Arc<dyn std::any::Any + Send + Sync>>,
    pub rq: Arc<RequestQueue>,

    cache: StdMutex<HashMap<Tsid, Handle>>,
    added: StdMutex<HashMap<Tsid, ObjArc>>,
    dirty: StdMutex<HashMap<Tsid, ObjArc>>,
    unload: StdMutex<HashMap<Tsid, ObjArc>>,
    post_pers_callback: StdMutex<Option<Box<dyn FnOnce() + Send>>>,

    persistence: Arc<PersistenceCache>,
}

impl RequestContext {
    pub fn new(
        logtag: impl Into<String>,
        owner: impl Into<String>,
        session: Option<Arc<dyn std::any::Any + Send + Sync>>,
        rq: Arc<RequestQueue>,
        persistence: Arc<PersistenceCache>,
    ) -> Self {
        RequestContext {
            logtag: logtag.into(),
            owner: owner.into(),
            session,
            rq,
            cache: StdMutex::new(HashMap::new()),
            added: StdMutex::new(HashMap::new()),
            dirty: StdMutex::new(HashMap::new()),
            unload: StdMutex::new(HashMap::new()),
            post_pers_callback: StdMutex::new(None),
            persistence,
        }
    }

    pub fn persistence(&self) -> &Arc<PersistenceCache> {
        &self.persistence
    }

    /// `get(tsid)` through this context's cache first (spec invariant #3):
    /// every `get` within one context returns the same reference, across
    /// however many cooperative suspensions happen in between.
    pub async fn get(&self, tsid: Tsid) -> Result<Handle, PersistenceError> {
        if let Some(handle) = self.cache_get(&tsid) {
            return Ok(handle);
        }
        let handle = self.persistence.get(tsid, false).await?;
        self.cache_put(tsid, handle.clone());
        Ok(handle)
    }

    /// `setDirty(obj, added)` (spec §4.3): an object already in `added`
    /// stays there; otherwise it moves to (or stays in) `dirty`.
    pub fn set_dirty(&self, tsid: Tsid, obj: ObjArc) {
        if self.added.lock().unwrap().contains_key(&tsid) {
            return;
        }
        self.dirty.lock().unwrap().insert(tsid, obj);
    }

    /// `setUnload(obj)` (spec §4.3): stamp `stale` immediately and register
    /// for release once this context's persistence phase runs.
    pub async fn set_unload(&self, tsid: Tsid, obj: ObjArc) {
        obj.lock().await.stale = true;
        self.unload.lock().unwrap().insert(tsid, obj);
    }

    pub fn set_post_pers_callback(&self, cb: impl FnOnce() + Send + 'static) {
        *self.post_pers_callback.lock().unwrap() = Some(Box::new(cb));
    }

    fn take_post_pers_callback(&self) -> Option<Box<dyn FnOnce() + Send>> {
        self.post_pers_callback.lock().unwrap().take()
    }

    fn drain_added(&self) -> HashMap<Tsid, ObjArc> {
        std::mem::take(&mut self.added.lock().unwrap())
    }

    fn drain_dirty(&self) -> HashMap<Tsid, ObjArc> {
        std::mem::take(&mut self.dirty.lock().unwrap())
    }

    fn drain_unload(&self) -> HashMap<Tsid, ObjArc> {
        std::mem::take(&mut self.unload.lock().unwrap())
    }
}

impl AmbientContext for RequestContext {
    fn cache_get(&self, tsid: &Tsid) -> Option<Handle> {
        self.cache.lock().unwrap().get(tsid).cloned()
    }

    fn cache_put(&self, tsid: Tsid, handle: Handle) {
        self.cache.lock().unwrap().insert(tsid, handle);
    }

    fn mark_added(&self, tsid: Tsid, obj: ObjArc) {
        self.added.lock().unwrap().insert(tsid, obj);
    }
}

/// What the queue awaits for each of the two things `run` produces: the
/// value the original caller is waiting on, and the point at which this
/// queue slot is free for the next entry (spec §4.3 step 5, §4.4 `next`).
pub struct RunHandle {
    pub caller: oneshot::Receiver<HandlerResult>,
    pub queue_done: oneshot::Receiver<()>,
}

/// `context.run(func, cb, waitPers)` (spec §4.3), minus `cb`: the caller
/// instead receives a [`RunHandle`] to await however it likes. Only called
/// for queue-popped entries; nested entries use [`run_nested`] instead,
/// since they share the popped entry's context and must not double-flush
/// it — see `DESIGN.md` for why.
pub fn run<F, Fut>(ctx: Arc<RequestContext>, func: F, wait_pers: bool) -> RunHandle
where
    F: FnOnce(Arc<RequestContext>) -> Fut + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let (caller_tx, caller_rx) = oneshot::channel();
    let (queue_tx, queue_rx) = oneshot::channel();

    tokio::spawn(async move {
        let ambient: Arc<dyn AmbientContext> = ctx.clone();
        let result = gs_persistence::scope(ambient, func(ctx.clone())).await;

        match result {
            Err(err) => {
                tracing::warn!(logtag = %ctx.logtag, error = %err, "handler failed; rolling back");
                let added = ctx.drain_added();
                let dirty = ctx.drain_dirty();
                ctx.persistence.post_request_rollback(&added, &dirty);
                let _ = caller_tx.send(Err(err));
            }
            Ok(value) => {
                let added = ctx.drain_added();
                let dirty = ctx.drain_dirty();
                let unload = ctx.drain_unload();

                if wait_pers {
                    let proc_result =
                        ctx.persistence.post_request_proc(added, dirty, unload, &ctx.logtag).await;
                    run_post_pers_callback(&ctx);
                    match proc_result {
                        Ok(()) => {
                            let _ = caller_tx.send(Ok(value));
                        }
                        Err(err) => {
                            let _ = caller_tx.send(Err(err.into()));
                        }
                    }
                } else {
                    let _ = caller_tx.send(Ok(value));
                    if let Err(err) =
                        ctx.persistence.post_request_proc(added, dirty, unload, &ctx.logtag).await
                    {
                        tracing::warn!(logtag = %ctx.logtag, error = %err, "post-request persistence failed");
                    }
                    run_post_pers_callback(&ctx);
                }
            }
        }

        let _ = queue_tx.send(());
    });

    RunHandle { caller: caller_rx, queue_done: queue_rx }
}

fn run_post_pers_callback(ctx: &Arc<RequestContext>) {
    if let Some(cb) = ctx.take_post_pers_callback() {
        cb();
    }
}

/// Run a nested entry (spec §4.4 nested-call rationale, scenario 4) inline,
/// on the same context as the queue entry it was dispatched from — so it
/// observes `ctx.cache` exactly as the outer call left it. Its mutations
/// land in the same `added`/`dirty`/`unload` sets and are flushed once, by
/// the outer call's own `run`.
pub async fn run_nested<F, Fut>(ctx: Arc<RequestContext>, func: F) -> HandlerResult
where
    F: FnOnce(Arc<RequestContext>) -> Fut,
    Fut: Future<Output = HandlerResult>,
{
    let ambient: Arc<dyn AmbientContext> = ctx.clone();
    gs_persistence::scope(ambient, func(ctx)).await
}
