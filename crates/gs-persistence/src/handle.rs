//! The seam between the persistence cache and the RPC layer (spec §4.5).
//!
//! `gs-persistence` never depends on `gs-rpc`: `load` needs to turn a
//! non-owned TSID into something call-able without knowing how RPCs are
//! actually dialed and framed, so that knowledge is injected as a
//! [`RemoteDispatch`] trait object at construction time. `gs-rpc` implements
//! it; the dependency points the other way.
//!
//! The "current request context" ambient lookup spec §9 calls for (the
//! source's fiber-local variable) is a `tokio::task_local!`, exactly as
//! [`AmbientContext`] below. Handler code itself always receives its
//! `RequestContext` explicitly; only internal plumbing (`create`'s
//! `setDirty`, a resumed load's context-cache lookup) reaches for this.

use std::sync::Arc;

use gs_model::GameObject;
use gs_tsid::Tsid;
use tokio::sync::Mutex as AsyncMutex;

/// A reference to an entity, resolved to either the real local object or a
/// remote call target. Transparent field/method forwarding the way the
/// source's JS proxies do it is not reproduced here — spec §9 notes this is
/// unnecessary in a typed port; callers match on the variant explicitly.
#[derive(Clone)]
pub enum Handle {
    Local(Arc<AsyncMutex<GameObject>>),
    Remote(RemoteRef),
}

impl Handle {
    pub fn as_local(&self) -> Option<&Arc<AsyncMutex<GameObject>>> {
        match self {
            Handle::Local(obj) => Some(obj),
            Handle::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteRef> {
        match self {
            Handle::Remote(r) => Some(r),
            Handle::Local(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct RemoteRef {
    pub tsid: Tsid,
    pub owner_gsid: String,
    dispatch: Arc<dyn RemoteDispatch>,
}

impl RemoteRef {
    pub fn new(tsid: Tsid, owner_gsid: String, dispatch: Arc<dyn RemoteDispatch>) -> Self {
        RemoteRef { tsid, owner_gsid, dispatch }
    }

    pub async fn call(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteCallError> {
        self.dispatch.call(&self.owner_gsid, self.tsid, method, args).await
    }
}

/// Typed RPC failure categories (spec §4.5, §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteCallError {
    #[error("rpc timeout calling {method:?} on {tsid}")]
    Timeout { tsid: Tsid, method: String },
    #[error("transport error calling {method:?} on {tsid}: {message}")]
    Transport { tsid: Tsid, method: String, message: String },
    #[error("{tsid} raised an error handling {method:?}: {message}")]
    Remote { tsid: Tsid, method: String, message: String },
    #[error("redirect loop calling {method:?} on {tsid}; already forwarded once")]
    RedirectLoop { tsid: Tsid, method: String },
}

/// Dispatches a call to whichever GS owns `tsid`. Implemented by `gs-rpc`.
#[async_trait::async_trait]
pub trait RemoteDispatch: Send + Sync {
    async fn call(
        &self,
        owner_gsid: &str,
        tsid: Tsid,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteCallError>;
}

/// What a [`RequestContext`](../../gs_runtime/struct.RequestContext.html)
/// exposes to the persistence cache while it's the ambient context: its
/// local `cache` map, and the hooks `create`/mutation go through to land in
/// `added`/`dirty`.
pub trait AmbientContext: Send + Sync {
    fn cache_get(&self, tsid: &Tsid) -> Option<Handle>;
    fn cache_put(&self, tsid: Tsid, handle: Handle);
    fn mark_added(&self, tsid: Tsid, obj: Arc<AsyncMutex<GameObject>>);
}

tokio::task_local! {
    static CURRENT_CONTEXT: Arc<dyn AmbientContext>;
}

/// The ambient context for the task currently executing, if any. Outside of
/// a request (e.g. a background maintenance task with no request context)
/// this is `None`.
pub fn current_context() -> Option<Arc<dyn AmbientContext>> {
    CURRENT_CONTEXT.try_with(Arc::clone).ok()
}

/// Run `fut` with `ctx` installed as the ambient context for its duration
/// (and that of everything it awaits). Called once by
/// `RequestContext::run`.
pub async fn scope<F>(ctx: Arc<dyn AmbientContext>, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_CONTEXT.scope(ctx, fut).await
}
