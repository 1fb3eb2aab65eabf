//! Bridges an inbound RPC call (spec §4.5: `channel = "obj"`, invoke a
//! method on the object whose TSID is `args[0]`) into the same request
//! queue a locally-originated call would use, so it's serialized exactly
//! like one (spec §5). Method bodies are opaque content-script territory
//! (spec §1); `RpcMethodHandler` is the seam, mirroring `gs-session`'s
//! `ScriptDispatcher`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use gs_runtime::{HandlerFn, HandlerResult, PushOptions, QueueId, QueueRegistry, RequestContext};
use gs_rpc::{LocalDispatch, WireError};
use gs_tsid::Tsid;
use serde_json::Value;
use tokio::sync::oneshot;

#[async_trait]
pub trait RpcMethodHandler: Send + Sync {
    async fn invoke(&self, ctx: Arc<RequestContext>, tsid: Tsid, method: &str, args: Vec<Value>) -> anyhow::Result<Value>;
}

/// No-op handler used when no content-script layer is wired in: every call
/// loads the target entity (confirming it exists) and echoes back an empty
/// result.
pub struct NoopMethodHandler;

#[async_trait]
impl RpcMethodHandler for NoopMethodHandler {
    async fn invoke(&self, ctx: Arc<RequestContext>, tsid: Tsid, _method: &str, _args: Vec<Value>) -> anyhow::Result<Value> {
        ctx.get(tsid).await?;
        Ok(Value::Null)
    }
}

pub struct QueueDispatch {
    registry: Arc<QueueRegistry>,
    handler: Arc<dyn RpcMethodHandler>,
}

impl QueueDispatch {
    pub fn new(registry: Arc<QueueRegistry>, handler: Arc<dyn RpcMethodHandler>) -> Arc<QueueDispatch> {
        Arc::new(QueueDispatch { registry, handler })
    }
}

#[async_trait]
impl LocalDispatch for QueueDispatch {
    async fn invoke(&self, tsid: Tsid, method: &str, args: Vec<Value>) -> Result<Value, WireError> {
        let queue = self.registry.get_or_create(QueueId::Entity(tsid));
        let handler = self.handler.clone();
        let method = method.to_string();
        let method_for_reply = method.clone();
        let (ack_tx, ack_rx) = oneshot::channel();

        let func: HandlerFn = handler_fn(move |ctx| {
            Box::pin(async move { handler.invoke(ctx, tsid, &method, args).await })
        });
        let callback: gs_runtime::DoneCallback = Box::new(move |result| {
            let _ = ack_tx.send(result);
        });

        queue
            .push(format!("rpc:{tsid}:{}", uuid::Uuid::new_v4()), None, func, Some(callback), PushOptions::default())
            .map_err(|_| WireError::Remote {
                tsid,
                method: method_for_reply.clone(),
                message: "queue is shutting down".into(),
            })?;

        match ack_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(WireError::Remote { tsid, method: method_for_reply.clone(), message: err.to_string() }),
            Err(_) => Err(WireError::Remote {
                tsid,
                method: method_for_reply,
                message: "handler dropped its reply".into(),
            }),
        }
    }
}

fn handler_fn<F>(f: F) -> HandlerFn
where
    F: FnOnce(Arc<RequestContext>) -> BoxFuture<'static, HandlerResult> + Send + 'static,
{
    Box::new(f)
}
