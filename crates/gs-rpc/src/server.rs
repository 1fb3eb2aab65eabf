//! Listening side: accept inter-GS connections, dispatch calls into the
//! local runtime, and forward calls for entities this process no longer
//! owns (spec §4.5 "Request forwarding"). Connection handling mirrors the
//! accept loop and framing used for the client-facing session listener.

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gs_cluster::ClusterMap;
use gs_tsid::Tsid;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::client::Router;
use crate::wire::{self, CallFrame, Channel, Envelope, ReplyFrame, WireError};

/// Invokes a method on a locally-owned entity. Implemented by `gs-runtime`,
/// which routes through the entity's request queue so an inbound RPC is
/// serialized exactly like a locally-originated call (spec §5).
#[async_trait::async_trait]
pub trait LocalDispatch: Send + Sync {
    async fn invoke(
        &self,
        tsid: Tsid,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, WireError>;
}

/// Invokes a named static API (spec §4.5 `channel = "gs"`), reached only
/// through `redir_wrap` — never a TSID method call, but still subject to
/// the same local/forward/redirect-loop rule. `forwarded` tells the handler
/// whether it is itself already running as the result of one forward hop,
/// so a handler that calls `redir_wrap` again can refuse a second one.
#[async_trait::async_trait]
pub trait GsDispatch: Send + Sync {
    async fn invoke(
        &self,
        tsid: Tsid,
        method: &str,
        args: Vec<serde_json::Value>,
        forwarded: bool,
    ) -> Result<serde_json::Value, WireError>;
}

/// Used where no named static API is wired in: every call fails as unknown
/// rather than silently succeeding, since (unlike `obj` calls) there is no
/// sensible default behavior for an API name nobody registered.
pub struct NoopGsDispatch;

#[async_trait::async_trait]
impl GsDispatch for NoopGsDispatch {
    async fn invoke(&self, tsid: Tsid, method: &str, _args: Vec<serde_json::Value>, _forwarded: bool) -> Result<serde_json::Value, WireError> {
        Err(WireError::Remote { tsid, method: method.to_string(), message: "no gs api handler registered".to_string() })
    }
}

pub struct RpcServer {
    cluster: Arc<ClusterMap>,
    dispatch: Arc<dyn LocalDispatch>,
    gs_dispatch: Arc<dyn GsDispatch>,
    router: Router,
    connection_limit: Arc<Semaphore>,
}

impl RpcServer {
    pub fn new(
        cluster: Arc<ClusterMap>,
        dispatch: Arc<dyn LocalDispatch>,
        gs_dispatch: Arc<dyn GsDispatch>,
        router: Router,
        max_connections: usize,
    ) -> Self {
        RpcServer { cluster, dispatch, gs_dispatch, router, connection_limit: Arc::new(Semaphore::new(max_connections)) }
    }

    /// Accept connections until `stop` is cancelled.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, stop: CancellationToken) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((socket, addr)) = accepted else { continue };
                    let _ = socket.set_nodelay(true);
                    let this = self.clone();
                    let conn_stop = stop.child_token();
                    tokio::spawn(async move {
                        if let Err(err) = this.serve_conn(socket, conn_stop).await {
                            tracing::debug!(%addr, error = %err, "rpc connection closed");
                        }
                    });
                }
                _ = stop.cancelled() => break,
            }
        }
    }

    async fn serve_conn(
        self: Arc<Self>,
        socket: TcpStream,
        stop: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let permit = match self.connection_limit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                metrics::counter!("gs_rpc_rejected_connections").increment(1);
                return Ok(());
            }
        };

        let (r, w) = socket.into_split();
        let mut reader = FramedRead::new(r, wire::codec());
        let mut writer = FramedWrite::new(w, wire::codec());
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyFrame>();

        let writer_task = tokio::spawn(async move {
            while let Some(reply) = reply_rx.recv().await {
                let Ok(bytes) = serde_json::to_vec(&Envelope::Reply(reply)) else { continue };
                if writer.send(Bytes::from(bytes)).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                frame = reader.next() => {
                    let Some(frame) = frame else { break };
                    let frame = frame?;
                    let envelope: Envelope = match serde_json::from_slice(&frame) {
                        Ok(e) => e,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to decode inbound rpc frame");
                            continue;
                        }
                    };
                    let Envelope::Call(call) = envelope else { continue };

                    let this = self.clone();
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        let id = call.id;
                        let result = this.handle_call(call).await;
                        let _ = reply_tx.send(ReplyFrame { id, result });
                    });
                }
                _ = stop.cancelled() => break,
            }
        }

        drop(reply_tx);
        let _ = writer_task.await;
        drop(permit);
        Ok(())
    }

    async fn handle_call(&self, call: CallFrame) -> Result<serde_json::Value, WireError> {
        let CallFrame { channel, tsid, method, args, forwarded, .. } = call;

        if self.cluster.is_local(&tsid) {
            return match channel {
                Channel::Obj => self.dispatch.invoke(tsid, &method, args).await,
                Channel::Gs => self.gs_dispatch.invoke(tsid, &method, args, forwarded).await,
            };
        }

        if forwarded {
            return Err(WireError::RedirectLoop { tsid, method });
        }

        let owner = self.cluster.owner(&tsid).to_string();
        tracing::debug!(%tsid, owner, %method, "forwarding rpc call to true owner");
        self.router.call(&owner, channel, tsid, &method, args, true).await.map_err(remote_to_wire_error)
    }
}

/// Maps the dialing side's [`gs_persistence::RemoteCallError`] onto the
/// [`WireError`] a handler sees, whether the forward happened inside
/// [`RpcServer::handle_call`] or inside [`redir_wrap`].
fn remote_to_wire_error(err: gs_persistence::RemoteCallError) -> WireError {
    match err {
        gs_persistence::RemoteCallError::Remote { tsid, method, message } => WireError::Remote { tsid, method, message },
        gs_persistence::RemoteCallError::RedirectLoop { tsid, method } => WireError::RedirectLoop { tsid, method },
        gs_persistence::RemoteCallError::Timeout { tsid, method } => {
            WireError::Remote { tsid, method, message: "timed out while forwarding".to_string() }
        }
        gs_persistence::RemoteCallError::Transport { tsid, method, message } => {
            WireError::Remote { tsid, method, message: format!("transport error while forwarding: {message}") }
        }
    }
}

/// `redirWrap` (spec §4.5): call `handler` directly if `tsid` is local,
/// otherwise forward it to `tsid`'s owner over the `gs` channel. A call that
/// arrives already `forwarded` and still isn't local fails loudly with
/// [`WireError::RedirectLoop`] instead of hopping a second time.
///
/// `handler` only runs for the local case; the remote case never touches it
/// at all, since the owning GS will run its own copy of `handler` (or the
/// registered [`GsDispatch`]) when the forwarded call lands there.
pub async fn redir_wrap<F, Fut>(
    cluster: &ClusterMap,
    router: &Router,
    tsid: Tsid,
    method: &str,
    args: Vec<serde_json::Value>,
    forwarded: bool,
    handler: F,
) -> Result<serde_json::Value, WireError>
where
    F: FnOnce(Vec<serde_json::Value>) -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, WireError>>,
{
    if cluster.is_local(&tsid) {
        return handler(args).await;
    }

    if forwarded {
        return Err(WireError::RedirectLoop { tsid, method: method.to_string() });
    }

    let owner = cluster.owner(&tsid).to_string();
    tracing::debug!(%tsid, owner, method, "redir_wrap forwarding to true owner");
    router.call(&owner, Channel::Gs, tsid, method, args, true).await.map_err(remote_to_wire_error)
}
