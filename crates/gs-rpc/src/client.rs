//! Dialing side: a pooled connection per peer GS, modeled on the connection
//! router pattern used for gazette member dispatch — one lazily-dialed,
//! reused transport per target id, with a lock held only across the dial
//! itself so concurrent callers to an already-ready peer never block on
//! each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use gs_cluster::ClusterMap;
use gs_persistence::{RemoteCallError, RemoteDispatch};
use gs_tsid::Tsid;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::wire::{self, CallFrame, Channel, Envelope, ReplyFrame};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<ReplyFrame>>>>;

struct Conn {
    pending: PendingMap,
    write_tx: mpsc::UnboundedSender<Envelope>,
    next_id: AtomicU64,
}

/// Pool of outbound connections, one per peer GS id.
#[derive(Clone)]
pub struct Router {
    cluster: Arc<ClusterMap>,
    slots: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<Option<Conn>>>>>>,
    call_timeout: Duration,
}

impl Router {
    pub fn new(cluster: Arc<ClusterMap>) -> Self {
        Router { cluster, slots: Default::default(), call_timeout: DEFAULT_CALL_TIMEOUT }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn slot(&self, gsid: &str) -> Arc<AsyncMutex<Option<Conn>>> {
        let mut slots = self.slots.lock().unwrap();
        slots.entry(gsid.to_string()).or_default().clone()
    }

    async fn dial(&self, gsid: &str) -> Result<Conn, std::io::Error> {
        let conf = self.cluster.gs_conf(gsid).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("unknown gs id {gsid:?}"))
        })?;
        let stream = TcpStream::connect(conf.rpc_host_port()).await?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        let mut reader = FramedRead::new(r, wire::codec());
        let mut writer = FramedWrite::new(w, wire::codec());

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = write_rx.recv().await {
                let bytes = match serde_json::to_vec(&envelope) {
                    Ok(b) => b,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode outbound rpc frame");
                        continue;
                    }
                };
                if writer.send(Bytes::from(bytes)).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let gsid_owned = gsid.to_string();
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(err) => {
                        tracing::warn!(gsid = %gsid_owned, error = %err, "rpc connection read failed");
                        break;
                    }
                };
                let envelope: Envelope = match serde_json::from_slice(&frame) {
                    Ok(e) => e,
                    Err(err) => {
                        tracing::warn!(gsid = %gsid_owned, error = %err, "failed to decode rpc frame");
                        continue;
                    }
                };
                if let Envelope::Reply(reply) = envelope {
                    if let Some(tx) = reader_pending.lock().unwrap().remove(&reply.id) {
                        let _ = tx.send(reply);
                    }
                }
            }
            tracing::debug!(gsid = %gsid_owned, "rpc connection reader exiting");
        });

        Ok(Conn { pending, write_tx, next_id: AtomicU64::new(0) })
    }

    /// Dispatch one call to `gsid`, dialing a fresh connection if none is
    /// ready yet.
    pub async fn call(
        &self,
        gsid: &str,
        channel: Channel,
        tsid: Tsid,
        method: &str,
        args: Vec<serde_json::Value>,
        forwarded: bool,
    ) -> Result<serde_json::Value, RemoteCallError> {
        let slot = self.slot(gsid);
        let mut guard = slot.lock().await;

        if guard.is_none() {
            let conn = self.dial(gsid).await.map_err(|err| RemoteCallError::Transport {
                tsid,
                method: method.to_string(),
                message: err.to_string(),
            })?;
            *guard = Some(conn);
        }
        let conn = guard.as_ref().expect("just populated");

        let id = conn.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().unwrap().insert(id, tx);

        if conn
            .write_tx
            .send(Envelope::Call(CallFrame {
                id,
                channel,
                tsid,
                method: method.to_string(),
                args,
                forwarded,
            }))
            .is_err()
        {
            conn.pending.lock().unwrap().remove(&id);
            *guard = None;
            return Err(RemoteCallError::Transport {
                tsid,
                method: method.to_string(),
                message: "rpc connection is closed".to_string(),
            });
        }
        drop(guard);

        let reply = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(RemoteCallError::Transport {
                    tsid,
                    method: method.to_string(),
                    message: "rpc connection closed before reply".to_string(),
                })
            }
            Err(_) => {
                self.slot(gsid).lock().await.as_ref().map(|c| c.pending.lock().unwrap().remove(&id));
                return Err(RemoteCallError::Timeout { tsid, method: method.to_string() });
            }
        };

        reply.result.map_err(|wire_err| match wire_err {
            crate::wire::WireError::Remote { tsid, method, message } => {
                RemoteCallError::Remote { tsid, method, message }
            }
            crate::wire::WireError::RedirectLoop { tsid, method } => {
                RemoteCallError::RedirectLoop { tsid, method }
            }
            crate::wire::WireError::NotLocal { tsid } => RemoteCallError::Transport {
                tsid,
                method: method.to_string(),
                message: "peer does not own this entity".to_string(),
            },
        })
    }
}

/// Adapts [`Router`] to the [`RemoteDispatch`] seam `gs-persistence` calls
/// through, so the persistence cache never needs to know the wire format.
pub struct GsRpcClient {
    router: Router,
}

impl GsRpcClient {
    pub fn new(router: Router) -> Self {
        GsRpcClient { router }
    }
}

#[async_trait::async_trait]
impl RemoteDispatch for GsRpcClient {
    async fn call(
        &self,
        owner_gsid: &str,
        tsid: Tsid,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteCallError> {
        self.router.call(owner_gsid, Channel::Obj, tsid, method, args, false).await
    }
}
