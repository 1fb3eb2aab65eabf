//! The accept loop and per-connection message pump: binds a listener, and
//! for each client spins up a reader task (decoding frames into
//! [`Session::handle_frame`]) and a writer task (serializing outbound
//! [`ServerMessage`]s back onto the wire), mirroring the split-task pattern
//! `gs-rpc::server` uses for the inter-GS link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use gs_auth::AuthBackend;
use gs_cluster::ClusterMap;
use gs_runtime::QueueRegistry;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::dispatch::ScriptDispatcher;
use crate::session::Session;
use crate::wire::{codec, ServerMessage};

pub struct SessionPump {
    registry: Arc<QueueRegistry>,
    cluster: Arc<ClusterMap>,
    auth: Arc<dyn AuthBackend>,
    dispatcher: Arc<dyn ScriptDispatcher>,
    max_msg_size: usize,
    next_id: AtomicU64,
}

impl SessionPump {
    pub fn new(
        registry: Arc<QueueRegistry>,
        cluster: Arc<ClusterMap>,
        auth: Arc<dyn AuthBackend>,
        dispatcher: Arc<dyn ScriptDispatcher>,
        max_msg_size: usize,
    ) -> Arc<SessionPump> {
        Arc::new(SessionPump { registry, cluster, auth, dispatcher, max_msg_size, next_id: AtomicU64::new(0) })
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener, stop: CancellationToken) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!("session listener shutting down");
                    return;
                }
                accepted = listener.accept() => {
                    let Ok((socket, peer)) = accepted else { continue };
                    let this = self.clone();
                    let conn_stop = stop.child_token();
                    tokio::spawn(async move {
                        tracing::debug!(%peer, "client connected");
                        this.serve_conn(socket, conn_stop).await;
                        tracing::debug!(%peer, "client disconnected");
                    });
                }
            }
        }
    }

    async fn serve_conn(self: Arc<Self>, socket: TcpStream, stop: CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (session, mut outbound_rx) = Session::new(
            id,
            self.registry.clone(),
            self.cluster.clone(),
            self.auth.clone(),
            self.dispatcher.clone(),
            stop.clone(),
        );

        let mut framed = Framed::new(socket, codec(self.max_msg_size));

        let token_refresh = tokio::spawn(session.clone().run_token_refresh());

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            if send_frame(&mut framed, &msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                inbound = framed.next() => {
                    match inbound {
                        Some(Ok(frame)) => {
                            if let Err(err) = session.handle_frame(&frame).await {
                                tracing::warn!(session = id, error = %err, "destroying socket after decode error");
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            tracing::warn!(session = id, error = %err, "socket error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // Whatever broke the loop — clean shutdown, decode error, read error,
        // or the peer just dropping the connection — a still-attached player
        // gets the same cleanup an explicit `logout` would have run (spec
        // §4.6): `onDisconnect`, broadcast `pc_logout`, unload. Idempotent
        // with an explicit logout that already ran, since by then `pc()` is
        // `None` and this degrades to `mark_socket_dead()`.
        session.queue_disconnect_cleanup();
        token_refresh.abort();
    }
}

async fn send_frame(
    framed: &mut Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>,
    msg: &ServerMessage,
) -> Result<(), std::io::Error> {
    let bytes = serde_json::to_vec(msg).expect("ServerMessage always serializes");
    framed.send(bytes.into()).await
}
