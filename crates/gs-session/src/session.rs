//! One session per client connection (spec §4.6): login state machine,
//! outbound buffering rules, and the inbound pipeline that turns a decoded
//! frame into a queue push.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use gs_auth::AuthBackend;
use gs_cluster::ClusterMap;
use gs_persistence::Handle;
use gs_runtime::{DoneCallback, HandlerFn, HandlerResult, PushOptions, QueueId, QueueRegistry, RequestContext};
use gs_tsid::Tsid;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::ScriptDispatcher;
use crate::wire::{ClientMessage, PcRef, ServerAction, ServerMessage};

const PRELOGIN_QUEUE: &str = "_PRELOGIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    New,
    Authenticating,
    LoggedIn,
    Disconnected,
}

struct State {
    login_state: LoginState,
    pc: Option<Tsid>,
    logged_in: bool,
    is_moving_gs: bool,
    pre_login_buffer: Vec<ServerMessage>,
    msg_cache: Vec<ServerMessage>,
}

/// Errors that destroy the socket outright (spec §7 "low-level network/
/// decoding errors reach the session's domain error handler"). Oversized
/// frames are rejected by the codec itself, one layer below this.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed message payload")]
    Decode(#[from] serde_json::Error),
}

pub struct Session {
    pub id: u64,
    pub opened_at: SystemTime,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    socket_alive: AtomicBool,
    state: StdMutex<State>,
    next_tag: AtomicU64,
    stop: CancellationToken,

    registry: Arc<QueueRegistry>,
    cluster: Arc<ClusterMap>,
    auth: Arc<dyn AuthBackend>,
    dispatcher: Arc<dyn ScriptDispatcher>,
}

impl Session {
    pub fn new(
        id: u64,
        registry: Arc<QueueRegistry>,
        cluster: Arc<ClusterMap>,
        auth: Arc<dyn AuthBackend>,
        dispatcher: Arc<dyn ScriptDispatcher>,
        stop: CancellationToken,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id,
            opened_at: SystemTime::now(),
            outbound: tx,
            socket_alive: AtomicBool::new(true),
            state: StdMutex::new(State {
                login_state: LoginState::New,
                pc: None,
                logged_in: false,
                is_moving_gs: false,
                pre_login_buffer: Vec::new(),
                msg_cache: Vec::new(),
            }),
            next_tag: AtomicU64::new(0),
            stop,
            registry,
            cluster,
            auth,
            dispatcher,
        });
        (session, rx)
    }

    pub fn pc(&self) -> Option<Tsid> {
        self.state.lock().unwrap().pc
    }

    pub fn login_state(&self) -> LoginState {
        self.state.lock().unwrap().login_state
    }

    pub fn mark_socket_dead(&self) {
        self.socket_alive.store(false, Ordering::SeqCst);
    }

    pub fn is_socket_alive(&self) -> bool {
        self.socket_alive.load(Ordering::SeqCst)
    }

    /// "Any error during script dispatch sends a CLOSE server message to
    /// the player ... and destroys the socket" (spec §4.6/§7). Sends before
    /// marking the socket dead, since `send` drops anything queued once
    /// `socket_alive` is false. Cancelling `stop` unblocks the connection's
    /// `select!` loop in `pump.rs` immediately rather than waiting for the
    /// next read to fail.
    fn close_on_handler_error(&self, err: &anyhow::Error) {
        tracing::warn!(session = self.id, error = %err, "closing socket after handler error");
        self.send(ServerMessage::Server {
            action: ServerAction::Close,
            extra: serde_json::Map::from_iter([("reason".to_string(), serde_json::json!("HANDLER_ERROR"))]),
        });
        self.mark_socket_dead();
        self.stop.cancel();
    }

    /// Completion callback shared by every queue push whose errors must
    /// destroy the socket rather than merely propagate to the caller (spec
    /// §4.6/§7 "any error during script dispatch").
    fn close_on_error_callback(self: &Arc<Self>) -> DoneCallback {
        let this = self.clone();
        Box::new(move |result: HandlerResult| {
            if let Err(err) = result {
                this.close_on_handler_error(&err);
            }
        })
    }

    /// Erases `Self` to the opaque handle `RequestContext::session` carries,
    /// for response routing without `gs-runtime` depending on this crate.
    fn as_any(self: &Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self.clone()
    }

    fn next_tag_str(&self, prefix: &str) -> String {
        let n = self.next_tag.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}:{n}")
    }

    fn is_always_sent(msg: &ServerMessage) -> bool {
        matches!(
            msg,
            ServerMessage::Ping { .. }
                | ServerMessage::LoginStart { .. }
                | ServerMessage::LoginEnd { .. }
                | ServerMessage::ReloginStart { .. }
                | ServerMessage::ReloginEnd { .. }
        )
    }

    /// `send(msg)` (spec §4.6 outbound rules).
    pub fn send(&self, msg: ServerMessage) {
        let mut state = self.state.lock().unwrap();

        if state.is_moving_gs {
            state.msg_cache.push(msg);
            return;
        }
        if !self.socket_alive.load(Ordering::SeqCst) {
            return;
        }

        let flips_logged_in = matches!(msg, ServerMessage::LoginEnd { .. } | ServerMessage::ReloginEnd { .. });

        if !state.logged_in && !Self::is_always_sent(&msg) {
            state.pre_login_buffer.push(msg);
            return;
        }

        if flips_logged_in {
            state.logged_in = true;
        }

        let _ = self.outbound.send(msg);
    }

    /// `flushPreLoginBuffer` (spec §4.6), run after `login_end`/`relogin_end`.
    fn flush_pre_login_buffer(&self) {
        let drained: Vec<ServerMessage> = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.pre_login_buffer)
        };
        for msg in drained {
            let _ = self.outbound.send(msg);
        }
    }

    fn flush_msg_cache(&self) {
        let drained: Vec<ServerMessage> = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.msg_cache)
        };
        for msg in drained {
            self.send(msg);
        }
    }

    fn queue_for(self: &Arc<Self>) -> (QueueId, String) {
        match self.pc() {
            Some(pc) => (QueueId::Entity(pc), pc.as_str().to_string()),
            None => (QueueId::Named(PRELOGIN_QUEUE), PRELOGIN_QUEUE.to_string()),
        }
    }

    /// Decode one frame and push it onto the right queue (spec §4.6 inbound
    /// pipeline). `ping` short-circuits with no queue entry at all.
    pub async fn handle_frame(self: &Arc<Self>, raw: &[u8]) -> Result<(), SessionError> {
        let msg: ClientMessage = serde_json::from_slice(raw)?;

        if msg.msg_type == "ping" {
            let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            self.send(ServerMessage::Ping { msg_id: msg.msg_id, success: true, ts });
            return Ok(());
        }

        match msg.msg_type.as_str() {
            "login_start" | "relogin_start" => self.push_login(msg),
            "login_end" | "relogin_end" => self.push_login_end(msg),
            "logout" => self.push_logout(msg),
            "signpost_move_end" | "follow_move_end" | "door_move_end" | "teleport_move_end" => {
                self.push_move_end(msg)
            }
            _ => self.push_opaque(msg),
        }

        Ok(())
    }

    fn push_login(self: &Arc<Self>, msg: ClientMessage) {
        let is_relogin = msg.msg_type == "relogin_start";
        let token = msg.str_field("token").unwrap_or_default().to_string();
        let this = self.clone();
        let (_, tag) = self.queue_for();
        let queue = self.registry.get_or_create(QueueId::Named(PRELOGIN_QUEUE));

        let func: HandlerFn = handler(move |ctx| {
            let this = this.clone();
            Box::pin(async move {
                let result = this.authenticate_and_attach(&ctx, &token, is_relogin).await;
                Ok(result.unwrap_or_else(|e| serde_json::json!({"error": e.to_string()})))
            })
        });

        let _ = queue.push(self.next_tag_str(&tag), Some(self.as_any()), func, None, PushOptions::default());
    }

    async fn authenticate_and_attach(
        self: &Arc<Self>,
        ctx: &Arc<RequestContext>,
        token: &str,
        is_relogin: bool,
    ) -> anyhow::Result<serde_json::Value> {
        let pc = match self.auth.authenticate(token).await {
            Ok(pc) => pc,
            Err(err) => {
                self.reply_login_ack(is_relogin, false, Some(err.to_string()));
                anyhow::bail!(err);
            }
        };

        if !self.cluster.is_local(&pc) {
            self.reply_login_ack(is_relogin, false, Some("not owned by this server".into()));
            self.mark_socket_dead();
            anyhow::bail!("player {pc} not owned by this gs");
        }

        {
            let mut state = self.state.lock().unwrap();
            state.pc = Some(pc);
            state.login_state = LoginState::Authenticating;
        }

        self.dispatcher.on_login_start(ctx.clone(), pc).await?;
        self.reply_login_ack(is_relogin, true, None);
        Ok(serde_json::json!({"pc": pc.as_str()}))
    }

    fn reply_login_ack(&self, is_relogin: bool, success: bool, error: Option<String>) {
        let msg = match is_relogin {
            true => ServerMessage::ReloginStart { msg_id: None, success, error },
            false => ServerMessage::LoginStart { msg_id: None, success, error },
        };
        self.send(msg);
    }

    fn push_login_end(self: &Arc<Self>, msg: ClientMessage) {
        let Some(pc) = self.pc() else { return };
        let is_relogin = msg.msg_type == "relogin_end";
        let this = self.clone();
        let queue = self.registry.get_or_create(QueueId::Entity(pc));

        let func: HandlerFn = handler(move |ctx| {
            let this = this.clone();
            Box::pin(async move {
                this.dispatcher.on_login(ctx.clone(), pc, is_relogin).await?;
                this.state.lock().unwrap().login_state = LoginState::LoggedIn;
                let msg = match is_relogin {
                    true => ServerMessage::ReloginEnd { msg_id: None, success: true, error: None },
                    false => ServerMessage::LoginEnd { msg_id: None, success: true, error: None },
                };
                this.send(msg);
                this.flush_pre_login_buffer();
                this.flush_msg_cache();
                Ok(serde_json::json!(null))
            })
        });

        let tag = pc.as_str().to_string();
        let _ = queue.push(self.next_tag_str(&tag), Some(self.as_any()), func, None, PushOptions { close: false, wait_pers: false });
    }

    fn push_logout(self: &Arc<Self>, _msg: ClientMessage) {
        self.queue_disconnect_cleanup();
    }

    /// `onDisconnect` cleanup (spec §4.6): broadcast `pc_logout`, unload the
    /// player, mark the socket dead. Runs for an explicit `logout` message
    /// and, identically, for a socket that just closed or errored out from
    /// under an attached player (spec §4.6 "socket close with still-attached
    /// pc") — either way the rest of the world needs to see the player leave.
    pub fn queue_disconnect_cleanup(self: &Arc<Self>) {
        let Some(pc) = self.pc() else {
            self.mark_socket_dead();
            return;
        };
        let this = self.clone();
        let queue = self.registry.get_or_create(QueueId::Entity(pc));

        let func: HandlerFn = handler(move |ctx| {
            let this = this.clone();
            Box::pin(async move {
                this.dispatcher.on_disconnect(ctx.clone(), pc).await?;
                if let Handle::Local(obj) = ctx.get(pc).await? {
                    this.send(ServerMessage::PcLogout { pc: PcRef { tsid: pc.as_str().to_string(), label: obj.lock().await.class_tag.clone() } });
                    ctx.set_unload(pc, obj).await;
                }
                this.state.lock().unwrap().login_state = LoginState::Disconnected;
                this.mark_socket_dead();
                Ok(serde_json::json!(null))
            })
        });

        let tag = pc.as_str().to_string();
        let _ = queue.push(self.next_tag_str(&tag), Some(self.as_any()), func, None, PushOptions::default());
    }

    /// Move-end family housekeeping (spec §4.6: "location entry housekeeping")
    /// is itself script-driven, so the runtime's part is identical to
    /// forwarding any other opaque message — `dispatch` is what performs it.
    fn push_move_end(self: &Arc<Self>, msg: ClientMessage) {
        let Some(pc) = self.pc() else { return };
        let this = self.clone();
        let queue = self.registry.get_or_create(QueueId::Entity(pc));
        let msg_id = msg.msg_id;

        let func: HandlerFn = handler(move |ctx| {
            let this = this.clone();
            let msg = msg.clone();
            Box::pin(async move {
                let result = this.dispatcher.dispatch(ctx.clone(), pc, &msg).await?;
                this.send(ServerMessage::Reply { msg_id, result: result.clone() });
                Ok(result)
            })
        });

        let tag = pc.as_str().to_string();
        let callback = self.close_on_error_callback();
        let _ = queue.push(self.next_tag_str(&tag), Some(self.as_any()), func, Some(callback), PushOptions::default());
    }

    fn push_opaque(self: &Arc<Self>, msg: ClientMessage) {
        let Some(pc) = self.pc() else { return };
        let this = self.clone();
        let queue = self.registry.get_or_create(QueueId::Entity(pc));
        let msg_id = msg.msg_id;

        let func: HandlerFn = handler(move |ctx| {
            let this = this.clone();
            let msg = msg.clone();
            Box::pin(async move {
                let result = this.dispatcher.dispatch(ctx.clone(), pc, &msg).await?;
                this.send(ServerMessage::Reply { msg_id, result: result.clone() });
                Ok(result)
            })
        });

        let tag = pc.as_str().to_string();
        let callback = self.close_on_error_callback();
        let _ = queue.push(self.next_tag_str(&tag), Some(self.as_any()), func, Some(callback), PushOptions::default());
    }

    /// `gsMoveCheck(newLocTsid)` (spec §4.6 inter-GS hand-off).
    pub fn gs_move_check(self: &Arc<Self>, new_loc: Tsid) {
        let Some(pc) = self.pc() else { return };
        if self.cluster.is_local(&new_loc) {
            return;
        }
        let owner = self.cluster.owner(&new_loc).to_string();
        let Some(conf) = self.cluster.gs_conf(&owner).cloned() else { return };

        self.state.lock().unwrap().is_moving_gs = true;

        let this = self.clone();
        let queue = self.registry.get_or_create(QueueId::Entity(pc));
        let hostport = conf.host_port();

        let func: HandlerFn = handler(move |ctx| {
            let this = this.clone();
            let hostport = hostport.clone();
            Box::pin(async move {
                let token = this.auth.get_token(pc).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
                this.send(ServerMessage::Server {
                    action: ServerAction::PrepareToReconnect,
                    extra: serde_json::Map::from_iter([
                        ("hostport".to_string(), serde_json::json!(hostport)),
                        ("token".to_string(), serde_json::json!(token)),
                    ]),
                });

                let this2 = this.clone();
                ctx.set_post_pers_callback(move || {
                    this2.send(ServerMessage::Server {
                        action: ServerAction::Close,
                        extra: serde_json::Map::from_iter([(
                            "reason".to_string(),
                            serde_json::json!("CONNECT_TO_ANOTHER_SERVER"),
                        )]),
                    });
                    this2.mark_socket_dead();
                });

                if let Handle::Local(obj) = ctx.get(pc).await? {
                    ctx.set_unload(pc, obj).await;
                }
                Ok(serde_json::json!(null))
            })
        });

        let tag = pc.as_str().to_string();
        let _ = queue.push(self.next_tag_str(&tag), Some(self.as_any()), func, None, PushOptions { close: false, wait_pers: true });
    }

    /// Token refresh loop (spec §4.6): while connected, resend a token at
    /// ~90% of its lifetime. Runs for the lifetime of the session task.
    pub async fn run_token_refresh(self: Arc<Self>) {
        let lifespan = self.auth.get_token_lifespan();
        let interval = lifespan.mul_f64(0.9);
        if interval.is_zero() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !self.socket_alive.load(Ordering::SeqCst) {
                return;
            }
            let Some(pc) = self.pc() else { continue };
            if let Ok(token) = self.auth.get_token(pc).await {
                self.send(ServerMessage::Server {
                    action: ServerAction::Token,
                    extra: serde_json::Map::from_iter([("token".to_string(), serde_json::json!(token))]),
                });
            }
        }
    }
}

fn handler<F>(f: F) -> HandlerFn
where
    F: FnOnce(Arc<RequestContext>) -> BoxFuture<'static, HandlerResult> + Send + 'static,
{
    Box::new(f)
}
