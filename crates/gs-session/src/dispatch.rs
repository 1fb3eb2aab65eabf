//! The script dispatcher: the opaque content-script boundary spec.md §1
//! calls "out of scope". The runtime classifies a message, handles the few
//! types it owns directly (ping, login/logout, move-end), and forwards
//! everything else here.

use std::sync::Arc;

use async_trait::async_trait;
use gs_runtime::RequestContext;
use gs_tsid::Tsid;
use serde_json::Value;

use crate::wire::ClientMessage;

/// Implemented by the content-script layer. Every method runs inside the
/// calling `RequestContext`, so `ctx.persistence()`/`ctx.get` are safe to use
/// without re-entering the queue.
#[async_trait]
pub trait ScriptDispatcher: Send + Sync {
    /// An opaque message type the runtime doesn't own directly.
    async fn dispatch(
        &self,
        ctx: Arc<RequestContext>,
        pc: Tsid,
        msg: &ClientMessage,
    ) -> anyhow::Result<Value>;

    /// `onLoginStart` — called once a `login_start`/`relogin_start` token
    /// has been authenticated and the player TSID resolved, before the ack
    /// is sent.
    async fn on_login_start(&self, ctx: Arc<RequestContext>, pc: Tsid) -> anyhow::Result<()> {
        let _ = (ctx, pc);
        Ok(())
    }

    /// `onLogin`/`onRelogin` — called once `login_end`/`relogin_end` has
    /// flipped the session to `LoggedIn`.
    async fn on_login(&self, ctx: Arc<RequestContext>, pc: Tsid, is_relogin: bool) -> anyhow::Result<()> {
        let _ = (ctx, pc, is_relogin);
        Ok(())
    }

    /// `onDisconnect` — called from the queue entry that tears the player
    /// down, before they're unloaded.
    async fn on_disconnect(&self, ctx: Arc<RequestContext>, pc: Tsid) -> anyhow::Result<()> {
        let _ = (ctx, pc);
        Ok(())
    }
}
