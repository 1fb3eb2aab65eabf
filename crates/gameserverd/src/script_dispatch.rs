//! Stand-in `ScriptDispatcher` for a binary with no content-script layer
//! wired in yet. Real deployments replace this with a crate implementing
//! the trait against actual game content (spec §1: scripted content is an
//! external collaborator).

use std::sync::Arc;

use async_trait::async_trait;
use gs_runtime::RequestContext;
use gs_session::{ClientMessage, ScriptDispatcher};
use gs_tsid::Tsid;
use serde_json::Value;

pub struct NoopScriptDispatcher;

#[async_trait]
impl ScriptDispatcher for NoopScriptDispatcher {
    async fn dispatch(&self, _ctx: Arc<RequestContext>, _pc: Tsid, msg: &ClientMessage) -> anyhow::Result<Value> {
        tracing::debug!(msg_type = %msg.msg_type, "no content-script layer wired in; ignoring");
        Ok(Value::Null)
    }
}
