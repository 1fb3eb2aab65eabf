//! A [`RemoteDispatch`] double for tests and for crates (like `gs-runtime`)
//! that need a working [`crate::PersistenceCache`] without a real RPC layer.

use std::sync::Arc;

use gs_tsid::Tsid;

use crate::{RemoteCallError, RemoteDispatch};

/// Always fails with [`RemoteCallError::Transport`]. Fine for exercising
/// single-GS scenarios where no call should ever actually cross a GS
/// boundary; a test that expects a remote call to succeed needs a real
/// `gs-rpc` dispatcher instead.
#[derive(Debug, Default)]
pub struct NoopRemote;

#[async_trait::async_trait]
impl RemoteDispatch for NoopRemote {
    async fn call(
        &self,
        _owner_gsid: &str,
        tsid: Tsid,
        method: &str,
        _args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteCallError> {
        Err(RemoteCallError::Transport {
            tsid,
            method: method.to_string(),
            message: "no remote dispatcher configured".to_string(),
        })
    }
}

pub fn noop_remote() -> Arc<dyn RemoteDispatch> {
    Arc::new(NoopRemote)
}
