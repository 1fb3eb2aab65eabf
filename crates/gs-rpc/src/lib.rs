//! Transparent inter-GS RPC (spec §4.5): a framed TCP transport carrying a
//! small call/reply envelope, pooled per-peer connections on the dialing
//! side, and forwarding on the listening side for entities that have moved
//! since the caller last refreshed its cluster map.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{GsRpcClient, Router, DEFAULT_CALL_TIMEOUT};
pub use server::{redir_wrap, GsDispatch, LocalDispatch, NoopGsDispatch, RpcServer};
pub use wire::{Channel, WireError};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use gs_cluster::{ClusterMap, GsConf};
    use gs_tsid::Tsid;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use super::*;

    struct EchoDispatch;

    #[async_trait::async_trait]
    impl LocalDispatch for EchoDispatch {
        async fn invoke(
            &self,
            tsid: Tsid,
            method: &str,
            args: Vec<serde_json::Value>,
        ) -> Result<serde_json::Value, WireError> {
            if method == "boom" {
                return Err(WireError::Remote { tsid, method: method.to_string(), message: "boom".into() });
            }
            Ok(serde_json::json!({ "tsid": tsid.to_string(), "method": method, "args": args }))
        }
    }

    async fn two_gs_cluster(port_a: u16, port_b: u16) -> (Arc<ClusterMap>, Arc<ClusterMap>) {
        let mut confs = HashMap::new();
        confs.insert("gs-a".to_string(), GsConf { host: "127.0.0.1".into(), port: port_a, rpc_port: port_a });
        confs.insert("gs-b".to_string(), GsConf { host: "127.0.0.1".into(), port: port_b, rpc_port: port_b });

        let a = Arc::new(ClusterMap::new(confs.clone(), "gs-a".into()).unwrap());
        let b = Arc::new(ClusterMap::new(confs, "gs-b".into()).unwrap());
        (a, b)
    }

    #[tokio::test]
    async fn call_round_trips_to_owning_gs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (cluster, _other) = two_gs_cluster(port, port + 1).await;

        let stop = CancellationToken::new();
        let router = Router::new(cluster.clone());
        let server = Arc::new(RpcServer::new(
            cluster.clone(),
            Arc::new(EchoDispatch),
            Arc::new(NoopGsDispatch),
            router.clone(),
            16,
        ));
        let serve_stop = stop.clone();
        tokio::spawn(server.serve(listener, serve_stop));

        let client = GsRpcClient::new(router);
        let tsid = Tsid::parse("Pabc").unwrap();

        let result = gs_persistence::RemoteDispatch::call(&client, "gs-a", tsid, "getName", vec![])
            .await
            .unwrap();
        assert_eq!(result["method"], "getName");

        stop.cancel();
    }

    #[tokio::test]
    async fn remote_error_surfaces_to_caller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (cluster, _other) = two_gs_cluster(port, port + 1).await;

        let stop = CancellationToken::new();
        let router = Router::new(cluster.clone());
        let server = Arc::new(RpcServer::new(
            cluster.clone(),
            Arc::new(EchoDispatch),
            Arc::new(NoopGsDispatch),
            router.clone(),
            16,
        ));
        tokio::spawn(server.serve(listener, stop.clone()));

        let client = GsRpcClient::new(router);
        let tsid = Tsid::parse("Pabc").unwrap();

        let err = gs_persistence::RemoteDispatch::call(&client, "gs-a", tsid, "boom", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, gs_persistence::RemoteCallError::Remote { .. }));

        stop.cancel();
    }
}
