//! The session & message pump (spec component 6): the framed client
//! protocol, the login/logout/inter-GS hand-off state machine, and the glue
//! that turns an inbound frame into a push onto the right request queue.

pub mod dispatch;
pub mod pump;
pub mod session;
pub mod wire;

pub use dispatch::ScriptDispatcher;
pub use pump::SessionPump;
pub use session::{LoginState, Session, SessionError};
pub use wire::{ClientMessage, PcRef, ServerAction, ServerMessage};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use gs_cluster::{ClusterMap, GsConf};
    use gs_persistence::PersistenceCache;
    use gs_runtime::{QueueRegistry, RequestContext};
    use gs_storage::memory::MemoryDriver;
    use gs_tsid::Tsid;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;

    struct EchoDispatcher;

    #[async_trait]
    impl ScriptDispatcher for EchoDispatcher {
        async fn dispatch(
            &self,
            _ctx: Arc<RequestContext>,
            pc: Tsid,
            msg: &ClientMessage,
        ) -> anyhow::Result<Value> {
            Ok(serde_json::json!({"pc": pc.as_str(), "type": msg.msg_type}))
        }
    }

    fn harness() -> (Arc<Session>, mpsc::UnboundedReceiver<ServerMessage>, Arc<gs_auth::HmacAuth>) {
        let mut confs = std::collections::HashMap::new();
        confs.insert("gs-00".to_string(), GsConf { host: "h".into(), port: 1, rpc_port: 2 });
        let cluster = Arc::new(ClusterMap::new(confs, "gs-00".into()).unwrap());
        let persistence = Arc::new(PersistenceCache::new(
            Arc::new(MemoryDriver::new()),
            cluster.clone(),
            gs_persistence::testing::noop_remote(),
        ));
        let registry = QueueRegistry::new(persistence);
        let auth = Arc::new(gs_auth::HmacAuth::new(b"secret", std::time::Duration::from_secs(3600)));
        let (session, rx) = Session::new(
            1,
            registry,
            cluster,
            auth.clone(),
            Arc::new(EchoDispatcher),
            tokio_util::sync::CancellationToken::new(),
        );
        (session, rx, auth)
    }

    #[tokio::test]
    async fn ping_is_answered_before_login() {
        let (session, mut rx, _auth) = harness();
        let frame = serde_json::to_vec(&serde_json::json!({"type": "ping", "msg_id": 7})).unwrap();
        session.handle_frame(&frame).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::Ping { msg_id, success, .. } => {
                assert_eq!(msg_id, Some(7));
                assert!(success);
            }
            other => panic!("expected Ping, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_start_then_end_attaches_player_and_flushes_buffer() {
        let (session, mut rx, auth) = harness();
        let player = Tsid::parse("Pabcdefghijklmn").unwrap();
        let token = auth.get_token(player).await.unwrap();

        let start = serde_json::to_vec(&serde_json::json!({"type": "login_start", "token": token})).unwrap();
        session.handle_frame(&start).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::LoginStart { success, .. } => assert!(success),
            other => panic!("expected LoginStart ack, got {other:?}"),
        }
        assert_eq!(session.pc(), Some(player));

        let end = serde_json::to_vec(&serde_json::json!({"type": "login_end"})).unwrap();
        session.handle_frame(&end).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::LoginEnd { success, .. } => assert!(success),
            other => panic!("expected LoginEnd ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn logout_without_attached_player_closes_cleanly() {
        let (session, _rx, _auth) = harness();
        let logout = serde_json::to_vec(&serde_json::json!({"type": "logout"})).unwrap();
        session.handle_frame(&logout).await.unwrap();
        assert_eq!(session.pc(), None);
        assert!(!session.is_socket_alive());
    }
}
