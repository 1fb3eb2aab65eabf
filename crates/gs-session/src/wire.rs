//! Client wire protocol (spec §6): 4-byte big-endian length prefix, UTF-8
//! JSON payload. Shares the framing approach `gs-rpc::wire` uses for the
//! inter-GS link, sized to the client-configurable `net.maxMsgSize` instead
//! of the fixed RPC ceiling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::codec::LengthDelimitedCodec;

pub fn codec(max_msg_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(max_msg_size)
        .new_codec()
}

/// An inbound client message: `{type, msg_id?, ...extra fields}`. Extra
/// fields are kept as an untyped bag and handed to the script dispatcher
/// unexamined, since the runtime only cares about a handful of `type`s.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub msg_id: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ClientMessage {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "ping")]
    Ping { msg_id: Option<u64>, success: bool, ts: u64 },
    #[serde(rename = "login_start")]
    LoginStart { msg_id: Option<u64>, success: bool, #[serde(skip_serializing_if = "Option::is_none")] error: Option<String> },
    #[serde(rename = "login_end")]
    LoginEnd { msg_id: Option<u64>, success: bool, #[serde(skip_serializing_if = "Option::is_none")] error: Option<String> },
    #[serde(rename = "relogin_start")]
    ReloginStart { msg_id: Option<u64>, success: bool, #[serde(skip_serializing_if = "Option::is_none")] error: Option<String> },
    #[serde(rename = "relogin_end")]
    ReloginEnd { msg_id: Option<u64>, success: bool, #[serde(skip_serializing_if = "Option::is_none")] error: Option<String> },
    #[serde(rename = "server_message")]
    Server { action: ServerAction, #[serde(flatten)] extra: Map<String, Value> },
    #[serde(rename = "pc_logout")]
    PcLogout { pc: PcRef },
    /// Opaque reply to a forwarded script request: whatever the dispatcher
    /// returned, wrapped with the request's `msg_id` for correlation.
    #[serde(rename = "reply")]
    Reply { msg_id: Option<u64>, result: Value },
}

#[derive(Debug, Clone, Serialize)]
pub struct PcRef {
    pub tsid: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerAction {
    Close,
    Token,
    PrepareToReconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parses_extra_fields_into_bag() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"move","msg_id":7,"x":1.5,"y":-2.0}"#).unwrap();
        insta::assert_json_snapshot!(msg.fields);
        assert_eq!(msg.msg_type, "move");
        assert_eq!(msg.msg_id, Some(7));
    }

    #[test]
    fn server_message_wire_shape() {
        insta::assert_json_snapshot!(ServerMessage::Ping { msg_id: Some(3), success: true, ts: 1_700_000_000 });
        insta::assert_json_snapshot!(ServerMessage::LoginEnd { msg_id: Some(4), success: false, error: Some("bad token".into()) });
        insta::assert_json_snapshot!(ServerMessage::Server {
            action: ServerAction::PrepareToReconnect,
            extra: {
                let mut m = Map::new();
                m.insert("host".into(), Value::String("box2-01".into()));
                m
            },
        });
    }
}
