//! The envelope carried over the inter-GS wire, and the length-delimited
//! framing both this protocol and the client-facing session protocol share
//! (spec §4.5, §6).

use gs_tsid::Tsid;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

/// 128 MiB, matching the frame ceiling the client-facing protocol uses
/// (spec §6 "Framing"): one cap for both protocols keeps the wire format
/// genuinely shared rather than coincidentally similar.
pub const MAX_FRAME_LEN: usize = 1 << 27;

pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Envelope {
    Call(CallFrame),
    Reply(ReplyFrame),
}

/// Which side of the inter-GS API a [`CallFrame`] invokes (spec §4.5):
/// `Obj` targets a method on the object named by `tsid`, `Gs` targets a
/// named static API (reached only through `redir_wrap`, never dialed
/// directly by a caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Obj,
    Gs,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallFrame {
    pub id: u64,
    pub channel: Channel,
    pub tsid: Tsid,
    pub method: String,
    pub args: Vec<serde_json::Value>,
    /// Set by a GS that is itself forwarding a call it received for an
    /// entity it doesn't own (spec §4.5 "Request forwarding"). A second hop
    /// trips [`WireError::RedirectLoop`] instead of forwarding again.
    pub forwarded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub id: u64,
    pub result: Result<serde_json::Value, WireError>,
}

/// Wire form of [`gs_persistence::RemoteCallError`]'s remote-observable
/// variants. `Timeout` and `Transport` are synthesized locally by the
/// dialing side instead, since those describe the call never reaching the
/// peer at all.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum WireError {
    #[error("{tsid} raised an error handling {method:?}: {message}")]
    Remote { tsid: Tsid, method: String, message: String },
    #[error("redirect loop calling {method:?} on {tsid}")]
    RedirectLoop { tsid: Tsid, method: String },
    #[error("{tsid} is not owned by this gs")]
    NotLocal { tsid: Tsid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_frame_wire_shape() {
        let frame = CallFrame {
            id: 42,
            channel: Channel::Obj,
            tsid: Tsid::parse("Lbox1").unwrap(),
            method: "attack".to_string(),
            args: vec![serde_json::json!({"target": "Obox2"})],
            forwarded: false,
        };
        insta::assert_json_snapshot!(Envelope::Call(frame));
    }

    #[test]
    fn reply_frame_carries_remote_error() {
        let tsid = Tsid::parse("Lbox1").unwrap();
        let reply = ReplyFrame {
            id: 42,
            result: Err(WireError::Remote { tsid, method: "attack".to_string(), message: "target is dead".to_string() }),
        };
        insta::assert_json_snapshot!(Envelope::Reply(reply));
    }
}
