//! Bayeux (CometD) messages exchanged with the live game server.
//!
//! Every frame on the wire is a JSON array of message objects. Only the first
//! element of an inbound frame is inspected.

use serde::Serialize;
use serde_json::Value;

pub const HANDSHAKE_CHANNEL: &str = "/meta/handshake";
pub const CONNECT_CHANNEL: &str = "/meta/connect";
pub const CONTROLLER_CHANNEL: &str = "/service/controller";
pub const CONNECTION_TYPE: &str = "websocket";

const JOIN_MESSAGE_ID: u32 = 16;
const JOIN_CONTENT: &str = r#"{"usingNamerator":false}"#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeRequest<'a> {
    id: &'a str,
    version: &'a str,
    minimum_version: &'a str,
    channel: &'a str,
    supported_connection_types: [&'a str; 1],
    advice: Advice,
    ext: Ext,
}

#[derive(Debug, Serialize)]
struct Advice {
    timeout: u64,
    interval: u64,
}

#[derive(Debug, Serialize)]
struct Ext {
    ack: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest<'a> {
    id: &'a str,
    channel: &'a str,
    connection_type: &'a str,
    client_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ControllerRequest<'a> {
    id: &'a str,
    channel: &'a str,
    data: ControllerData<'a>,
    client_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControllerData<'a> {
    Login {
        gameid: String,
        host: &'a str,
        name: &'a str,
        content: &'a str,
    },
    Message {
        gameid: String,
        host: &'a str,
        id: u32,
        content: &'a str,
    },
}

fn frame<T: Serialize>(message: T) -> String {
    // Serializing these plain structs cannot fail.
    serde_json::to_string(&[message]).unwrap_or_default()
}

pub fn handshake_request() -> String {
    frame(HandshakeRequest {
        id: "1",
        version: "1.0",
        minimum_version: "1.0",
        channel: HANDSHAKE_CHANNEL,
        supported_connection_types: [CONNECTION_TYPE],
        advice: Advice { timeout: 60000, interval: 0 },
        ext: Ext { ack: true },
    })
}

pub fn connect_request(client_id: &str) -> String {
    frame(ConnectRequest {
        id: "2",
        channel: CONNECT_CHANNEL,
        connection_type: CONNECTION_TYPE,
        client_id,
    })
}

pub fn login_request(client_id: &str, game_pin: u32, host: &str, name: &str) -> String {
    frame(ControllerRequest {
        id: "3",
        channel: CONTROLLER_CHANNEL,
        data: ControllerData::Login {
            gameid: game_pin.to_string(),
            host,
            name,
            content: "{}",
        },
        client_id,
    })
}

pub fn join_request(client_id: &str, game_pin: u32, host: &str) -> String {
    frame(ControllerRequest {
        id: "4",
        channel: CONTROLLER_CHANNEL,
        data: ControllerData::Message {
            gameid: game_pin.to_string(),
            host,
            id: JOIN_MESSAGE_ID,
            content: JOIN_CONTENT,
        },
        client_id,
    })
}

#[derive(Debug)]
pub enum ReplyError {
    Json(serde_json::Error),
    NotAnArray,
    Empty,
    NotAnObject,
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::Json(e) => write!(f, "reply is not JSON: {}", e),
            ReplyError::NotAnArray => write!(f, "reply is not a message array"),
            ReplyError::Empty => write!(f, "reply array is empty"),
            ReplyError::NotAnObject => write!(f, "first reply element is not an object"),
        }
    }
}

impl std::error::Error for ReplyError {}

/// First message of an inbound frame, validated at the parse boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub channel: Option<String>,
    pub successful: bool,
    pub client_id: Option<String>,
}

impl Reply {
    pub fn parse(text: &str) -> Result<Self, ReplyError> {
        let value: Value = serde_json::from_str(text).map_err(ReplyError::Json)?;
        let first = match value {
            Value::Array(items) => items.into_iter().next().ok_or(ReplyError::Empty)?,
            _ => return Err(ReplyError::NotAnArray),
        };
        let Value::Object(map) = first else {
            return Err(ReplyError::NotAnObject);
        };
        Ok(Reply {
            channel: map.get("channel").and_then(Value::as_str).map(str::to_string),
            successful: map.get("successful").is_some_and(is_truthy),
            client_id: map
                .get("clientId")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        })
    }

    pub fn is_on(&self, channel: &str) -> bool {
        self.channel.as_deref() == Some(channel)
    }
}

/// Loose truthiness, as servers are not consistent about sending real booleans.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn first(frame: &str) -> Value {
        let value: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(1));
        value[0].clone()
    }

    #[test]
    fn handshake_shape() {
        assert_eq!(
            first(&handshake_request()),
            json!({
                "id": "1",
                "version": "1.0",
                "minimumVersion": "1.0",
                "channel": "/meta/handshake",
                "supportedConnectionTypes": ["websocket"],
                "advice": {"timeout": 60000, "interval": 0},
                "ext": {"ack": true}
            })
        );
    }

    #[test]
    fn connect_shape() {
        assert_eq!(
            first(&connect_request("abc")),
            json!({"id": "2", "channel": "/meta/connect", "connectionType": "websocket", "clientId": "abc"})
        );
    }

    #[test]
    fn login_and_join_shapes() {
        assert_eq!(
            first(&login_request("abc", 123456, "kahoot.it", "Triple_Yo_GG")),
            json!({
                "id": "3",
                "channel": "/service/controller",
                "data": {"type": "login", "gameid": "123456", "host": "kahoot.it", "name": "Triple_Yo_GG", "content": "{}"},
                "clientId": "abc"
            })
        );
        assert_eq!(
            first(&join_request("abc", 123456, "kahoot.it")),
            json!({
                "id": "4",
                "channel": "/service/controller",
                "data": {"type": "message", "gameid": "123456", "host": "kahoot.it", "id": 16, "content": "{\"usingNamerator\":false}"},
                "clientId": "abc"
            })
        );
    }

    #[test]
    fn parses_first_element_only() {
        let reply = Reply::parse(
            r#"[{"channel":"/meta/handshake","successful":true,"clientId":"c1"},{"successful":false}]"#,
        )
        .unwrap();
        assert!(reply.successful);
        assert!(reply.is_on(HANDSHAKE_CHANNEL));
        assert_eq!(reply.client_id.as_deref(), Some("c1"));
    }

    #[test]
    fn missing_or_falsy_success_flag() {
        assert!(!Reply::parse(r#"[{"channel":"/meta/connect"}]"#).unwrap().successful);
        assert!(!Reply::parse(r#"[{"successful":false}]"#).unwrap().successful);
        assert!(!Reply::parse(r#"[{"successful":null}]"#).unwrap().successful);
        assert!(!Reply::parse(r#"[{"successful":0}]"#).unwrap().successful);
        assert!(Reply::parse(r#"[{"successful":1}]"#).unwrap().successful);
    }

    #[test]
    fn empty_client_id_counts_as_absent() {
        assert_eq!(Reply::parse(r#"[{"successful":true,"clientId":""}]"#).unwrap().client_id, None);
    }

    #[test]
    fn malformed_frames() {
        assert!(matches!(Reply::parse("not json"), Err(ReplyError::Json(_))));
        assert!(matches!(Reply::parse(r#"{"successful":true}"#), Err(ReplyError::NotAnArray)));
        assert!(matches!(Reply::parse("[]"), Err(ReplyError::Empty)));
        assert!(matches!(Reply::parse("[true]"), Err(ReplyError::NotAnObject)));
    }
}
