//! Gateway wire frames.

use mjlink_core::Result;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::types::ReadyUser;

pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;

/// Embed colors used by the bot to flag problems.
pub const COLOR_ERROR: u64 = 16711680;
pub const COLOR_WARNING: u64 = 16776960;

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IdentifyFrame {
    op: u8,
    d: IdentifyData,
}

#[derive(Debug, Serialize)]
struct IdentifyData {
    token: String,
    capabilities: u64,
    properties: IdentifyProperties,
    compress: bool,
}

#[derive(Debug, Serialize)]
struct IdentifyProperties {
    os: String,
    browser: String,
    device: String,
}

impl IdentifyFrame {
    pub fn new(token: &str, capabilities: u64) -> Self {
        Self {
            op: OP_IDENTIFY,
            d: IdentifyData {
                token: token.to_string(),
                capabilities,
                properties: IdentifyProperties {
                    os: "Mac OS X".to_string(),
                    browser: "Chrome".to_string(),
                    device: String::new(),
                },
                compress: false,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HeartbeatFrame {
    op: u8,
    d: u64,
}

impl HeartbeatFrame {
    pub fn new(sequence: u64) -> Self {
        Self {
            op: OP_HEARTBEAT,
            d: sequence,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedImage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<u64>,
    #[serde(default)]
    pub image: Option<EmbedImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub width: Option<u64>,
    #[serde(default)]
    pub height: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Emoji {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Component {
    #[serde(rename = "type", default)]
    pub kind: u64,
    #[serde(default)]
    pub style: Option<u64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub emoji: Option<Emoji>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageInteraction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<Author>,
}

/// Payload of MESSAGE_CREATE / MESSAGE_UPDATE.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub nonce: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub flags: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embeds: Vec<Embed>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub components: Vec<Component>,
    #[serde(default)]
    pub interaction: Option<MessageInteraction>,
}

impl GatewayMessage {
    /// The correlation token, when the service echoed one.
    pub fn token(&self) -> Option<&str> {
        self.nonce.as_deref().filter(|n| !n.is_empty())
    }

    pub fn first_embed(&self) -> Option<&Embed> {
        self.embeds.first()
    }

    pub fn interaction_name(&self) -> Option<&str> {
        self.interaction.as_ref().and_then(|i| i.name.as_deref())
    }

    /// Buttons of the first component row.
    pub fn first_row(&self) -> &[Component] {
        self.components
            .first()
            .map(|row| row.components.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeletedMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
}

/// INTERACTION_CREATE / INTERACTION_SUCCESS payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionAck {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Ready(ReadyUser),
    MessageCreate(GatewayMessage),
    MessageUpdate(GatewayMessage),
    MessageDelete(DeletedMessage),
    InteractionCreate(InteractionAck),
    InteractionSuccess(InteractionAck),
}

/// Parse one text frame. Frames without a dispatch tag, with an unknown tag,
/// or interaction frames without a token yield `Ok(None)`.
pub fn parse_frame(text: &str) -> Result<Option<InboundEvent>> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let (Some(tag), Some(d)) = (raw.t, raw.d) else {
        return Ok(None);
    };

    let event = match tag.as_str() {
        "READY" => {
            let user = d.get("user").cloned().unwrap_or(serde_json::Value::Null);
            InboundEvent::Ready(serde_json::from_value(user)?)
        }
        "MESSAGE_CREATE" => InboundEvent::MessageCreate(serde_json::from_value(d)?),
        "MESSAGE_UPDATE" => InboundEvent::MessageUpdate(serde_json::from_value(d)?),
        "MESSAGE_DELETE" => InboundEvent::MessageDelete(serde_json::from_value(d)?),
        "INTERACTION_CREATE" | "INTERACTION_SUCCESS" => {
            let ack: InteractionAck = serde_json::from_value(d)?;
            if ack.nonce.as_deref().map_or(true, str::is_empty) {
                return Ok(None);
            }
            if tag == "INTERACTION_CREATE" {
                InboundEvent::InteractionCreate(ack)
            } else {
                InboundEvent::InteractionSuccess(ack)
            }
        }
        other => {
            debug!(tag = other, "Ignoring gateway dispatch");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_serialize() {
        let json = serde_json::to_value(IdentifyFrame::new("secret", 8189)).unwrap();
        assert_eq!(json["op"], 2);
        assert_eq!(json["d"]["token"], "secret");
        assert_eq!(json["d"]["capabilities"], 8189);
        assert_eq!(json["d"]["compress"], false);
        assert_eq!(json["d"]["properties"]["browser"], "Chrome");
    }

    #[test]
    fn test_heartbeat_serialize() {
        let json = serde_json::to_string(&HeartbeatFrame::new(3)).unwrap();
        assert_eq!(json, r#"{"op":1,"d":3}"#);
    }

    #[test]
    fn test_parse_message_create() {
        let text = r#"{"op":0,"s":5,"t":"MESSAGE_CREATE","d":{
            "id":"m1","channel_id":"c1","nonce":"abc123","content":null,
            "author":{"id":"bot"},"embeds":[],"attachments":[],"components":null
        }}"#;
        match parse_frame(text).unwrap() {
            Some(InboundEvent::MessageCreate(msg)) => {
                assert_eq!(msg.id, "m1");
                assert_eq!(msg.token(), Some("abc123"));
                assert!(msg.content.is_empty());
                assert!(msg.components.is_empty());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_numeric_nonce_is_accepted() {
        let text = r#"{"t":"MESSAGE_CREATE","d":{"id":"m1","nonce":1234}}"#;
        match parse_frame(text).unwrap() {
            Some(InboundEvent::MessageCreate(msg)) => assert_eq!(msg.token(), Some("1234")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_interaction_without_token_is_ignored() {
        let text = r#"{"t":"INTERACTION_SUCCESS","d":{"id":"i1"}}"#;
        assert!(parse_frame(text).unwrap().is_none());
        let text = r#"{"t":"INTERACTION_SUCCESS","d":{"id":"i1","nonce":"n1"}}"#;
        assert!(matches!(
            parse_frame(text).unwrap(),
            Some(InboundEvent::InteractionSuccess(_))
        ));
    }

    #[test]
    fn test_untagged_and_unknown_frames_are_ignored() {
        assert!(parse_frame(r#"{"op":11,"d":null}"#).unwrap().is_none());
        assert!(parse_frame(r#"{"op":0,"t":"TYPING_START","d":{}}"#).unwrap().is_none());
        assert!(parse_frame("not json").is_err());
    }

    #[test]
    fn test_parse_ready() {
        let text = r#"{"t":"READY","d":{"user":{"id":"u1","global_name":"Me"}}}"#;
        match parse_frame(text).unwrap() {
            Some(InboundEvent::Ready(user)) => {
                assert_eq!(user.id, "u1");
                assert_eq!(user.global_name.as_deref(), Some("Me"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
