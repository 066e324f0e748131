use mjlink_core::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One selectable interactive component (button or menu entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MjOption {
    #[serde(rename = "type")]
    pub kind: u64,
    pub style: u64,
    pub label: String,
    pub custom: String,
}

/// An image-bearing message: either an intermediate render or the final artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MjMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub flags: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<MjOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
}

impl MjMessage {
    pub fn is_done(&self) -> bool {
        self.progress.as_deref() == Some("done")
    }
}

/// Progress forwarded to a waiter; never resolves the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub message: Option<MjMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MjDescribe {
    pub id: String,
    pub flags: u64,
    pub descriptions: Vec<String>,
    pub uri: Option<String>,
    pub proxy_url: Option<String>,
    pub options: Vec<MjOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MjShorten {
    pub id: String,
    pub flags: u64,
    pub description: String,
    pub prompts: Vec<String>,
    pub options: Vec<MjOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MjSettings {
    pub id: String,
    pub flags: u64,
    pub content: serde_json::Value,
    pub options: Vec<MjOption>,
}

impl MjSettings {
    pub fn remix_enabled(&self) -> bool {
        self.options
            .iter()
            .any(|o| o.label == "Remix mode" && o.style == 3)
    }
}

/// Account information parsed from `**Key**: value` lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MjInfo {
    pub fields: BTreeMap<String, String>,
}

impl MjInfo {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
}

/// Errors the service reports about one request. Delivered on that
/// request's channel and converted into [`Error`] by the waiter.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    BotReported(String),
    DuplicateArtifact(String),
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::BotReported(d) => Error::BotReported(d),
            ProtocolError::DuplicateArtifact(d) => Error::DuplicateArtifact(d),
        }
    }
}

/// Everything published on the engine's bus.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Opened { generation: u64 },
    Closed { generation: u64 },
    Ready(ReadyUser),
    Settings(MjSettings),
    Info(MjInfo),
    Content(String),
    Progress(ProgressSnapshot),
    Artifact(MjMessage),
    Describe(MjDescribe),
    Shorten(MjShorten),
    Failed(ProtocolError),
}

impl GatewayEvent {
    /// Whether this event ends the wait on a correlation token.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GatewayEvent::Artifact(_)
                | GatewayEvent::Describe(_)
                | GatewayEvent::Shorten(_)
                | GatewayEvent::Failed(_)
        )
    }
}

/// Well-known bus channels. Correlation tokens are used as channel keys
/// for everything else.
pub mod channels {
    pub const OPENED: &str = "open";
    pub const CLOSED: &str = "closed";
    pub const READY: &str = "ready";
    pub const SETTINGS: &str = "settings";
    pub const INFO: &str = "info";
    pub const PREFER_REMIX: &str = "prefer-remix";
}
