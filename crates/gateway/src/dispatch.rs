//! Outbound interactions (button clicks and modal submissions) sent over HTTP.

use async_trait::async_trait;
use mjlink_core::config::DiscordConfig;
use mjlink_core::{Error, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Status returned by the service when an interaction is accepted and its
/// result will arrive over the gateway.
pub const ACCEPTED: u16 = 204;

#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Click `custom_id` on `message_id`, tagging the interaction with
    /// `nonce`. Returns the HTTP status.
    async fn dispatch(&self, message_id: &str, custom_id: &str, flags: u64, nonce: &str) -> Result<u16>;

    /// Submit a modal with a single text input. Returns the HTTP status.
    async fn submit_modal(&self, modal: &ModalSubmit) -> Result<u16>;
}

/// Follow-up prompt typed into a modal the bot opened.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalSubmit {
    /// Interaction that opened the modal.
    pub interaction_id: String,
    pub custom_id: String,
    pub input_id: String,
    pub value: String,
    pub nonce: String,
}

#[derive(Debug, Serialize)]
struct ComponentData<'a> {
    component_type: u8,
    custom_id: &'a str,
}

#[derive(Debug, Serialize)]
struct InteractionPayload<'a> {
    #[serde(rename = "type")]
    kind: u8,
    nonce: &'a str,
    guild_id: &'a str,
    channel_id: &'a str,
    message_flags: u64,
    message_id: &'a str,
    application_id: &'a str,
    session_id: &'a str,
    data: ComponentData<'a>,
}

#[derive(Debug, Serialize)]
struct TextInput<'a> {
    #[serde(rename = "type")]
    kind: u8,
    custom_id: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct ActionRow<'a> {
    #[serde(rename = "type")]
    kind: u8,
    components: [TextInput<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ModalData<'a> {
    id: &'a str,
    custom_id: &'a str,
    components: [ActionRow<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ModalPayload<'a> {
    #[serde(rename = "type")]
    kind: u8,
    nonce: &'a str,
    guild_id: &'a str,
    channel_id: &'a str,
    application_id: &'a str,
    session_id: &'a str,
    data: ModalData<'a>,
}

impl<'a> ModalPayload<'a> {
    fn new(config: &'a DiscordConfig, modal: &'a ModalSubmit) -> Self {
        Self {
            kind: 5,
            nonce: &modal.nonce,
            guild_id: &config.server_id,
            channel_id: &config.channel_id,
            application_id: &config.bot_id,
            session_id: &config.session_id,
            data: ModalData {
                id: &modal.interaction_id,
                custom_id: &modal.custom_id,
                components: [ActionRow {
                    kind: 1,
                    components: [TextInput {
                        kind: 4,
                        custom_id: &modal.input_id,
                        value: &modal.value,
                    }],
                }],
            },
        }
    }
}

pub struct HttpDispatcher {
    client: Client,
    config: DiscordConfig,
}

impl HttpDispatcher {
    pub fn new(config: DiscordConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Dispatch(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/interactions", self.config.api_base_url.trim_end_matches('/'))
    }

    async fn post<T: Serialize + Sync>(&self, payload: &T) -> Result<(u16, String)> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", &self.config.salai_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Dispatch(format!("Interaction request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = if status == ACCEPTED {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        Ok((status, body))
    }
}

#[async_trait]
impl CommandDispatcher for HttpDispatcher {
    async fn dispatch(&self, message_id: &str, custom_id: &str, flags: u64, nonce: &str) -> Result<u16> {
        let payload = InteractionPayload {
            kind: 3,
            nonce,
            guild_id: &self.config.server_id,
            channel_id: &self.config.channel_id,
            message_flags: flags,
            message_id,
            application_id: &self.config.bot_id,
            session_id: &self.config.session_id,
            data: ComponentData {
                component_type: 2,
                custom_id,
            },
        };

        let (status, body) = self.post(&payload).await?;
        if status == ACCEPTED {
            debug!(message_id, custom_id, nonce, "Interaction accepted");
        } else {
            warn!(message_id, custom_id, status, body = %body, "Interaction not accepted");
        }
        Ok(status)
    }

    async fn submit_modal(&self, modal: &ModalSubmit) -> Result<u16> {
        let (status, body) = self.post(&ModalPayload::new(&self.config, modal)).await?;
        if status == ACCEPTED {
            debug!(custom_id = %modal.custom_id, nonce = %modal.nonce, "Modal accepted");
        } else {
            warn!(custom_id = %modal.custom_id, status, body = %body, "Modal not accepted");
        }
        Ok(status)
    }
}
