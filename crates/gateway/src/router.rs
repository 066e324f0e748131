//! Classifies inbound frames and drives the correlation lifecycle.
//!
//! The router never holds the table lock across an await. Work that has to
//! wait (continuations, the artifact settle delay) runs on spawned tasks.

use mjlink_core::{Config, Error};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::continuation::ContinuationFlow;
use crate::correlation::CorrelationTable;
use crate::frame::{
    DeletedMessage, GatewayMessage, InboundEvent, InteractionAck, COLOR_ERROR, COLOR_WARNING,
};
use crate::parse::{
    content_to_progress, content_to_prompt, format_info, format_options, format_prompts,
    uri_to_hash,
};
use crate::types::{
    channels, GatewayEvent, MjDescribe, MjMessage, MjSettings, MjShorten, ProgressSnapshot,
    ProtocolError, ReadyUser,
};

const ACKNOWLEDGE_TITLES: [&str; 2] = ["Action needed to continue", "Pending mod message"];
const DUPLICATE_TITLE: &str = "Duplicate images detected";

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub channel_id: String,
    pub bot_id: String,
    pub artifact_settle: Duration,
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel_id: config.discord.channel_id.clone(),
            bot_id: config.discord.bot_id.clone(),
            artifact_settle: config.gateway.artifact_settle(),
        }
    }
}

pub struct MessageRouter {
    settings: RouterSettings,
    table: Arc<Mutex<CorrelationTable>>,
    bus: Arc<EventBus<GatewayEvent>>,
    flow: Arc<ContinuationFlow>,
    user: Mutex<Option<ReadyUser>>,
    remix: AtomicBool,
}

impl MessageRouter {
    pub fn new(
        settings: RouterSettings,
        table: Arc<Mutex<CorrelationTable>>,
        bus: Arc<EventBus<GatewayEvent>>,
        flow: Arc<ContinuationFlow>,
        remix: bool,
    ) -> Self {
        Self {
            settings,
            table,
            bus,
            flow,
            user: Mutex::new(None),
            remix: AtomicBool::new(remix),
        }
    }

    pub fn remix_enabled(&self) -> bool {
        self.remix.load(Ordering::SeqCst)
    }

    pub fn user(&self) -> Option<ReadyUser> {
        self.user.lock().clone()
    }

    /// Forget the ready user; the next connection has to identify again.
    pub fn clear_user(&self) {
        if self.user.lock().take().is_some() {
            debug!("Cleared ready user");
        }
    }

    pub fn route(self: &Arc<Self>, event: InboundEvent) {
        match event {
            InboundEvent::Ready(user) => {
                info!(user_id = %user.id, "Gateway ready");
                *self.user.lock() = Some(user.clone());
                self.bus.emit(channels::READY, &GatewayEvent::Ready(user));
            }
            InboundEvent::MessageCreate(msg) => {
                if self.in_scope(&msg) {
                    debug!(message_id = %msg.id, "Message created");
                    self.message_create(msg);
                }
            }
            InboundEvent::MessageUpdate(msg) => {
                if self.in_scope(&msg) {
                    debug!(message_id = %msg.id, "Message updated");
                    self.message_update(msg);
                }
            }
            InboundEvent::MessageDelete(deleted) => self.message_delete(deleted),
            InboundEvent::InteractionCreate(ack) => {
                debug!(nonce = ?ack.nonce, interaction_id = %ack.id, "Interaction created");
            }
            InboundEvent::InteractionSuccess(ack) => self.interaction_success(ack),
        }
    }

    fn in_scope(&self, msg: &GatewayMessage) -> bool {
        if msg.channel_id != self.settings.channel_id {
            return false;
        }
        if msg.author.as_ref().map(|a| a.id.as_str()) != Some(self.settings.bot_id.as_str()) {
            return false;
        }
        match msg.interaction.as_ref().and_then(|i| i.user.as_ref()) {
            Some(invoker) => {
                let user = self.user.lock();
                user.as_ref().map(|u| u.id.as_str()) == Some(invoker.id.as_str())
            }
            None => true,
        }
    }

    fn message_create(self: &Arc<Self>, msg: GatewayMessage) {
        if let Some(token) = msg.token().map(str::to_string) {
            self.table.lock().update_by_token(&token, &msg.id);

            if let Some(embed) = msg.first_embed() {
                let title = embed.title.as_deref().unwrap_or_default();
                let description = embed.description.clone().unwrap_or_default();
                match embed.color {
                    Some(COLOR_ERROR) => {
                        if ACKNOWLEDGE_TITLES.contains(&title) {
                            self.spawn_acknowledge(token, msg);
                        } else {
                            self.reject_token(&token, ProtocolError::BotReported(description));
                        }
                        return;
                    }
                    Some(COLOR_WARNING) => {
                        warn!(token = %token, description = %description, "Bot warning");
                    }
                    _ => {
                        if title.contains("continue") && description.contains("verify you're human") {
                            self.spawn_verify(token, msg);
                            return;
                        }
                        if title.contains("Invalid") {
                            self.reject_token(&token, ProtocolError::BotReported(description));
                            return;
                        }
                    }
                }
            }
        }

        if msg.token().is_none() && !msg.attachments.is_empty() && !msg.components.is_empty() {
            self.finish(msg);
            return;
        }
        self.message_update(msg);
    }

    fn message_update(&self, msg: GatewayMessage) {
        if msg.token().is_none() && self.table.lock().is_source_message(&msg.id) {
            debug!(message_id = %msg.id, "Skipping edit of a command's source message");
            return;
        }
        if msg.token().is_none() {
            match msg.interaction_name() {
                Some("settings") => {
                    let settings = MjSettings {
                        id: msg.id.clone(),
                        flags: msg.flags,
                        content: serde_json::Value::String(msg.content.clone()),
                        options: format_options(&msg.components),
                    };
                    let remix = settings.remix_enabled();
                    self.remix.store(remix, Ordering::SeqCst);
                    debug!(remix, "Settings received");
                    self.bus.emit(channels::SETTINGS, &GatewayEvent::Settings(settings));
                    return;
                }
                Some("describe") => {
                    let embed = msg.first_embed().cloned().unwrap_or_default();
                    let image = embed.image.unwrap_or_default();
                    let describe = MjDescribe {
                        id: msg.id.clone(),
                        flags: msg.flags,
                        descriptions: embed
                            .description
                            .unwrap_or_default()
                            .split("\n\n")
                            .map(str::to_string)
                            .collect(),
                        uri: image.url,
                        proxy_url: image.proxy_url,
                        options: format_options(&msg.components),
                    };
                    self.deliver_by_id(&msg.id, GatewayEvent::Describe(describe));
                    return;
                }
                Some("prefer remix") => {
                    if !msg.content.is_empty() {
                        self.bus
                            .emit(channels::PREFER_REMIX, &GatewayEvent::Content(msg.content));
                    }
                    return;
                }
                Some("shorten") => {
                    let description = msg
                        .first_embed()
                        .and_then(|e| e.description.clone())
                        .unwrap_or_default();
                    let shorten = MjShorten {
                        id: msg.id.clone(),
                        flags: msg.flags,
                        prompts: format_prompts(&description),
                        description,
                        options: format_options(&msg.components),
                    };
                    self.deliver_by_id(&msg.id, GatewayEvent::Shorten(shorten));
                    return;
                }
                Some("info") => {
                    let description = msg
                        .first_embed()
                        .and_then(|e| e.description.clone())
                        .unwrap_or_default();
                    self.bus
                        .emit(channels::INFO, &GatewayEvent::Info(format_info(&description)));
                    return;
                }
                _ => {}
            }
        }

        if let Some(embed) = msg.first_embed() {
            if embed.title.as_deref() == Some(DUPLICATE_TITLE) {
                let description = embed.description.clone().unwrap_or_default();
                self.deliver_by_id(
                    &msg.id,
                    GatewayEvent::Failed(ProtocolError::DuplicateArtifact(description)),
                );
                return;
            }
        }

        if !msg.content.is_empty() {
            self.progress(msg);
        }
    }

    fn progress(&self, msg: GatewayMessage) {
        let token = {
            let mut table = self.table.lock();
            let Some(entry) = table.find_by_message_id(&msg.id) else {
                debug!(message_id = %msg.id, "Progress for unknown message");
                return;
            };
            let token = entry.token.clone();
            table.set_prompt(&token, &msg.content);
            token
        };

        let stage = content_to_progress(&msg.content);
        let message = msg.attachments.first().map(|a| MjMessage {
            id: Some(msg.id.clone()),
            flags: msg.flags,
            content: msg.content.clone(),
            progress: Some(stage.clone()),
            uri: a.url.clone(),
            proxy_url: a.proxy_url.clone(),
            width: a.width,
            height: a.height,
            ..Default::default()
        });
        debug!(token = %token, stage = %stage, "Progress");
        self.bus.emit(
            &token,
            &GatewayEvent::Progress(ProgressSnapshot { stage, message }),
        );
    }

    /// Final artifact: the service never echoes the token here, so the
    /// request is found by its prompt once the settle delay has passed.
    fn finish(self: &Arc<Self>, msg: GatewayMessage) {
        let Some(attachment) = msg.attachments.first() else {
            return;
        };
        let artifact = MjMessage {
            id: Some(msg.id.clone()),
            flags: msg.flags,
            content: msg.content.clone(),
            hash: Some(uri_to_hash(&attachment.url)),
            progress: Some("done".to_string()),
            uri: attachment.url.clone(),
            proxy_url: attachment.proxy_url.clone(),
            options: format_options(&msg.components),
            width: attachment.width,
            height: attachment.height,
        };

        let router = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(router.settings.artifact_settle).await;
            let key = content_to_prompt(&artifact.content);
            let token = router.table.lock().match_prompt(&key).map(|e| e.token.clone());
            match token {
                Some(token) => {
                    info!(token = %token, uri = %artifact.uri, "Artifact ready");
                    router.bus.emit(&token, &GatewayEvent::Artifact(artifact));
                }
                None => {
                    warn!(error = %Error::CorrelationNotFound(key), "Dropping artifact");
                }
            }
        });
    }

    fn message_delete(&self, deleted: DeletedMessage) {
        if deleted.channel_id != self.settings.channel_id {
            return;
        }
        let marked = self.table.lock().tombstone_by_message_id(&deleted.id);
        if marked > 0 {
            debug!(message_id = %deleted.id, marked, "Interim message deleted");
        }
    }

    fn interaction_success(self: &Arc<Self>, ack: InteractionAck) {
        let Some(token) = ack.nonce.clone() else {
            return;
        };
        let handler = self
            .table
            .lock()
            .get(&token)
            .and_then(|e| e.continuation.clone());
        let Some(handler) = handler else {
            return;
        };

        let flow = self.flow.clone();
        tokio::spawn(async move {
            match handler.on_success(&token, &ack.id).await {
                Some(new_token) if !new_token.is_empty() => flow.relink(&new_token, &token),
                _ => debug!(token = %token, "No continuation"),
            }
        });
    }

    fn spawn_acknowledge(&self, token: String, msg: GatewayMessage) {
        let flow = self.flow.clone();
        tokio::spawn(async move {
            match flow.acknowledge(&token, &msg).await {
                Ok(new_token) => info!(token = %token, new_token = %new_token, "Acknowledged prompt"),
                Err(e) => warn!(token = %token, error = %e, "Acknowledgement failed"),
            }
        });
    }

    fn spawn_verify(&self, token: String, msg: GatewayMessage) {
        let flow = self.flow.clone();
        tokio::spawn(async move {
            match flow.verify(&token, &msg).await {
                Ok(new_token) => info!(token = %token, new_token = %new_token, "Verification answered"),
                Err(Error::VerificationUnavailable(missing)) => {
                    info!(token = %token, missing, "Skipping verification challenge")
                }
                Err(e) => warn!(token = %token, error = %e, "Verification failed"),
            }
        });
    }

    fn reject_token(&self, token: &str, error: ProtocolError) {
        warn!(token, error = ?error, "Request rejected by bot");
        if self.bus.emit(token, &GatewayEvent::Failed(error)) == 0 {
            warn!(error = %Error::CorrelationNotFound(token.to_string()), "Nobody waiting");
        }
    }

    fn deliver_by_id(&self, message_id: &str, event: GatewayEvent) {
        let token = self
            .table
            .lock()
            .find_by_message_id(message_id)
            .map(|e| e.token.clone());
        match token {
            Some(token) => {
                self.bus.emit(&token, &event);
            }
            None => warn!(
                error = %Error::CorrelationNotFound(message_id.to_string()),
                "Dropping frame"
            ),
        }
    }
}
