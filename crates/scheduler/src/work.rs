//! Task work backed by the correlation engine.

use mjlink_core::{Error, Result};
use mjlink_gateway::actions::ActionKind;
use mjlink_gateway::{CorrelationEngine, ProgressCallback, ProgressSnapshot};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::queue::{task_work, TaskProgress, TaskWork};
use crate::task::TaskKind;

/// Button click on an earlier result, as carried in a submission's `data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub message_id: String,
    pub custom_id: String,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl ActionRequest {
    pub fn from_data(data: &Value) -> Result<Self> {
        serde_json::from_value(data.clone())
            .map_err(|e| Error::TaskExecution(format!("invalid action data: {}", e)))
    }

    /// Task kind implied by the clicked component.
    pub fn kind(&self) -> TaskKind {
        match ActionKind::classify(&self.custom_id) {
            ActionKind::Upscale => TaskKind::Upscale,
            ActionKind::Variation => TaskKind::Variation,
            ActionKind::Reroll => TaskKind::Reroll,
            ActionKind::CustomPan => TaskKind::Pan,
            ActionKind::CustomZoom => TaskKind::ZoomOut,
            ActionKind::Other if self.custom_id.contains("Outpaint") => TaskKind::ZoomOut,
            ActionKind::Other => TaskKind::Imagine,
        }
    }
}

fn progress_message(snapshot: &ProgressSnapshot) -> Value {
    json!({
        "stage": snapshot.stage,
        "uri": snapshot.message.as_ref().map(|m| m.uri.clone()),
    })
}

/// Dispatch `request` and resolve with the final image, reporting progress
/// snapshots to the task.
pub fn action_work(engine: Arc<CorrelationEngine>, request: ActionRequest) -> TaskWork {
    task_work(move |progress: TaskProgress| async move {
        let reporter = progress.clone();
        let on_progress: ProgressCallback =
            Arc::new(move |snapshot: &ProgressSnapshot| reporter.report(progress_message(snapshot)));
        let msg = engine
            .action(
                &request.message_id,
                &request.custom_id,
                request.flags,
                request.prompt.clone(),
                Some(on_progress),
            )
            .await?;
        serde_json::to_value(msg).map_err(Error::from)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RemoteDelivery;
    use crate::queue::{QueueSettings, TaskQueue};
    use crate::task::{TaskStatus, TaskSubmission};
    use async_trait::async_trait;
    use mjlink_core::Config;
    use mjlink_gateway::dispatch::ModalSubmit;
    use mjlink_gateway::transport::Connection;
    use mjlink_gateway::{CommandDispatcher, MjMessage, Transport};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn connect(&self, _url: &str) -> Result<Connection> {
            Err(Error::ConnectionFault("offline".to_string()))
        }
    }

    /// Accepts every click and hands its nonce to the test.
    struct NonceDispatcher(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl CommandDispatcher for NonceDispatcher {
        async fn dispatch(&self, _message_id: &str, _custom_id: &str, _flags: u64, nonce: &str) -> Result<u16> {
            let _ = self.0.send(nonce.to_string());
            Ok(204)
        }

        async fn submit_modal(&self, modal: &ModalSubmit) -> Result<u16> {
            let _ = self.0.send(modal.nonce.clone());
            Ok(204)
        }
    }

    fn frame(tag: &str, mut d: Value) -> String {
        d["channel_id"] = json!("c1");
        d["author"] = json!({"id": "bot"});
        json!({"t": tag, "d": d}).to_string()
    }

    #[test]
    fn test_action_request_from_data() {
        let data = json!({"messageId": "m1", "customId": "MJ::JOB::reroll::0::h::SOLO", "prompt": "a cat"});
        let request = ActionRequest::from_data(&data).unwrap();
        assert_eq!(request.message_id, "m1");
        assert_eq!(request.flags, 0);
        assert_eq!(request.prompt.as_deref(), Some("a cat"));
        assert!(ActionRequest::from_data(&json!({"prompt": "x"})).is_err());
    }

    #[test]
    fn test_kind_from_custom_id() {
        let request = |custom_id: &str| ActionRequest {
            message_id: "m1".to_string(),
            custom_id: custom_id.to_string(),
            flags: 0,
            prompt: None,
        };
        assert_eq!(request("MJ::JOB::upsample::2::h").kind(), TaskKind::Upscale);
        assert_eq!(request("MJ::JOB::pan_up::1::h::SOLO").kind(), TaskKind::Pan);
        assert_eq!(request("MJ::Outpaint::50::1::h::SOLO").kind(), TaskKind::ZoomOut);
        assert_eq!(request("MJ::CustomZoom::h").kind(), TaskKind::ZoomOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_work_reports_progress_and_result() {
        let mut config = Config::default();
        config.discord.salai_token = "secret".to_string();
        config.discord.channel_id = "c1".to_string();
        config.discord.bot_id = "bot".to_string();
        let (nonce_tx, mut nonces) = mpsc::unbounded_channel();
        let engine = Arc::new(CorrelationEngine::new(
            &config,
            Arc::new(Offline),
            Arc::new(NonceDispatcher(nonce_tx)),
            None,
        ));

        let (delivery, mut events) = RemoteDelivery::channel();
        let queue = TaskQueue::new(QueueSettings::default(), delivery);
        let data = json!({"messageId": "src", "customId": "MJ::JOB::upsample::1::h", "prompt": "a cat"});
        let request = ActionRequest::from_data(&data).unwrap();
        let ack = queue.submit_request(
            TaskSubmission {
                id: None,
                user_id: "u1".to_string(),
                kind: request.kind(),
                data,
            },
            action_work(engine.clone(), request),
        );
        assert_eq!(queue.tick(), 1);

        let nonce = nonces.recv().await.unwrap();
        engine.handle_frame(&frame("MESSAGE_CREATE", json!({"id": "m1", "nonce": nonce})));
        engine.handle_frame(&frame(
            "MESSAGE_UPDATE",
            json!({"id": "m1", "content": "**a cat** - <@me> (40%) (fast)",
                   "attachments": [{"url": "p1", "width": 512, "height": 512}]}),
        ));
        engine.handle_frame(&frame(
            "MESSAGE_CREATE",
            json!({
                "id": "m2",
                "content": "**a cat** - Image #1 <@me>",
                "attachments": [{"url": "https://cdn/u_1.png", "width": 1024, "height": 1024}],
                "components": [{"type": 1, "components": [
                    {"type": 2, "style": 2, "label": "Vary", "custom_id": "MJ::JOB::variation::1::h"}
                ]}]
            }),
        ));

        let mut seen = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            let done = event.status.is_terminal();
            seen.push(event);
            if done {
                break;
            }
        }
        assert!(seen.iter().all(|e| e.id == ack.id && e.kind == TaskKind::Upscale));
        assert!(seen
            .iter()
            .any(|e| e.status == TaskStatus::Processing && e.msg == json!({"stage": "40%", "uri": "p1"})));
        let last = seen.last().unwrap();
        assert_eq!(last.status, TaskStatus::Completed);
        assert_eq!(last.msg["uri"], "https://cdn/u_1.png");
        assert_eq!(queue.running(), 0);
    }

    #[test]
    fn test_progress_message() {
        let snapshot = ProgressSnapshot {
            stage: "31%".to_string(),
            message: Some(MjMessage {
                uri: "u1".to_string(),
                ..Default::default()
            }),
        };
        assert_eq!(progress_message(&snapshot), json!({"stage": "31%", "uri": "u1"}));
    }
}
