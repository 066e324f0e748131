//! Two-step exchanges. The bot asks for a click (acknowledgement or human
//! verification) before it will finish a job; the click goes out under a
//! fresh token whose eventual result is forwarded to the original waiter.

use async_trait::async_trait;
use mjlink_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::correlation::{CorrelationTable, PendingRequest};
use crate::actions::{modal_form, ModalForm};
use crate::dispatch::{CommandDispatcher, ModalSubmit, ACCEPTED};
use crate::frame::GatewayMessage;
use crate::parse::{format_options, next_nonce};
use crate::types::GatewayEvent;

/// Invoked when an interaction for the owning token succeeds. Returning a
/// token relinks that token's result to the owner; `None` means no
/// continuation.
#[async_trait]
pub trait ContinuationHandler: Send + Sync {
    async fn on_success(&self, token: &str, interaction_id: &str) -> Option<String>;
}

/// External model that picks one label for a challenge image.
#[async_trait]
pub trait LabelClassifier: Send + Sync {
    async fn classify(&self, credential: &str, image_url: &str, labels: &[String]) -> Result<Option<String>>;
}

/// Answers the modal the bot opens after a custom pan, custom zoom or a
/// variation in remix mode by submitting the follow-up prompt.
pub struct ModalContinuation {
    dispatcher: Arc<dyn CommandDispatcher>,
    form: ModalForm,
    prompt: String,
}

impl ModalContinuation {
    /// `None` when the action opens no modal or there is no prompt to submit.
    pub fn for_action(
        dispatcher: Arc<dyn CommandDispatcher>,
        custom_id: &str,
        prompt: Option<&str>,
        remix: bool,
    ) -> Option<Self> {
        let prompt = prompt.map(str::trim).filter(|p| !p.is_empty())?;
        let form = modal_form(custom_id, remix)?;
        Some(Self {
            dispatcher,
            form,
            prompt: prompt.to_string(),
        })
    }
}

#[async_trait]
impl ContinuationHandler for ModalContinuation {
    async fn on_success(&self, token: &str, interaction_id: &str) -> Option<String> {
        let modal = ModalSubmit {
            interaction_id: interaction_id.to_string(),
            custom_id: self.form.custom_id.clone(),
            input_id: self.form.input_id.to_string(),
            value: self.prompt.clone(),
            nonce: next_nonce(),
        };
        match self.dispatcher.submit_modal(&modal).await {
            Ok(ACCEPTED) => {
                debug!(token, nonce = %modal.nonce, custom_id = %modal.custom_id, "Submitted modal");
                Some(modal.nonce)
            }
            Ok(status) => {
                warn!(token, error = %Error::ContinuationRejected(status), "Modal submission failed");
                None
            }
            Err(e) => {
                warn!(token, error = %e, "Modal submission failed");
                None
            }
        }
    }
}

pub struct ContinuationFlow {
    table: Arc<Mutex<CorrelationTable>>,
    bus: Arc<EventBus<GatewayEvent>>,
    dispatcher: Arc<dyn CommandDispatcher>,
    classifier: Option<Arc<dyn LabelClassifier>>,
    credential: Option<String>,
}

impl ContinuationFlow {
    pub fn new(
        table: Arc<Mutex<CorrelationTable>>,
        bus: Arc<EventBus<GatewayEvent>>,
        dispatcher: Arc<dyn CommandDispatcher>,
        classifier: Option<Arc<dyn LabelClassifier>>,
        credential: Option<String>,
    ) -> Self {
        Self {
            table,
            bus,
            dispatcher,
            classifier,
            credential,
        }
    }

    /// Click the first action of an acknowledgement prompt. Returns the new
    /// token on acceptance.
    pub async fn acknowledge(&self, original: &str, msg: &GatewayMessage) -> Result<String> {
        let custom_id = msg
            .first_row()
            .iter()
            .find_map(|c| c.custom_id.clone())
            .ok_or_else(|| Error::Other("acknowledgement prompt carries no action".to_string()))?;
        self.click(original, msg, &custom_id).await
    }

    /// Solve a human-verification prompt through the label classifier.
    pub async fn verify(&self, original: &str, msg: &GatewayMessage) -> Result<String> {
        let Some(credential) = self.credential.as_deref() else {
            return Err(Error::VerificationUnavailable("no verification credential configured"));
        };
        let Some(classifier) = self.classifier.as_ref() else {
            return Err(Error::VerificationUnavailable("no label classifier configured"));
        };

        let image_url = msg
            .first_embed()
            .and_then(|e| e.image.as_ref())
            .and_then(|i| i.url.clone())
            .ok_or_else(|| Error::Other("verification prompt carries no image".to_string()))?;
        let options = format_options(&msg.components);
        let labels: Vec<String> = options.iter().map(|o| o.label.clone()).collect();

        let chosen = classifier
            .classify(credential, &image_url, &labels)
            .await?
            .ok_or(Error::VerificationInconclusive)?;
        let custom_id = options
            .iter()
            .find(|o| o.label == chosen)
            .map(|o| o.custom.clone())
            .ok_or(Error::VerificationInconclusive)?;

        info!(token = original, label = %chosen, "Answering verification prompt");
        self.click(original, msg, &custom_id).await
    }

    async fn click(&self, original: &str, msg: &GatewayMessage, custom_id: &str) -> Result<String> {
        let nonce = next_nonce();
        let status = self
            .dispatcher
            .dispatch(&msg.id, custom_id, msg.flags, &nonce)
            .await?;
        if status != ACCEPTED {
            return Err(Error::ContinuationRejected(status));
        }
        self.relink(&nonce, original);
        Ok(nonce)
    }

    /// Forward everything published on `new_token` to `original` until a
    /// terminal event passes through.
    pub fn relink(&self, new_token: &str, original: &str) {
        {
            let mut table = self.table.lock();
            let prompt = table.get(original).and_then(|e| e.prompt.clone());
            let mut relay = PendingRequest::new(new_token).with_prompt(prompt);
            relay.origin = Some(original.to_string());
            table.register(relay);
        }

        let bus = Arc::downgrade(&self.bus);
        let target = original.to_string();
        self.bus.on_until(new_token, move |event| {
            let Some(bus) = bus.upgrade() else {
                return true;
            };
            bus.emit(&target, event);
            event.is_terminal()
        });
        debug!(new_token, original, "Relinked continuation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDispatcher;
    use crate::types::MjMessage;

    struct FixedClassifier(Option<&'static str>);

    #[async_trait]
    impl LabelClassifier for FixedClassifier {
        async fn classify(&self, _credential: &str, _image_url: &str, _labels: &[String]) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn flow(
        dispatcher: Arc<ScriptedDispatcher>,
        classifier: Option<Arc<dyn LabelClassifier>>,
        credential: Option<&str>,
    ) -> (ContinuationFlow, Arc<Mutex<CorrelationTable>>, Arc<EventBus<GatewayEvent>>) {
        let table = Arc::new(Mutex::new(CorrelationTable::new()));
        table
            .lock()
            .register(PendingRequest::new("orig").with_prompt(Some("a cat".to_string())));
        let bus = Arc::new(EventBus::new());
        let flow = ContinuationFlow::new(
            table.clone(),
            bus.clone(),
            dispatcher,
            classifier,
            credential.map(str::to_string),
        );
        (flow, table, bus)
    }

    fn ack_prompt() -> GatewayMessage {
        serde_json::from_str(
            r#"{"id":"m9","flags":64,"embeds":[{"title":"Action needed to continue","color":16711680}],
                "components":[{"type":1,"components":[{"type":2,"style":1,"label":"Acknowledged","custom_id":"MJ::Ack::1"}]}]}"#,
        )
        .unwrap()
    }

    fn verify_prompt() -> GatewayMessage {
        serde_json::from_str(
            r#"{"id":"m7","embeds":[{"title":"Click to continue","description":"verify you're human","image":{"url":"https://img/x.png"}}],
                "components":[{"type":1,"components":[
                    {"type":2,"style":2,"label":"Cat","custom_id":"MJ::Verify::cat"},
                    {"type":2,"style":2,"label":"Dog","custom_id":"MJ::Verify::dog"}]}]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rejected_acknowledgement_creates_no_subscription() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[400]);
        let (flow, table, bus) = flow(dispatcher.clone(), None, None);

        let err = flow.acknowledge("orig", &ack_prompt()).await.unwrap_err();
        assert!(matches!(err, Error::ContinuationRejected(400)));

        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].custom_id, "MJ::Ack::1");
        assert_eq!(calls[0].flags, 64);
        assert_eq!(bus.subscriber_count(&calls[0].nonce), 0);
        assert_eq!(table.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_accepted_acknowledgement_forwards_to_original() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[]);
        let (flow, table, bus) = flow(dispatcher, None, None);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        bus.on("orig", move |event: &GatewayEvent| sink.lock().push(event.is_terminal()));

        let new_token = flow.acknowledge("orig", &ack_prompt()).await.unwrap();
        assert_eq!(
            table.lock().get(&new_token).unwrap().prompt.as_deref(),
            Some("a cat")
        );

        bus.emit(&new_token, &GatewayEvent::Content("progress".to_string()));
        bus.emit(&new_token, &GatewayEvent::Artifact(MjMessage::default()));
        assert_eq!(*received.lock(), vec![false, true]);
        // relay ended with the terminal event
        assert_eq!(bus.subscriber_count(&new_token), 0);
    }

    #[tokio::test]
    async fn test_verification_without_credential_is_skipped() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[]);
        let classifier: Arc<dyn LabelClassifier> = Arc::new(FixedClassifier(Some("Cat")));
        let (flow, _table, _bus) = flow(dispatcher.clone(), Some(classifier), None);

        let err = flow.verify("orig", &verify_prompt()).await.unwrap_err();
        assert!(matches!(err, Error::VerificationUnavailable(m) if m.contains("credential")));
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_verification_without_classifier_names_classifier() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[]);
        let (flow, _table, _bus) = flow(dispatcher.clone(), None, Some("hf"));

        let err = flow.verify("orig", &verify_prompt()).await.unwrap_err();
        assert!(matches!(err, Error::VerificationUnavailable(m) if m.contains("classifier")));
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inconclusive_classifier_stops_flow() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[]);
        let classifier: Arc<dyn LabelClassifier> = Arc::new(FixedClassifier(None));
        let (flow, _table, _bus) = flow(dispatcher.clone(), Some(classifier), Some("hf"));

        let err = flow.verify("orig", &verify_prompt()).await.unwrap_err();
        assert!(matches!(err, Error::VerificationInconclusive));
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_modal_continuation_needs_prompt_and_form() {
        let dispatcher: Arc<dyn CommandDispatcher> = ScriptedDispatcher::with_statuses(&[]);
        let pan = "MJ::JOB::pan_left::1::h::SOLO";
        assert!(ModalContinuation::for_action(dispatcher.clone(), pan, None, false).is_none());
        assert!(ModalContinuation::for_action(dispatcher.clone(), pan, Some("  "), false).is_none());
        assert!(ModalContinuation::for_action(dispatcher.clone(), "MJ::JOB::upsample::1::h", Some("x"), true).is_none());
        assert!(ModalContinuation::for_action(dispatcher.clone(), "MJ::JOB::variation::1::h", Some("x"), false).is_none());
        assert!(ModalContinuation::for_action(dispatcher, "MJ::JOB::variation::1::h", Some("x"), true).is_some());
    }

    #[tokio::test]
    async fn test_modal_continuation_submits_prompt() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[]);
        let handler =
            ModalContinuation::for_action(dispatcher.clone(), "MJ::CustomZoom::h", Some("a cat, far away"), false)
                .unwrap();

        let nonce = handler.on_success("orig", "i1").await.unwrap();
        let modals = dispatcher.modals();
        assert_eq!(modals.len(), 1);
        assert_eq!(modals[0].interaction_id, "i1");
        assert_eq!(modals[0].custom_id, "MJ::OutpaintCustomZoomModal::h");
        assert_eq!(modals[0].input_id, "MJ::OutpaintCustomZoomModal::prompt");
        assert_eq!(modals[0].value, "a cat, far away");
        assert_eq!(modals[0].nonce, nonce);
    }

    #[tokio::test]
    async fn test_rejected_modal_gives_no_continuation() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[400]);
        let handler =
            ModalContinuation::for_action(dispatcher.clone(), "MJ::JOB::variation::2::h", Some("a dog"), true).unwrap();

        assert!(handler.on_success("orig", "i1").await.is_none());
        assert_eq!(dispatcher.modals()[0].custom_id, "MJ::RemixModal::h::2::1");
    }

    #[tokio::test]
    async fn test_verification_clicks_chosen_label() {
        let dispatcher = ScriptedDispatcher::with_statuses(&[]);
        let classifier: Arc<dyn LabelClassifier> = Arc::new(FixedClassifier(Some("Dog")));
        let (flow, _table, bus) = flow(dispatcher.clone(), Some(classifier), Some("hf"));

        let new_token = flow.verify("orig", &verify_prompt()).await.unwrap();
        let calls = dispatcher.calls();
        assert_eq!(calls[0].custom_id, "MJ::Verify::dog");
        assert_eq!(calls[0].message_id, "m7");
        assert_eq!(bus.subscriber_count(&new_token), 1);
    }
}
