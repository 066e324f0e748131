//! Public correlation API: turn one outbound command plus its scattered
//! gateway replies into a single awaitable result.

use mjlink_core::config::Config;
use mjlink_core::{with_retry, Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::bus::{EventBus, SubscriptionId};
use crate::continuation::{ContinuationFlow, ContinuationHandler, LabelClassifier, ModalContinuation};
use crate::correlation::{CorrelationTable, PendingRequest};
use crate::dispatch::{CommandDispatcher, HttpDispatcher, ACCEPTED};
use crate::frame::parse_frame;
use crate::parse::next_nonce;
use crate::router::{MessageRouter, RouterSettings};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, SupervisorSettings};
use crate::transport::{Transport, WsTransport};
use crate::types::{
    channels, GatewayEvent, MjDescribe, MjInfo, MjMessage, MjSettings, MjShorten,
    ProgressSnapshot, ReadyUser,
};

const READY_TIMEOUT: Duration = Duration::from_secs(30);
const INIT_ATTEMPTS: u32 = 3;

pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

#[derive(Clone, Default)]
pub struct WaitOptions {
    pub prompt: Option<String>,
    pub continuation: Option<Arc<dyn ContinuationHandler>>,
    pub related_message_id: Option<String>,
    pub progress: Option<ProgressCallback>,
}

/// Registered interest in one token. Dropping it abandons the request and
/// removes its table entry along with any continuation relays.
pub struct PendingWait {
    token: String,
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
    subscription: SubscriptionId,
    table: Arc<Mutex<CorrelationTable>>,
    bus: Arc<EventBus<GatewayEvent>>,
}

impl PendingWait {
    pub fn token(&self) -> &str {
        &self.token
    }

    async fn terminal(&mut self) -> Result<GatewayEvent> {
        match self.rx.recv().await {
            Some(GatewayEvent::Failed(e)) => Err(e.into()),
            Some(event) => Ok(event),
            None => Err(Error::Closed),
        }
    }

    pub async fn result(mut self) -> Result<MjMessage> {
        match self.terminal().await? {
            GatewayEvent::Artifact(msg) => Ok(msg),
            other => Err(unexpected(&self.token, &other)),
        }
    }

    pub async fn describe(mut self) -> Result<MjDescribe> {
        match self.terminal().await? {
            GatewayEvent::Describe(d) => Ok(d),
            other => Err(unexpected(&self.token, &other)),
        }
    }

    pub async fn shorten(mut self) -> Result<MjShorten> {
        match self.terminal().await? {
            GatewayEvent::Shorten(s) => Ok(s),
            other => Err(unexpected(&self.token, &other)),
        }
    }
}

fn unexpected(token: &str, event: &GatewayEvent) -> Error {
    Error::Other(format!("unexpected result for {}: {:?}", token, event))
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        let removed = self.table.lock().remove_with_relays(&self.token);
        for relay in removed.iter().filter(|e| e.token != self.token) {
            self.bus.remove_all(&relay.token);
        }
        self.bus.remove(&self.token, self.subscription);
    }
}

pub struct CorrelationEngine {
    bus: Arc<EventBus<GatewayEvent>>,
    table: Arc<Mutex<CorrelationTable>>,
    router: Arc<MessageRouter>,
    supervisor: ConnectionSupervisor,
    dispatcher: Arc<dyn CommandDispatcher>,
    frames: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl CorrelationEngine {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<dyn CommandDispatcher>,
        classifier: Option<Arc<dyn LabelClassifier>>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let table = Arc::new(Mutex::new(CorrelationTable::new()));
        let flow = Arc::new(ContinuationFlow::new(
            table.clone(),
            bus.clone(),
            dispatcher.clone(),
            classifier,
            config.verification.credential().map(str::to_string),
        ));
        let router = Arc::new(MessageRouter::new(
            RouterSettings::from_config(config),
            table.clone(),
            bus.clone(),
            flow,
            config.gateway.remix,
        ));
        let weak_router = Arc::downgrade(&router);
        bus.on(channels::CLOSED, move |_event: &GatewayEvent| {
            if let Some(router) = weak_router.upgrade() {
                router.clear_user();
            }
        });
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let supervisor = ConnectionSupervisor::new(
            transport,
            SupervisorSettings::from_config(config),
            bus.clone(),
            frames_tx,
        );
        Self {
            bus,
            table,
            router,
            supervisor,
            dispatcher,
            frames: Mutex::new(Some(frames_rx)),
        }
    }

    /// Engine over the WebSocket gateway and the HTTP interaction endpoint.
    pub fn from_config(config: &Config, classifier: Option<Arc<dyn LabelClassifier>>) -> Result<Self> {
        config.validate()?;
        let dispatcher = Arc::new(HttpDispatcher::new(config.discord.clone())?);
        Ok(Self::new(config, Arc::new(WsTransport), dispatcher, classifier))
    }

    pub fn bus(&self) -> &Arc<EventBus<GatewayEvent>> {
        &self.bus
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn remix_enabled(&self) -> bool {
        self.router.remix_enabled()
    }

    /// Start the frame pump and open the connection.
    pub fn connect(&self) {
        if let Some(mut frames) = self.frames.lock().take() {
            let router = self.router.clone();
            tokio::spawn(async move {
                while let Some(text) = frames.recv().await {
                    route_frame(&router, &text);
                }
                debug!("Frame pump stopped");
            });
        }
        self.supervisor.open();
    }

    /// Connect and wait for readiness, retrying the whole handshake.
    pub async fn init(&self) -> Result<ReadyUser> {
        with_retry(INIT_ATTEMPTS, |attempt| {
            if attempt == 1 {
                self.connect();
            } else {
                self.supervisor.reconnect();
            }
            async move {
                tokio::time::timeout(READY_TIMEOUT, self.once_ready())
                    .await
                    .map_err(|_| Error::ConnectionFault("timed out waiting for ready".to_string()))?
            }
        })
        .await
    }

    pub async fn once_ready(&self) -> Result<ReadyUser> {
        let (id, rx) = self.next_on(channels::READY);
        if let Some(user) = self.router.user() {
            self.bus.remove(channels::READY, id);
            return Ok(user);
        }
        match rx.await {
            Ok(GatewayEvent::Ready(user)) => Ok(user),
            Ok(other) => Err(unexpected(channels::READY, &other)),
            Err(_) => Err(Error::Closed),
        }
    }

    pub async fn wait_settings(&self) -> Result<MjSettings> {
        match self.next_event(channels::SETTINGS).await? {
            GatewayEvent::Settings(s) => Ok(s),
            other => Err(unexpected(channels::SETTINGS, &other)),
        }
    }

    pub async fn wait_info(&self) -> Result<MjInfo> {
        match self.next_event(channels::INFO).await? {
            GatewayEvent::Info(info) => Ok(info),
            other => Err(unexpected(channels::INFO, &other)),
        }
    }

    /// Next text payload on a side channel such as `prefer-remix`.
    pub async fn wait_content(&self, channel: &str) -> Result<String> {
        match self.next_event(channel).await? {
            GatewayEvent::Content(text) => Ok(text),
            other => Err(unexpected(channel, &other)),
        }
    }

    fn next_on(&self, channel: &str) -> (SubscriptionId, oneshot::Receiver<GatewayEvent>) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.bus.once(channel, move |event: &GatewayEvent| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(event.clone());
            }
        });
        (id, rx)
    }

    async fn next_event(&self, channel: &str) -> Result<GatewayEvent> {
        let (_, rx) = self.next_on(channel);
        rx.await.map_err(|_| Error::Closed)
    }

    /// Register interest in `token` before the command carrying it is sent.
    pub fn register(&self, token: &str, options: WaitOptions) -> PendingWait {
        let WaitOptions {
            prompt,
            continuation,
            related_message_id,
            progress,
        } = options;
        self.table.lock().register(
            PendingRequest::new(token)
                .with_prompt(prompt)
                .with_related_message(related_message_id)
                .with_continuation(continuation),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.bus.on_until(token, move |event: &GatewayEvent| {
            if let (GatewayEvent::Progress(snapshot), Some(callback)) = (event, progress.as_ref()) {
                callback(snapshot);
            }
            if event.is_terminal() {
                let _ = tx.send(event.clone());
                return true;
            }
            false
        });
        PendingWait {
            token: token.to_string(),
            rx,
            subscription,
            table: self.table.clone(),
            bus: self.bus.clone(),
        }
    }

    pub async fn wait_for_result(&self, token: &str, options: WaitOptions) -> Result<MjMessage> {
        self.register(token, options).result().await
    }

    pub async fn wait_describe(&self, token: &str) -> Result<MjDescribe> {
        self.register(token, WaitOptions::default()).describe().await
    }

    pub async fn wait_shorten(&self, token: &str) -> Result<MjShorten> {
        self.register(token, WaitOptions::default()).shorten().await
    }

    /// Click `custom_id` on `message_id` and wait for the resulting image.
    /// Actions that open a modal submit `prompt` into it once the click
    /// succeeds.
    pub async fn action(
        &self,
        message_id: &str,
        custom_id: &str,
        flags: u64,
        prompt: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> Result<MjMessage> {
        let nonce = next_nonce();
        let continuation = ModalContinuation::for_action(
            self.dispatcher.clone(),
            custom_id,
            prompt.as_deref(),
            self.remix_enabled(),
        )
        .map(|c| Arc::new(c) as Arc<dyn ContinuationHandler>);
        let wait = self.register(
            &nonce,
            WaitOptions {
                prompt,
                continuation,
                related_message_id: Some(message_id.to_string()),
                progress,
                ..Default::default()
            },
        );
        let status = self
            .dispatcher
            .dispatch(message_id, custom_id, flags, &nonce)
            .await?;
        if status != ACCEPTED {
            return Err(Error::Dispatch(format!(
                "interaction {} returned status {}",
                custom_id, status
            )));
        }
        wait.result().await
    }

    /// Feed one raw frame through classification.
    pub fn handle_frame(&self, text: &str) {
        route_frame(&self.router, text);
    }

    pub async fn close(&self) {
        self.supervisor.close().await;
    }
}

fn route_frame(router: &Arc<MessageRouter>, text: &str) {
    match parse_frame(text) {
        Ok(Some(event)) => router.route(event),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Dropping unparseable frame"),
    }
}
