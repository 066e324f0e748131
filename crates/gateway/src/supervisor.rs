//! Owns the single gateway connection: identify on open, heartbeat while
//! open, reconnect on any fault.
//!
//! Every connection attempt runs under a generation number. Reconnecting
//! bumps the generation, and the reader and heartbeat loops of an older
//! generation exit at their next check without sending or rescheduling.

use futures::future::BoxFuture;
use futures::StreamExt;
use mjlink_core::{Config, Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::frame::{HeartbeatFrame, IdentifyFrame};
use crate::transport::{Connection, FrameSink, Transport};
use crate::types::{channels, GatewayEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Faulted,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub url: String,
    pub token: String,
    pub capabilities: u64,
    pub heartbeat_grace: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.discord.ws_base_url.clone(),
            token: config.discord.salai_token.clone(),
            capabilities: config.discord.capabilities,
            heartbeat_grace: config.gateway.heartbeat_grace(),
            heartbeat_interval: config.gateway.heartbeat_interval(),
            reconnect_delay: config.gateway.reconnect_delay(),
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    settings: SupervisorSettings,
    bus: Arc<EventBus<GatewayEvent>>,
    frames: mpsc::UnboundedSender<String>,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
    sequence: AtomicU64,
    closed: AtomicBool,
    started: AtomicBool,
    writer: tokio::sync::Mutex<Option<(u64, Box<dyn FrameSink>)>>,
}

pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
}

impl ConnectionSupervisor {
    /// Inbound text frames are forwarded, in arrival order, to `frames`.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: SupervisorSettings,
        bus: Arc<EventBus<GatewayEvent>>,
        frames: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                settings,
                bus,
                frames,
                state: Mutex::new(ConnectionState::Closed),
                generation: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                writer: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Start the first connection. Later calls are no-ops; readiness is
    /// signalled separately on the `ready` channel.
    pub fn open(&self) {
        if self.shared.closed.load(Ordering::SeqCst)
            || self.shared.started.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);
        tokio::spawn(run_generation(self.shared.clone(), generation));
    }

    /// Drop the current connection and establish a new one.
    pub fn reconnect(&self) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.reconnect_from(generation);
    }

    /// Permanently close. Reconnects become no-ops afterwards.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Closed);
        if let Some((_, mut sink)) = self.shared.writer.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing gateway sink");
            }
        }
        info!("Gateway connection closed");
        self.shared
            .bus
            .emit(channels::CLOSED, &GatewayEvent::Closed { generation });
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn reconnect_from(self: &Arc<Self>, generation: u64) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Supervisor closed, not reconnecting");
            return;
        }
        let next = generation + 1;
        if self
            .generation
            .compare_exchange(generation, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // another path already moved past this generation
            return;
        }
        self.sequence.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        info!(generation = next, "Reconnecting to gateway");
        self.bus
            .emit(channels::CLOSED, &GatewayEvent::Closed { generation });
        tokio::spawn(run_generation(self.clone(), next));
    }

    /// Fault of the connection owned by `generation`.
    fn fault(self: &Arc<Self>, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        self.set_state(ConnectionState::Faulted);
        self.reconnect_from(generation);
    }

    /// Close a sink still held by an older generation.
    async fn retire_writer(&self, generation: u64) {
        let stale = {
            let mut guard = self.writer.lock().await;
            match guard.as_ref() {
                Some((owner, _)) if *owner < generation => guard.take(),
                _ => None,
            }
        };
        if let Some((owner, mut sink)) = stale {
            debug!(generation = owner, "Closing superseded connection");
            if let Err(e) = sink.close().await {
                debug!(generation = owner, error = %e, "Error closing superseded sink");
            }
        }
    }

    async fn send_json<T: Serialize>(&self, generation: u64, frame: &T) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some((owner, sink)) if *owner == generation => sink.send_text(text).await,
            _ => Err(Error::ConnectionFault(format!(
                "generation {} no longer owns the connection",
                generation
            ))),
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>, generation: u64) {
        let shared = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shared.settings.heartbeat_grace).await;
            loop {
                if !shared.is_current(generation) {
                    debug!(generation, "Stale heartbeat loop exiting");
                    return;
                }
                if shared.state() != ConnectionState::Open {
                    warn!(generation, state = ?shared.state(), "Heartbeat found connection not open");
                    shared.reconnect_from(generation);
                    return;
                }
                let sequence = shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(generation, sequence, "Sending heartbeat");
                if let Err(e) = shared
                    .send_json(generation, &HeartbeatFrame::new(sequence))
                    .await
                {
                    warn!(generation, error = %e, "Failed to send heartbeat");
                    shared.fault(generation);
                    return;
                }
                tokio::time::sleep(shared.settings.heartbeat_interval).await;
            }
        });
    }
}

fn run_generation(shared: Arc<Shared>, generation: u64) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        shared.retire_writer(generation).await;
        info!(generation, url = %shared.settings.url, "Connecting to gateway");
        let Connection { mut sink, mut stream } =
            match shared.transport.connect(&shared.settings.url).await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(generation, error = %e, "Gateway connect failed");
                    if shared.is_current(generation) {
                        shared.set_state(ConnectionState::Faulted);
                    }
                    tokio::time::sleep(shared.settings.reconnect_delay).await;
                    shared.reconnect_from(generation);
                    return;
                }
            };

        if !shared.is_current(generation) {
            let _ = sink.close().await;
            return;
        }
        *shared.writer.lock().await = Some((generation, sink));
        shared.set_state(ConnectionState::Open);
        info!(generation, "Gateway connection open");
        shared
            .bus
            .emit(channels::OPENED, &GatewayEvent::Opened { generation });

        let identify = IdentifyFrame::new(&shared.settings.token, shared.settings.capabilities);
        if let Err(e) = shared.send_json(generation, &identify).await {
            warn!(generation, error = %e, "Failed to send identify");
            shared.fault(generation);
            return;
        }
        debug!(generation, "Sent identify");
        shared.spawn_heartbeat(generation);

        while let Some(item) = stream.next().await {
            if !shared.is_current(generation) {
                return;
            }
            match item {
                Ok(text) => {
                    if shared.frames.send(text).is_err() {
                        debug!(generation, "Frame consumer gone, dropping frame");
                    }
                }
                Err(e) => {
                    warn!(generation, error = %e, "Gateway transport error");
                    break;
                }
            }
        }
        info!(generation, "Gateway stream ended");
        shared.fault(generation);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, MockTransport};

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            url: "wss://gateway.test".to_string(),
            token: "secret".to_string(),
            capabilities: 8189,
            heartbeat_grace: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(40),
            reconnect_delay: Duration::from_millis(500),
        }
    }

    fn supervisor() -> (
        ConnectionSupervisor,
        mpsc::UnboundedReceiver<MockConnection>,
        mpsc::UnboundedReceiver<String>,
        Arc<EventBus<GatewayEvent>>,
    ) {
        let (transport, handles) = MockTransport::new();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(EventBus::new());
        let sup = ConnectionSupervisor::new(transport, settings(), bus.clone(), frames_tx);
        (sup, handles, frames_rx, bus)
    }

    fn json(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_then_heartbeats() {
        let (sup, mut handles, _frames, _bus) = supervisor();
        sup.open();
        let mut conn = handles.recv().await.unwrap();

        let identify = json(&conn.sent.recv().await.unwrap());
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "secret");
        assert_eq!(sup.state(), ConnectionState::Open);

        let start = tokio::time::Instant::now();
        let hb1 = json(&conn.sent.recv().await.unwrap());
        assert_eq!(hb1, serde_json::json!({"op": 1, "d": 1}));
        assert!(start.elapsed() >= Duration::from_secs(10));

        let hb2 = json(&conn.sent.recv().await.unwrap());
        assert_eq!(hb2["d"], 2);
        assert!(start.elapsed() >= Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_forwarded_in_order() {
        let (sup, mut handles, mut frames, _bus) = supervisor();
        sup.open();
        let conn = handles.recv().await.unwrap();
        conn.inbound.send(Ok("one".to_string())).unwrap();
        conn.inbound.send(Ok("two".to_string())).unwrap();
        assert_eq!(frames.recv().await.unwrap(), "one");
        assert_eq!(frames.recv().await.unwrap(), "two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_heartbeat_loop_is_silent_after_reconnect() {
        let (sup, mut handles, _frames, _bus) = supervisor();
        sup.open();
        let mut old = handles.recv().await.unwrap();
        let _identify = old.sent.recv().await.unwrap();

        sup.reconnect();
        assert_eq!(sup.generation(), 1);
        let mut new = handles.recv().await.unwrap();
        assert_eq!(json(&new.sent.recv().await.unwrap())["op"], 2);

        // sequence restarts on the new generation
        let hb = json(&new.sent.recv().await.unwrap());
        assert_eq!(hb["d"], 1);

        // the superseded socket was closed, and its heartbeat loop stayed silent
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(old.sent.recv().await.is_none());
        assert_eq!(sup.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reconnects_instead_of_sending_when_not_open() {
        let (sup, mut handles, _frames, _bus) = supervisor();
        sup.open();
        let mut first = handles.recv().await.unwrap();
        let _identify = first.sent.recv().await.unwrap();

        sup.shared.set_state(ConnectionState::Faulted);

        let _second = handles.recv().await.unwrap();
        assert_eq!(sup.generation(), 1);
        assert!(first.sent.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_triggers_reconnect() {
        let (sup, mut handles, _frames, bus) = supervisor();
        let closed = Arc::new(Mutex::new(Vec::new()));
        let closed2 = closed.clone();
        bus.on(channels::CLOSED, move |event| {
            if let GatewayEvent::Closed { generation } = event {
                closed2.lock().push(*generation);
            }
        });

        sup.open();
        let first = handles.recv().await.unwrap();
        drop(first.inbound);

        let mut second = handles.recv().await.unwrap();
        assert_eq!(json(&second.sent.recv().await.unwrap())["op"], 2);
        assert_eq!(sup.generation(), 1);
        assert_eq!(*closed.lock(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_announces_closed_generation() {
        let (sup, mut handles, _frames, bus) = supervisor();
        let closed = Arc::new(Mutex::new(Vec::new()));
        let closed2 = closed.clone();
        bus.on(channels::CLOSED, move |event| {
            if let GatewayEvent::Closed { generation } = event {
                closed2.lock().push(*generation);
            }
        });

        sup.open();
        let _first = handles.recv().await.unwrap();
        sup.reconnect();
        assert_eq!(sup.state(), ConnectionState::Connecting);
        assert_eq!(*closed.lock(), vec![0]);
        let _second = handles.recv().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_makes_reconnect_permanent_noop() {
        let (sup, mut handles, _frames, _bus) = supervisor();
        sup.open();
        let _conn = handles.recv().await.unwrap();

        sup.close().await;
        let generation = sup.generation();
        sup.reconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(sup.is_closed());
        assert_eq!(sup.state(), ConnectionState::Closed);
        assert_eq!(sup.generation(), generation);
        assert!(handles.try_recv().is_err());
    }
}
