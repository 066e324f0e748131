//! In-memory transport and dispatcher for tests.

use async_trait::async_trait;
use mjlink_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::dispatch::{CommandDispatcher, ModalSubmit};
use crate::transport::{Connection, FrameSink, Transport};

/// Test side of one connection: frames the supervisor sent, and a sender
/// for frames the "gateway" pushes. Dropping `inbound` ends the stream.
pub(crate) struct MockConnection {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<Result<String>>,
}

pub(crate) struct MockTransport {
    handles: mpsc::UnboundedSender<MockConnection>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { handles: tx }), rx)
    }
}

/// Closing drops the sender, so the test side sees `sent` end.
struct MockSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::ConnectionFault("mock sink closed".to_string()));
        };
        tx.send(text)
            .map_err(|_| Error::ConnectionFault("mock peer gone".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str) -> Result<Connection> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<String>>();
        self.handles
            .send(MockConnection {
                sent: sent_rx,
                inbound: in_tx,
            })
            .map_err(|_| Error::ConnectionFault("test dropped transport".to_string()))?;

        let stream = futures::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Connection {
            sink: Box::new(MockSink { tx: Some(sent_tx) }),
            stream: Box::pin(stream),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DispatchCall {
    pub message_id: String,
    pub custom_id: String,
    pub flags: u64,
    pub nonce: String,
}

/// Returns scripted statuses in order, then 204.
#[derive(Default)]
pub(crate) struct ScriptedDispatcher {
    statuses: Mutex<VecDeque<u16>>,
    pub calls: Mutex<Vec<DispatchCall>>,
    pub modals: Mutex<Vec<ModalSubmit>>,
}

impl ScriptedDispatcher {
    pub fn with_statuses(statuses: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
            modals: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().clone()
    }

    pub fn modals(&self) -> Vec<ModalSubmit> {
        self.modals.lock().clone()
    }
}

#[async_trait]
impl CommandDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, message_id: &str, custom_id: &str, flags: u64, nonce: &str) -> Result<u16> {
        self.calls.lock().push(DispatchCall {
            message_id: message_id.to_string(),
            custom_id: custom_id.to_string(),
            flags,
            nonce: nonce.to_string(),
        });
        Ok(self.statuses.lock().pop_front().unwrap_or(204))
    }

    async fn submit_modal(&self, modal: &ModalSubmit) -> Result<u16> {
        self.modals.lock().push(modal.clone());
        Ok(self.statuses.lock().pop_front().unwrap_or(204))
    }
}
