//! Where task status events go.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::task::TaskEvent;

pub trait TaskDelivery: Send + Sync {
    fn deliver(&self, event: TaskEvent);
}

/// Logs each event locally.
#[derive(Debug, Default, Clone)]
pub struct LogDelivery;

impl TaskDelivery for LogDelivery {
    fn deliver(&self, event: TaskEvent) {
        info!(
            task_id = %event.id,
            user_id = %event.user_id,
            kind = ?event.kind,
            status = %event.status,
            msg = %event.msg,
            "Task event"
        );
    }
}

/// Pushes events to a remote observer through a channel; the socket server
/// on the other end forwards them to the submitting client.
#[derive(Debug, Clone)]
pub struct RemoteDelivery {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl RemoteDelivery {
    pub fn new(tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }
}

impl TaskDelivery for RemoteDelivery {
    fn deliver(&self, event: TaskEvent) {
        let id = event.id.clone();
        if self.tx.send(event).is_err() {
            debug!(task_id = %id, "Remote observer gone, dropping task event");
        }
    }
}
