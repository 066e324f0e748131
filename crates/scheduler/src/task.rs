use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::delivery::TaskDelivery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Uncreated,
    Pending,
    Processing,
    Completed,
    Timeout,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Timeout | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Uncreated => "uncreated",
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Imagine,
    Upscale,
    Variation,
    Pan,
    ZoomOut,
    Reroll,
    Describe,
    Blend,
}

/// Remote submit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub id: String,
    pub status: String,
}

impl SubmitAck {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: "ok".to_string(),
        }
    }
}

/// Pushed once per status or progress change. Times are epoch milliseconds,
/// zero when not reached yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub create_time: i64,
    pub start_time: i64,
    pub finish_time: i64,
    pub data: Value,
    pub msg: Value,
}

/// One tracked job. Status only moves forward and is frozen once terminal.
pub struct Task {
    id: String,
    user_id: String,
    kind: TaskKind,
    status: TaskStatus,
    create_time: i64,
    start_time: i64,
    finish_time: i64,
    data: Value,
    msg: Value,
    delivery: Arc<dyn TaskDelivery>,
}

impl Task {
    pub fn new(submission: TaskSubmission, delivery: Arc<dyn TaskDelivery>) -> Self {
        Self {
            id: submission
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_id: submission.user_id,
            kind: submission.kind,
            status: TaskStatus::Uncreated,
            create_time: Utc::now().timestamp_millis(),
            start_time: 0,
            finish_time: 0,
            data: submission.data,
            msg: Value::Null,
            delivery,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn event(&self) -> TaskEvent {
        TaskEvent {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            kind: self.kind,
            status: self.status,
            create_time: self.create_time,
            start_time: self.start_time,
            finish_time: self.finish_time,
            data: self.data.clone(),
            msg: self.msg.clone(),
        }
    }

    fn notify(&self) {
        self.delivery.deliver(self.event());
    }

    pub(crate) fn submit(&mut self) -> bool {
        if self.status != TaskStatus::Uncreated {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.notify();
        true
    }

    pub(crate) fn start(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Processing;
        self.start_time = Utc::now().timestamp_millis();
        self.notify();
        true
    }

    /// Progress while running. Ignored in any other state.
    pub(crate) fn processing(&mut self, msg: Value) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        self.msg = msg;
        self.notify();
        true
    }

    pub(crate) fn success(&mut self, msg: Value) -> bool {
        self.finish(TaskStatus::Completed, msg)
    }

    /// Unlike a late success, a late failure is also dropped once the task
    /// has timed out.
    pub(crate) fn fail(&mut self, msg: Value) -> bool {
        self.finish(TaskStatus::Error, msg)
    }

    pub(crate) fn expire(&mut self, msg: Value) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        self.finish(TaskStatus::Timeout, msg)
    }

    pub(crate) fn reassign_id(&mut self, id: String) {
        self.id = id;
    }

    fn finish(&mut self, status: TaskStatus, msg: Value) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finish_time = Utc::now().timestamp_millis();
        self.msg = msg;
        self.notify();
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .finish()
    }
}
