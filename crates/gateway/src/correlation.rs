//! Pending requests keyed by correlation token.

use std::fmt;
use std::sync::Arc;

use crate::continuation::ContinuationHandler;
use crate::parse::content_to_prompt;

#[derive(Clone, Default)]
pub struct PendingRequest {
    pub token: String,
    /// Id of the interim message, attached the first time a frame carries
    /// both the token and an id.
    pub message_id: Option<String>,
    pub prompt: Option<String>,
    /// Message the command was issued from. Edits to it are not progress
    /// of this request.
    pub related_message_id: Option<String>,
    /// Set when the interim message is deleted. Never unset.
    pub tombstoned: bool,
    pub continuation: Option<Arc<dyn ContinuationHandler>>,
    /// For continuation entries: the token whose waiter receives the result.
    pub origin: Option<String>,
}

impl PendingRequest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_related_message(mut self, related: Option<String>) -> Self {
        self.related_message_id = related;
        self
    }

    pub fn with_continuation(mut self, handler: Option<Arc<dyn ContinuationHandler>>) -> Self {
        self.continuation = handler;
        self
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("token", &self.token)
            .field("message_id", &self.message_id)
            .field("prompt", &self.prompt)
            .field("tombstoned", &self.tombstoned)
            .field("continuation", &self.continuation.is_some())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Registration-ordered table. At most one entry exists per token.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Vec<PendingRequest>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `request`, replacing any existing entry for the same token in
    /// place (it keeps its registration position).
    pub fn register(&mut self, request: PendingRequest) {
        match self.entries.iter_mut().find(|e| e.token == request.token) {
            Some(existing) => *existing = request,
            None => self.entries.push(request),
        }
    }

    pub fn get(&self, token: &str) -> Option<&PendingRequest> {
        self.entries.iter().find(|e| e.token == token)
    }

    /// Attach the interim message id. Later ids for the same token are ignored.
    pub fn update_by_token(&mut self, token: &str, message_id: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.token == token) {
            Some(entry) => {
                if entry.message_id.is_none() && !message_id.is_empty() {
                    entry.message_id = Some(message_id.to_string());
                }
                true
            }
            None => false,
        }
    }

    /// Whether `message_id` is the source message of some pending request
    /// and not the interim message of any.
    pub fn is_source_message(&self, message_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.related_message_id.as_deref() == Some(message_id))
            && !self
                .entries
                .iter()
                .any(|e| e.message_id.as_deref() == Some(message_id))
    }

    pub fn find_by_message_id(&self, message_id: &str) -> Option<&PendingRequest> {
        self.entries
            .iter()
            .find(|e| e.message_id.as_deref() == Some(message_id))
    }

    /// Returns the number of entries marked.
    pub fn tombstone_by_message_id(&mut self, message_id: &str) -> usize {
        let mut marked = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.message_id.as_deref() == Some(message_id))
        {
            entry.tombstoned = true;
            marked += 1;
        }
        marked
    }

    pub fn set_prompt(&mut self, token: &str, prompt: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.token == token) {
            entry.prompt = Some(prompt.to_string());
        }
    }

    /// Match a final artifact by normalized prompt key. Stored prompts are
    /// normalized the same way before comparing. A single tombstoned match
    /// wins; otherwise the earliest registered match.
    pub fn match_prompt(&self, key: &str) -> Option<&PendingRequest> {
        let matches = |e: &&PendingRequest| {
            e.prompt.as_deref().map(content_to_prompt).as_deref() == Some(key)
        };
        let mut tombstoned = self.entries.iter().filter(|e| e.tombstoned).filter(matches);
        if let (Some(only), None) = (tombstoned.next(), tombstoned.next()) {
            return Some(only);
        }
        self.entries.iter().find(matches)
    }

    pub fn remove(&mut self, token: &str) -> Option<PendingRequest> {
        let index = self.entries.iter().position(|e| e.token == token)?;
        Some(self.entries.remove(index))
    }

    /// Remove `token` and every continuation entry relaying into it.
    /// Returns the removed entries.
    pub fn remove_with_relays(&mut self, token: &str) -> Vec<PendingRequest> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.token == token || e.origin.as_deref() == Some(token));
        self.entries = kept;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
