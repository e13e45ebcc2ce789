use serde::{Deserialize, Serialize};

use crate::handler::HandlerId;
use crate::message::Message;

/// Per-thread conversation state.
///
/// The message list is append-only; the execution loop and the classifier
/// both read history but may only push new entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub thread_id: String,
    pub user_id: String,
    messages: Vec<Message>,
    /// Handler the thread is currently pinned to, if any. The classifier
    /// keeps routing here until it sees a clear switch signal.
    pub pinned_handler: Option<HandlerId>,
}

impl ConversationContext {
    pub fn new(thread_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            pinned_handler: None,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::MessageRole::User)
    }
}
