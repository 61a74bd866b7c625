pub mod research;
pub mod state;

pub use state::{ConversationState, ResearchGroup};

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::models::Message;

/// Shared handle to one conversation.
///
/// Every mutation swaps in the next [`ConversationState`] under the channel's
/// lock and wakes subscribers, so readers observe whole states only.
/// Clones share the same conversation.
#[derive(Clone)]
pub struct ConversationStore {
    state: Arc<watch::Sender<ConversationState>>,
}

impl ConversationStore {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConversationState::new(thread_id));
        Self { state: Arc::new(state) }
    }

    /// A store for a fresh thread with a random id.
    pub fn with_random_thread() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    /// Runs `f` against the current state.
    ///
    /// Do not call back into the store from `f`: the state lock is held.
    pub fn read<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn thread_id(&self) -> String {
        self.read(|state| state.thread_id().to_string())
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.read(|state| state.message(id).cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read(|state| state.contains(id))
    }

    pub fn is_responding(&self) -> bool {
        self.read(ConversationState::is_responding)
    }

    /// Appends a message and updates research bookkeeping.
    ///
    /// A message whose id is already present replaces the stored value
    /// in place instead.
    pub fn append_message(&self, message: Message) {
        self.state.send_modify(|state| {
            if state.messages.contains_key(&message.id) {
                debug!(message_id = %message.id, "Append of known message treated as update");
                replace(state, message);
                return;
            }
            research::on_append(state, &message);
            state.message_ids.push(message.id.clone());
            state.messages.insert(message.id.clone(), message);
        });
    }

    /// Replaces a stored message. Unknown ids are ignored.
    pub fn update_message(&self, message: Message) {
        self.state.send_if_modified(|state| {
            if !state.messages.contains_key(&message.id) {
                warn!(message_id = %message.id, "Update for unknown message ignored");
                return false;
            }
            replace(state, message);
            true
        });
    }

    /// Replaces several messages in a single state transition.
    pub fn update_messages(&self, messages: Vec<Message>) {
        self.state.send_if_modified(|state| {
            let mut changed = false;
            for message in messages {
                if state.messages.contains_key(&message.id) {
                    replace(state, message);
                    changed = true;
                } else {
                    warn!(message_id = %message.id, "Update for unknown message ignored");
                }
            }
            changed
        });
    }

    /// Selects which research is shown in detail; `None` closes it.
    pub fn open_research(&self, research_id: Option<String>) {
        self.state.send_if_modified(|state| {
            if state.open_research_id == research_id {
                return false;
            }
            state.open_research_id = research_id;
            true
        });
    }

    pub fn close_research(&self) {
        self.open_research(None);
    }

    pub fn set_ongoing_research(&self, research_id: Option<String>) {
        self.state.send_if_modified(|state| {
            if state.ongoing_research_id == research_id {
                return false;
            }
            state.ongoing_research_id = research_id;
            true
        });
    }

    pub fn set_responding(&self, responding: bool) {
        self.state.send_if_modified(|state| {
            if state.responding == responding {
                return false;
            }
            state.responding = responding;
            true
        });
    }
}

fn replace(state: &mut ConversationState, message: Message) {
    research::on_update(state, &message);
    state.messages.insert(message.id.clone(), message);
}
