use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{Conversation, ConversationId, Message};
use crate::session::ConversationSession;
use crate::storage::ChatStore;

/// Registry shared between commands and in-flight exchanges.
pub type SharedRegistry = Arc<Mutex<ConversationRegistry>>;

/// All known conversations plus the one currently being composed.
///
/// Every change to a conversation's transcript is mirrored into the [`ChatStore`].
/// Store failures are logged and never roll back the in-memory state.
pub struct ConversationRegistry {
    store: Arc<dyn ChatStore>,
    active: ConversationSession,
    // Insertion order, which is also the store's order
    conversations: Vec<Conversation>,
}

impl ConversationRegistry {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            active: ConversationSession::new(),
            conversations: Vec::new(),
        }
    }

    /// Rebuilds the registry from the store.
    ///
    /// A conversation that was still active when the app last stopped is resumed.
    pub async fn restore(store: Arc<dyn ChatStore>) -> Result<Self, anyhow::Error> {
        let conversations = store.list_all().await?;
        let mut registry = Self {
            store,
            active: ConversationSession::new(),
            conversations,
        };

        let resume = registry
            .conversations
            .iter()
            .filter(|c| !c.completed)
            .max_by_key(|c| c.last_updated)
            .map(|c| c.id);
        if let Some(id) = resume {
            if let Some(session) = registry.find(id).map(ConversationSession::from_conversation) {
                registry.active = session;
            }
            log::info!("Resuming active conversation {}", id);
            registry.archive_all_except(id).await;
        }

        log::info!(
            "Registry restored with {} conversations",
            registry.conversations.len()
        );
        Ok(registry)
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn active(&self) -> &ConversationSession {
        &self.active
    }

    pub fn active_id(&self) -> ConversationId {
        self.active.id()
    }

    /// Snapshot of the active conversation.
    pub fn get_active(&self) -> Conversation {
        self.active.to_conversation(false)
    }

    /// Completed conversations in insertion order.
    pub fn list_completed(&self) -> Vec<Conversation> {
        self.conversations
            .iter()
            .filter(|c| c.completed)
            .cloned()
            .collect()
    }

    /// Every known conversation, most recently updated first.
    pub fn conversations(&self) -> Vec<Conversation> {
        let mut all = self.conversations.clone();
        all.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        all
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.find(id)
    }

    /// Appends to the active conversation and saves it.
    pub async fn append_message(&mut self, message: Message) {
        self.active.append_message(message);
        self.auto_save().await;
    }

    /// Appends several messages to the active conversation with a single save.
    pub async fn append_messages<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        for message in messages {
            self.active.append_message(message);
        }
        self.auto_save().await;
    }

    /// Upserts the active conversation without touching its `completed` flag.
    ///
    /// Empty sessions are never written.
    pub async fn auto_save(&mut self) {
        if self.active.is_empty() {
            return;
        }
        let snapshot = self.upsert_active(None);
        self.persist(&snapshot).await;
    }

    /// Archives the active conversation (if it has content) and starts a fresh one.
    ///
    /// Returns the new conversation's id; callers reset their own input and loading state.
    pub async fn start_new(&mut self) -> ConversationId {
        if !self.active.is_empty() {
            let snapshot = self.upsert_active(Some(true));
            log::info!(
                "Completing conversation {} ('{}')",
                snapshot.id,
                snapshot.title()
            );
            self.persist(&snapshot).await;
        }
        self.active = ConversationSession::new();
        log::debug!("Started new conversation {}", self.active.id());
        self.active.id()
    }

    /// Switches the active session to a stored conversation.
    ///
    /// Unknown ids are ignored: nothing changes and nothing is written.
    /// Returns whether the switch happened.
    pub async fn load_conversation(&mut self, id: ConversationId) -> bool {
        if id == self.active.id() {
            self.auto_save().await;
            return true;
        }
        if self.find(id).is_none() {
            log::warn!("Attempted to load unknown conversation: {}", id);
            return false;
        }

        self.auto_save().await;

        let Some(target) = self.conversations.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        let reactivated = target.completed;
        if reactivated {
            target.completed = false;
            target.last_updated = Utc::now();
        }
        let snapshot = target.clone();
        self.active = ConversationSession::from_conversation(&snapshot);
        if reactivated {
            self.persist(&snapshot).await;
        }
        log::info!("Loaded conversation {} ('{}')", id, snapshot.title());

        // The outgoing chat was saved with its flag untouched; closing it here keeps
        // exactly one conversation open after the switch.
        self.archive_all_except(id).await;
        true
    }

    /// Runs `f` against a specific conversation, active or not, and saves the result.
    ///
    /// In-flight exchanges use this with the id captured at submission so their results
    /// land where they were asked, even after the user switched away.
    pub async fn apply_to<F>(&mut self, id: ConversationId, f: F) -> bool
    where
        F: FnOnce(&mut ConversationSession),
    {
        if id == self.active.id() {
            f(&mut self.active);
            self.auto_save().await;
            return true;
        }

        let Some(entry) = self.conversations.iter_mut().find(|c| c.id == id) else {
            log::warn!("Dropping update for unknown conversation {}", id);
            return false;
        };
        let mut session = ConversationSession::from_conversation(entry);
        f(&mut session);
        entry.transcript = session.transcript().to_vec();
        entry.last_updated = session.last_updated();
        let snapshot = entry.clone();
        log::debug!("Updated background conversation {}", id);
        self.persist(&snapshot).await;
        true
    }

    fn find(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Writes the active session into `conversations`, returning the stored record.
    /// `completed: None` keeps the existing flag (false for a new entry).
    fn upsert_active(&mut self, completed: Option<bool>) -> Conversation {
        let id = self.active.id();
        match self.conversations.iter_mut().find(|c| c.id == id) {
            Some(entry) => {
                entry.transcript = self.active.transcript().to_vec();
                entry.last_updated = self.active.last_updated();
                if let Some(flag) = completed {
                    entry.completed = flag;
                }
                entry.clone()
            }
            None => {
                let record = self.active.to_conversation(completed.unwrap_or(false));
                self.conversations.push(record.clone());
                record
            }
        }
    }

    /// Keeps the single-active invariant: every other open conversation is completed.
    async fn archive_all_except(&mut self, keep: ConversationId) {
        let mut archived = Vec::new();
        for conversation in self.conversations.iter_mut() {
            if conversation.id != keep && !conversation.completed {
                conversation.completed = true;
                archived.push(conversation.clone());
            }
        }
        for conversation in archived {
            log::debug!("Archiving conversation {}", conversation.id);
            self.persist(&conversation).await;
        }
    }

    async fn persist(&self, conversation: &Conversation) {
        if let Err(e) = self.store.put(conversation).await {
            log::error!("Failed to persist conversation {}: {:?}", conversation.id, e);
        }
    }
}
