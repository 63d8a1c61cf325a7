use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{derive_title, Conversation, ConversationId, HistoryTurn, Message, Part};

/// How many trailing messages are sent to the model as chat history.
pub const HISTORY_LIMIT: usize = 10;

/// The conversation currently being composed.
#[derive(Clone, Debug)]
pub struct ConversationSession {
    id: ConversationId,
    transcript: Vec<Message>,
    last_updated: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            id: ConversationId::new(),
            transcript: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Resumes a stored conversation.
    pub fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id,
            transcript: conversation.transcript.clone(),
            last_updated: conversation.last_updated,
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn derive_title(&self) -> String {
        derive_title(&self.transcript)
    }

    pub fn append_message(&mut self, message: Message) {
        self.transcript.push(message);
        self.touch();
    }

    /// Resolves in-flight placeholders into `final_message`.
    ///
    /// Every processing message matching `predicate` is removed and `final_message`
    /// takes the slot of the first one, so it stays next to the request that produced
    /// it even if the transcript grew in the meantime. Without a match it is appended.
    pub fn replace_processing_placeholder<P>(&mut self, predicate: P, final_message: Message)
    where
        P: Fn(&Message) -> bool,
    {
        let slot = self
            .transcript
            .iter()
            .position(|m| m.is_processing && predicate(m));
        self.transcript.retain(|m| !(m.is_processing && predicate(m)));
        match slot {
            Some(index) => self.transcript.insert(index, final_message),
            None => {
                log::warn!(
                    "No placeholder matched in conversation {}, appending final message",
                    self.id
                );
                self.transcript.push(final_message);
            }
        }
        self.touch();
    }

    /// Rewrites the visible text of a placeholder in place. Returns false if it is gone.
    pub fn update_placeholder_text(&mut self, placeholder_id: Uuid, text: &str) -> bool {
        let Some(message) = self
            .transcript
            .iter_mut()
            .find(|m| m.is_processing && m.id == placeholder_id)
        else {
            return false;
        };
        message.parts = vec![Part::text(text)];
        self.touch();
        true
    }

    /// Recent history in the shape the chat model expects.
    ///
    /// Placeholders and empty messages are skipped; image messages keep only their text.
    pub fn chat_history(&self, limit: usize) -> Vec<HistoryTurn> {
        let start = self.transcript.len().saturating_sub(limit);
        self.transcript[start..]
            .iter()
            .filter(|m| !m.is_processing)
            .filter_map(|m| {
                let text = m
                    .parts
                    .iter()
                    .map(|p| p.text.trim())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                if text.is_empty() {
                    None
                } else {
                    Some(HistoryTurn { role: m.role, text })
                }
            })
            .collect()
    }

    /// Snapshot as a registry record with the given completion flag.
    pub fn to_conversation(&self, completed: bool) -> Conversation {
        Conversation {
            id: self.id,
            transcript: self.transcript.clone(),
            last_updated: self.last_updated,
            completed,
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}
