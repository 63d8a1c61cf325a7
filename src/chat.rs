use crate::api::LLMApiProvider;
use crate::error::AiError;
use crate::models::Message;
use crate::registry::SharedRegistry;
use crate::session::HISTORY_LIMIT;

/// How a text message exchange ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Blank input, nothing was sent
    Ignored,
    Replied(Message),
    /// The model call failed; the message holds the error text shown to the user
    Failed(Message),
}

/// Text surfaced to the user for a failed chat call: the server's own text when it
/// sent one, otherwise the error itself.
fn failure_text(err: &AiError) -> String {
    match err {
        AiError::Status { body, .. } if !body.trim().is_empty() => body.trim().to_string(),
        other => other.to_string(),
    }
}

/// Sends one user message and records the reply. No retries.
///
/// The reply goes to the conversation that was active when the message was sent.
pub async fn send_text(
    registry: &SharedRegistry,
    provider: &dyn LLMApiProvider,
    text: &str,
) -> ChatOutcome {
    if text.trim().is_empty() {
        log::debug!("Empty or invalid entry, not sending");
        return ChatOutcome::Ignored;
    }

    let (conversation_id, history) = {
        let mut registry = registry.lock().await;
        let history = registry.active().chat_history(HISTORY_LIMIT);
        let id = registry.active_id();
        registry.append_message(Message::user(text)).await;
        (id, history)
    };
    log::info!(
        "Sending chat message to conversation {} with {} turns of history",
        conversation_id,
        history.len()
    );

    let outcome = match provider.send_chat(&history, text).await {
        Ok(reply) => ChatOutcome::Replied(Message::model(reply)),
        Err(e) => {
            log::error!("Chat error for conversation {}: {}", conversation_id, e);
            ChatOutcome::Failed(Message::model(format!(
                "Error occurred: {}",
                failure_text(&e)
            )))
        }
    };

    let message = match &outcome {
        ChatOutcome::Replied(m) | ChatOutcome::Failed(m) => m.clone(),
        ChatOutcome::Ignored => return outcome,
    };
    registry
        .lock()
        .await
        .apply_to(conversation_id, |session| session.append_message(message))
        .await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_text_prefers_server_body() {
        let err = AiError::Status {
            status: 500,
            body: "An error occurred processing your message.".into(),
        };
        assert_eq!(failure_text(&err), "An error occurred processing your message.");
        assert_eq!(
            failure_text(&AiError::NoResponse("connection refused".into())),
            "No response received: connection refused"
        );
    }
}
