// User-level operations the front end calls

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use crate::chat::{self, ChatOutcome};
use crate::image::PreparedImage;
use crate::models::{ConversationId, Message};
use crate::state::AppState;
use crate::upload::UploadReport;

/// One row of the conversation list.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub completed: bool,
    pub active: bool,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
}

/// Lists every known conversation, most recently updated first.
pub async fn list_conversations(state: &AppState) -> Vec<ConversationSummary> {
    log::info!("Front end requested to list conversations");
    let registry = state.registry.lock().await;
    let active_id = registry.active_id();
    registry
        .conversations()
        .into_iter()
        .map(|c| ConversationSummary {
            id: c.id,
            title: c.title(),
            completed: c.completed,
            active: c.id == active_id,
            last_updated: c.last_updated,
            message_count: c.transcript.len(),
        })
        .collect()
}

/// Messages of the active conversation.
pub async fn get_active_messages(state: &AppState) -> Vec<Message> {
    state.registry.lock().await.active().transcript().to_vec()
}

/// Archives the current conversation and starts a new one.
pub async fn new_chat(state: &AppState) -> ConversationId {
    let new_id = state.registry.lock().await.start_new().await;
    log::info!("New chat started: {}", new_id);
    new_id
}

/// Switches to a stored conversation. Unknown ids leave everything as it was.
pub async fn load_chat(state: &AppState, conversation_id: &str) -> Result<bool, String> {
    log::info!("Front end requested conversation ID: {}", conversation_id);

    let Ok(id) = ConversationId::parse(conversation_id.trim()) else {
        let err_msg = format!("Invalid conversation ID format: {}", conversation_id);
        log::error!("{}", err_msg);
        return Err(err_msg);
    };

    Ok(state.registry.lock().await.load_conversation(id).await)
}

/// Sends a text message to the model.
pub async fn send_message(state: &AppState, content: &str) -> ChatOutcome {
    chat::send_text(&state.registry, state.api_provider.as_ref(), content).await
}

/// Uploads an already prepared image (a `data:` URL).
pub async fn upload_image(
    state: &AppState,
    data_url: &str,
    note: Option<String>,
) -> Result<UploadReport, String> {
    let image = PreparedImage::from_data_url(data_url).map_err(|e| {
        log::error!("Rejected image upload: {}", e);
        format!("Failed to process image: {}", e)
    })?;
    Ok(state.uploads.submit(image, note).await)
}

/// Reads an image file from disk and uploads it.
pub async fn upload_image_file(
    state: &AppState,
    path: &Path,
    note: Option<String>,
) -> Result<UploadReport, String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        log::error!("Failed to read image {}: {:?}", path.display(), e);
        format!("Failed to read image {}: {}", path.display(), e)
    })?;
    let mime = PreparedImage::mime_for_extension(
        path.extension().and_then(|e| e.to_str()).unwrap_or_default(),
    );
    let image = PreparedImage::from_bytes(mime, bytes).map_err(|e| {
        log::error!("Rejected image upload: {}", e);
        format!("Failed to process image: {}", e)
    })?;
    Ok(state.uploads.submit(image, note).await)
}
