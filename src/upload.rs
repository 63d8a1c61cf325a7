use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::LLMApiProvider;
use crate::error::{classify, AiError, AiResult, FailureCategory};
use crate::image::PreparedImage;
use crate::models::{ConversationId, Message};
use crate::prompts;
use crate::registry::SharedRegistry;

/// Retry budget and deadline for one image upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, so at most `max_retries + 1` calls
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Deadline for one attempt, covering both model calls
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(90),
        }
    }
}

/// Waits between retries. Tests swap in one that returns immediately.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Lifecycle of one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Sent { attempt: u32 },
    Retrying { attempt: u32 },
    Success,
    Failed(FailureCategory),
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Success | UploadState::Failed(_))
    }

    /// Transition taken once the current attempt finished; `failure` is `None` on success.
    ///
    /// Idle and terminal states do not move.
    pub fn advance(&self, failure: Option<&FailureCategory>, policy: &RetryPolicy) -> UploadState {
        let attempt = match self {
            UploadState::Sent { attempt } | UploadState::Retrying { attempt } => *attempt,
            other => return other.clone(),
        };
        match failure {
            None => UploadState::Success,
            Some(category) if category.is_transient() && attempt < policy.max_retries => {
                UploadState::Retrying {
                    attempt: attempt + 1,
                }
            }
            Some(category) => UploadState::Failed(category.clone()),
        }
    }
}

/// Where an upload's results go: fixed when the upload is submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingUpload {
    pub conversation_id: ConversationId,
    pub placeholder_id: Uuid,
}

/// Terminal outcome of one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub conversation_id: ConversationId,
    pub state: UploadState,
    pub attempts: u32,
    /// The model message that replaced the placeholder
    pub message: Message,
}

/// Drives identify -> suggest for uploaded food photos.
#[derive(Clone)]
pub struct UploadOrchestrator {
    registry: SharedRegistry,
    provider: Arc<dyn LLMApiProvider>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl UploadOrchestrator {
    pub fn new(
        registry: SharedRegistry,
        provider: Arc<dyn LLMApiProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            provider,
            sleeper: Arc::new(TokioSleeper),
            policy,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Runs one upload to completion. Never fails: every outcome ends up in the transcript.
    pub async fn submit(&self, image: PreparedImage, note: Option<String>) -> UploadReport {
        let pending = self.begin(&image, note.as_deref()).await;
        self.drive(pending, &image, note.as_deref()).await
    }

    /// Appends the image message and its placeholder to the active conversation.
    pub async fn begin(&self, image: &PreparedImage, note: Option<&str>) -> PendingUpload {
        let text = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(prompts::DEFAULT_IMAGE_PROMPT);
        let placeholder = Message::placeholder(prompts::ANALYZING_PLACEHOLDER);
        let placeholder_id = placeholder.id;

        let mut registry = self.registry.lock().await;
        let conversation_id = registry.active_id();
        registry
            .append_messages([Message::user_image(text, image.reference()), placeholder])
            .await;
        log::info!(
            "Image upload submitted to conversation {} ({} bytes)",
            conversation_id,
            image.bytes().len()
        );

        PendingUpload {
            conversation_id,
            placeholder_id,
        }
    }

    /// The retry loop. The registry lock is only taken between model calls.
    pub async fn drive(
        &self,
        pending: PendingUpload,
        image: &PreparedImage,
        note: Option<&str>,
    ) -> UploadReport {
        let mut state = UploadState::Sent { attempt: 0 };
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = self.attempt_call(image, note).await.map_err(|e| {
                log::error!("Image processing attempt {} failed: {}", attempts, e);
                classify(&e)
            });
            state = state.advance(result.as_ref().err(), &self.policy);

            if let UploadState::Retrying { attempt } = state {
                let text = prompts::retry_placeholder(attempt + 1);
                self.registry
                    .lock()
                    .await
                    .apply_to(pending.conversation_id, |session| {
                        session.update_placeholder_text(pending.placeholder_id, &text);
                    })
                    .await;
                log::warn!(
                    "Retrying upload in {:?} ({})",
                    self.policy.retry_delay,
                    text
                );
                self.sleeper.sleep(self.policy.retry_delay).await;
                continue;
            }

            let final_message = match result {
                Ok(text) => Message::model(text),
                Err(category) => Message::model(category.upload_message()),
            };
            let recorded = final_message.clone();
            self.registry
                .lock()
                .await
                .apply_to(pending.conversation_id, |session| {
                    session.replace_processing_placeholder(
                        |m| m.id == pending.placeholder_id,
                        recorded,
                    );
                })
                .await;
            log::info!(
                "Upload for conversation {} finished as {:?} after {} attempt(s)",
                pending.conversation_id,
                state,
                attempts
            );

            return UploadReport {
                conversation_id: pending.conversation_id,
                state,
                attempts,
                message: final_message,
            };
        }
    }

    /// Both phases under one deadline. Running out of time counts as a timeout.
    async fn attempt_call(&self, image: &PreparedImage, note: Option<&str>) -> AiResult<String> {
        let exchange = async {
            let food_items = self
                .provider
                .identify(image, &prompts::identification_prompt(note))
                .await?;
            log::info!("Food identification completed");
            let recipes = self
                .provider
                .suggest(&prompts::recipe_prompt(&food_items))
                .await?;
            log::info!("Recipe generation completed");
            Ok::<String, AiError>(prompts::combined_result(&food_items, &recipes))
        };

        match tokio::time::timeout(self.policy.attempt_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AiError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransientKind;

    const TIMEOUT: FailureCategory = FailureCategory::Transient(TransientKind::Timeout);

    #[test]
    fn success_from_any_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            UploadState::Sent { attempt: 0 }.advance(None, &policy),
            UploadState::Success
        );
        assert_eq!(
            UploadState::Retrying { attempt: 2 }.advance(None, &policy),
            UploadState::Success
        );
    }

    #[test]
    fn transient_failures_retry_until_budget() {
        let policy = RetryPolicy::default();
        let mut state = UploadState::Sent { attempt: 0 };
        let mut calls = 0;
        while !state.is_terminal() {
            calls += 1;
            state = state.advance(Some(&TIMEOUT), &policy);
        }
        assert_eq!(calls, 3);
        assert_eq!(state, UploadState::Failed(TIMEOUT));
    }

    #[test]
    fn non_transient_failures_stop_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            UploadState::Sent { attempt: 0 }.advance(Some(&FailureCategory::Quota), &policy),
            UploadState::Failed(FailureCategory::Quota)
        );
    }

    #[test]
    fn idle_and_terminal_states_do_not_move() {
        let policy = RetryPolicy::default();
        assert_eq!(UploadState::Idle.advance(None, &policy), UploadState::Idle);
        assert_eq!(
            UploadState::Success.advance(Some(&TIMEOUT), &policy),
            UploadState::Success
        );
    }

    #[test]
    fn zero_retry_budget_fails_on_first_transient() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(
            UploadState::Sent { attempt: 0 }.advance(Some(&TIMEOUT), &policy),
            UploadState::Failed(TIMEOUT)
        );
    }
}
