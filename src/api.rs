use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::{AiError, AiResult};
use crate::image::PreparedImage;
use crate::models::{HistoryTurn, Role};

// Trait defining the interface for LLM API providers
#[async_trait]
pub trait LLMApiProvider: Send + Sync {
    /// One chat turn: prior history plus the new user message, returns the reply text.
    async fn send_chat(&self, history: &[HistoryTurn], message: &str) -> AiResult<String>;

    /// Phase 1 of an upload: describe what is in the image.
    async fn identify(&self, image: &PreparedImage, prompt: &str) -> AiResult<String>;

    /// Phase 2 of an upload: text-only generation from the phase 1 context.
    async fn suggest(&self, context: &str) -> AiResult<String>;
}

// --- Gemini generateContent Implementation ---

#[derive(Serialize, Debug)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize, Debug)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidateContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorDetail {
    code: Option<u16>,
    message: String,
    status: Option<String>,
}

fn text_content(role: Role, text: &str) -> GeminiContent {
    GeminiContent {
        role: role.as_str(),
        parts: vec![GeminiPart::Text {
            text: text.to_string(),
        }],
    }
}

/// Human-readable text of a failed response: Gemini's `error.message` when the body is
/// the usual error envelope, otherwise the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<GeminiErrorResponse>(body) {
        Ok(GeminiErrorResponse {
            error: Some(detail),
        }) if !detail.message.trim().is_empty() => {
            log::debug!(
                "Gemini error envelope: code {:?}, status {:?}",
                detail.code,
                detail.status
            );
            detail.message
        }
        _ => body.to_string(),
    }
}

/// Joins the text parts of the first candidate.
fn extract_text(body: &str) -> AiResult<String> {
    let response: GeminiResponse = serde_json::from_str(body)?;
    let text = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(AiError::Malformed(
            "response contained no candidate text".to_string(),
        ));
    }
    Ok(text)
}

pub struct GeminiProvider {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn generate(&self, contents: Vec<GeminiContent>) -> AiResult<String> {
        let request_url = format!("{}/models/{}:generateContent", self.api_url, self.model);
        log::info!(
            "Sending request to Gemini API: {} ({} content blocks)",
            request_url,
            contents.len()
        );

        let response = self
            .client
            .post(&request_url)
            .header("x-goog-api-key", &self.api_key)
            .json(&GeminiRequest { contents })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            log::error!("Gemini request failed with status {}: {}", status, body);
            // Status is kept as-is so quota and rate-limit classification still sees it
            return Err(AiError::Status {
                status: status.as_u16(),
                body: error_message(&body),
            });
        }

        extract_text(&body)
    }
}

#[async_trait]
impl LLMApiProvider for GeminiProvider {
    async fn send_chat(&self, history: &[HistoryTurn], message: &str) -> AiResult<String> {
        let mut contents: Vec<GeminiContent> = history
            .iter()
            .map(|turn| text_content(turn.role, &turn.text))
            .collect();
        contents.push(text_content(Role::User, message));
        self.generate(contents).await
    }

    async fn identify(&self, image: &PreparedImage, prompt: &str) -> AiResult<String> {
        log::debug!(
            "Identifying image ({} bytes, {})",
            image.bytes().len(),
            image.mime_type()
        );
        let content = GeminiContent {
            role: Role::User.as_str(),
            parts: vec![
                GeminiPart::Text {
                    text: prompt.to_string(),
                },
                GeminiPart::Inline {
                    inline_data: GeminiInlineData {
                        mime_type: image.mime_type().to_string(),
                        data: image.base64(),
                    },
                },
            ],
        };
        self.generate(vec![content]).await
    }

    async fn suggest(&self, context: &str) -> AiResult<String> {
        self.generate(vec![text_content(Role::User, context)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, FailureCategory};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn request_uses_gemini_wire_shape() {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![
                    GeminiPart::Text {
                        text: "what is this".into(),
                    },
                    GeminiPart::Inline {
                        inline_data: GeminiInlineData {
                            mime_type: "image/png".into(),
                            data: "aGVsbG8=".into(),
                        },
                    },
                ],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "what is this");
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
    }

    #[test]
    fn extracts_candidate_text() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Rice, "},{"text":"eggs"}]}}]}"#;
        assert_eq!(extract_text(body).unwrap(), "Rice, eggs");
    }

    #[test]
    fn error_envelope_yields_its_message() {
        let body = r#"{"error":{"code":400,"message":"Provided image is not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body), "Provided image is not valid.");
        assert_eq!(error_message("upstream connect error"), "upstream connect error");
        assert_eq!(error_message(r#"{"error":null}"#), r#"{"error":null}"#);
    }

    #[test]
    fn empty_or_invalid_bodies_are_malformed() {
        assert!(matches!(
            extract_text(r#"{"candidates":[]}"#),
            Err(AiError::Malformed(_))
        ));
        assert!(matches!(extract_text("not json"), Err(AiError::Malformed(_))));
    }

    fn provider_for(api_url: String) -> GeminiProvider {
        let config = ModelConfig {
            api_url,
            model: "gemini-test".to_string(),
            ..ModelConfig::default()
        };
        GeminiProvider::new(&config, "test-key".to_string()).unwrap()
    }

    async fn mock_gemini(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn photo() -> PreparedImage {
        PreparedImage::from_bytes("image/jpeg", vec![0xFF, 0xD8, 0xFF]).unwrap()
    }

    #[tokio::test]
    async fn success_returns_candidate_text() {
        let server = mock_gemini(
            200,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Rice and eggs"}]}}]}"#,
        )
        .await;
        let provider = provider_for(server.uri());

        assert_eq!(provider.identify(&photo(), "what is this").await.unwrap(), "Rice and eggs");
    }

    #[tokio::test]
    async fn error_status_carries_readable_message() {
        let server = mock_gemini(
            400,
            r#"{"error":{"code":400,"message":"Provided image is not valid.","status":"INVALID_ARGUMENT"}}"#,
        )
        .await;
        let provider = provider_for(server.uri());

        let err = provider.identify(&photo(), "what is this").await.unwrap_err();
        assert_eq!(
            err,
            AiError::Status {
                status: 400,
                body: "Provided image is not valid.".to_string()
            }
        );
        assert_eq!(
            classify(&err).upload_message(),
            "Error processing image: Provided image is not valid."
        );
    }

    #[tokio::test]
    async fn quota_envelope_still_classifies_as_quota() {
        let server = mock_gemini(
            429,
            r#"{"error":{"code":429,"message":"You exceeded your current quota, please check your plan.","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .await;
        let provider = provider_for(server.uri());

        let err = provider.suggest("rice").await.unwrap_err();
        assert_eq!(classify(&err), FailureCategory::Quota);
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let server = mock_gemini(200, r#"{"candidates":[]}"#).await;
        let provider = provider_for(server.uri());

        let err = provider.send_chat(&[], "hello").await.unwrap_err();
        assert!(matches!(err, AiError::Malformed(_)));
        assert!(!classify(&err).is_transient());
    }

    #[tokio::test]
    async fn refused_connection_is_no_response() {
        // Grab a free port, then close it so nothing is listening there
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let provider = provider_for(format!("http://{}", addr));

        let err = provider.suggest("rice").await.unwrap_err();
        assert!(matches!(err, AiError::NoResponse(_)), "got {:?}", err);
        assert!(classify(&err).is_transient());
    }
}
