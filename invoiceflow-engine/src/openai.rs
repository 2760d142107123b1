/// OpenAI chat completions client
///
/// Thin wrapper over the HTTP API covering the two call shapes the app
/// needs: vision extraction over an invoice image and plain text chat.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompt;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const EXTRACTION_MAX_TOKENS: u32 = 2000;
const EXTRACTION_TEMPERATURE: f64 = 0.1;

pub const CHAT_MODEL: &str = "gpt-4o";
const CHAT_MAX_TOKENS: u32 = 500;
const CHAT_TEMPERATURE: f64 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    #[error("request to OpenAI failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("OpenAI response contained no choices")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<OutgoingMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: IncomingMessage,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// A completed call with the token usage needed for cost accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Completion {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    /// Mainly for pointing tests at a mock server.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_key,
            base_url,
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, OpenAiError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, "calling OpenAI chat completions");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OpenAiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: CompletionResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(OpenAiError::EmptyResponse)?;

        Ok(Completion {
            content,
            prompt_tokens: body.usage.prompt_tokens,
            completion_tokens: body.usage.completion_tokens,
        })
    }

    /// Extracts invoice data from a JPEG image, passed base64 encoded.
    pub async fn extract_from_image(
        &self,
        model: &str,
        image_base64: &str,
    ) -> Result<Completion, OpenAiError> {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: vec![
                OutgoingMessage {
                    role: "system",
                    content: MessageContent::Text(prompt::EXTRACTION_SYSTEM_PROMPT.to_string()),
                },
                OutgoingMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: prompt::EXTRACTION_IMAGE_PROMPT.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:image/jpeg;base64,{}", image_base64),
                                detail: "high",
                            },
                        },
                    ]),
                },
            ],
            max_tokens: EXTRACTION_MAX_TOKENS,
            temperature: EXTRACTION_TEMPERATURE,
        };

        self.complete(request).await
    }

    /// Extracts invoice data from text pulled out of a PDF.
    pub async fn extract_from_text(
        &self,
        model: &str,
        document_text: &str,
    ) -> Result<Completion, OpenAiError> {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: vec![
                OutgoingMessage {
                    role: "system",
                    content: MessageContent::Text(prompt::EXTRACTION_SYSTEM_PROMPT.to_string()),
                },
                OutgoingMessage {
                    role: "user",
                    content: MessageContent::Text(prompt::extraction_text_prompt(document_text)),
                },
            ],
            max_tokens: EXTRACTION_MAX_TOKENS,
            temperature: EXTRACTION_TEMPERATURE,
        };

        self.complete(request).await
    }

    /// Answers a financial question against a pre-built context summary.
    pub async fn chat(
        &self,
        financial_context: &str,
        question: &str,
    ) -> Result<Completion, OpenAiError> {
        let request = CompletionRequest {
            model: CHAT_MODEL.to_string(),
            messages: vec![
                OutgoingMessage {
                    role: "system",
                    content: MessageContent::Text(prompt::chat_system_prompt(financial_context)),
                },
                OutgoingMessage {
                    role: "user",
                    content: MessageContent::Text(question.to_string()),
                },
            ],
            max_tokens: CHAT_MAX_TOKENS,
            temperature: CHAT_TEMPERATURE,
        };

        self.complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_vision_parts() {
        let request = CompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![OutgoingMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "hola".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/jpeg;base64,AAAA".to_string(),
                            detail: "high",
                        },
                    },
                ]),
            }],
            max_tokens: 2000,
            temperature: 0.1,
        };

        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["messages"][0]["content"];

        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["detail"], "high");
    }

    #[test]
    fn test_response_parses_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "{}"}}],
            "usage": {"prompt_tokens": 1200, "completion_tokens": 340, "total_tokens": 1540}
        }"#;

        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.usage.prompt_tokens, 1200);
        assert_eq!(parsed.usage.completion_tokens, 340);
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{}")
        );
    }

    #[test]
    fn test_response_without_usage_defaults_to_zero() {
        let body = r#"{"choices": [{"message": {"content": "ok"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();

        assert_eq!(parsed.usage.prompt_tokens, 0);
    }
}
