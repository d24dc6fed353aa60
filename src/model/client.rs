use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::config::{RepairProvider, StudioSettings};

/// Low temperature keeps code output close to deterministic.
pub const COMPLETION_TEMPERATURE: f32 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum ModelClientError {
    #[error("model request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("response missing field: {field}")]
    MissingField { field: &'static str },

    #[error("response format error: {0}")]
    ResponseFormat(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
}

impl MessageRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ModelMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ModelMessage>,
}

impl ChatRequest {
    pub fn from_prompts(model: &str, system_prompt: &str, user_prompt: &str) -> Self {
        Self {
            model: model.to_owned(),
            messages: vec![
                ModelMessage::new(MessageRole::System, system_prompt),
                ModelMessage::new(MessageRole::User, user_prompt),
            ],
        }
    }

    fn system_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|message| message.role == MessageRole::System)
            .map(|message| message.content.as_str())
    }
}

/// Completion text, trimmed. May be empty; callers decide what an empty
/// completion means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub text: String,
}

impl ChatResponse {
    fn from_text(content: impl Into<String>) -> Self {
        Self {
            text: content.into().trim().to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelClient {
    http_client: reqwest::Client,
    settings: StudioSettings,
}

impl ModelClient {
    pub fn new(settings: StudioSettings) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &StudioSettings {
        &self.settings
    }

    /// Sends one completion request. There is no retry: a failure goes
    /// straight back to the caller.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChatResponse, ModelClientError> {
        let request =
            ChatRequest::from_prompts(&self.settings.repair_model, system_prompt, user_prompt);
        let timeout_duration = Duration::from_millis(self.settings.repair_timeout_ms);
        match timeout(timeout_duration, self.chat_by_provider(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelClientError::Timeout {
                timeout_ms: self.settings.repair_timeout_ms,
            }),
        }
    }

    async fn chat_by_provider(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ModelClientError> {
        match self.settings.repair_provider {
            RepairProvider::Gemini => self.chat_gemini(request).await,
            RepairProvider::OpenAi => self.chat_openai(request).await,
            RepairProvider::Ollama => self.chat_ollama(request).await,
        }
    }

    async fn chat_gemini(&self, request: &ChatRequest) -> Result<ChatResponse, ModelClientError> {
        let api_key = self.settings.gemini_api_key.as_deref().ok_or_else(|| {
            ModelClientError::Configuration("GEMINI_API_KEY is required".to_owned())
        })?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.gemini_base_url, request.model
        );
        let provider_request = GeminiGenerateRequest::from_common_request(request);

        debug!(url = %url, model = %request.model, "sending generateContent request to gemini");

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&provider_request)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let payload: GeminiGenerateResponse = response.json().await?;
        let candidate = payload
            .candidates
            .first()
            .ok_or(ModelClientError::MissingField {
                field: "candidates[0]",
            })?;
        let content = candidate
            .content
            .as_ref()
            .ok_or(ModelClientError::MissingField {
                field: "candidates[0].content",
            })?;

        let text = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        Ok(ChatResponse::from_text(text))
    }

    async fn chat_openai(&self, request: &ChatRequest) -> Result<ChatResponse, ModelClientError> {
        let api_key = self.settings.openai_api_key.as_deref().ok_or_else(|| {
            ModelClientError::Configuration("OPENAI_API_KEY is required".to_owned())
        })?;

        let url = format!("{}/chat/completions", self.settings.openai_base_url);
        let provider_request = OpenAiChatRequest::from_common_request(request);

        debug!(url = %url, model = %request.model, "sending chat request to openai");

        let response = self
            .post_json(&url, Some(api_key), &provider_request)
            .await?;
        let payload: OpenAiChatResponse = response.json().await?;
        let choice = payload
            .choices
            .first()
            .ok_or(ModelClientError::MissingField {
                field: "choices[0]",
            })?;

        let content = match choice.message.content.as_ref() {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(value) => extract_openai_content_text(value).ok_or_else(|| {
                ModelClientError::ResponseFormat(
                    "unable to extract assistant content from OpenAI response".to_owned(),
                )
            })?,
        };

        Ok(ChatResponse::from_text(content))
    }

    async fn chat_ollama(&self, request: &ChatRequest) -> Result<ChatResponse, ModelClientError> {
        let url = format!("{}/api/chat", self.settings.ollama_base_url);
        let provider_request = OllamaChatRequest::from_common_request(request);

        debug!(url = %url, model = %request.model, "sending chat request to ollama");

        let response = self.post_json(&url, None, &provider_request).await?;
        let payload: OllamaChatResponse = response.json().await?;
        if let Some(error_message) = payload.error {
            return Err(ModelClientError::ResponseFormat(error_message));
        }

        let message = payload
            .message
            .ok_or(ModelClientError::MissingField { field: "message" })?;
        Ok(ChatResponse::from_text(message.content))
    }

    async fn post_json<T: Serialize>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        body: &T,
    ) -> Result<reqwest::Response, ModelClientError> {
        let mut request = self.http_client.post(url).json(body);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        ensure_success(response).await
    }
}

async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ModelClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error response body>".to_owned());
    Err(ModelClientError::HttpStatus { status, body })
}

fn extract_openai_content_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.to_owned()),
        serde_json::Value::Array(parts) => {
            let mut output = String::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(|text| text.as_str()) {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(text);
                }
            }
            Some(output)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ProviderMessage {
    role: String,
    content: String,
}

impl From<&ModelMessage> for ProviderMessage {
    fn from(message: &ModelMessage) -> Self {
        Self {
            role: message.role.as_str().to_owned(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct OllamaChatRequest {
    model: String,
    stream: bool,
    messages: Vec<ProviderMessage>,
    options: OllamaOptions,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct OllamaOptions {
    temperature: f32,
}

impl OllamaChatRequest {
    fn from_common_request(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            stream: false,
            messages: request.messages.iter().map(ProviderMessage::from).collect(),
            options: OllamaOptions {
                temperature: COMPLETION_TEMPERATURE,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaResponseMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ProviderMessage>,
    temperature: f32,
}

impl OpenAiChatRequest {
    fn from_common_request(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(ProviderMessage::from).collect(),
            temperature: COMPLETION_TEMPERATURE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiRequestPart>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct GeminiRequestPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct GeminiGenerationConfig {
    temperature: f32,
}

impl GeminiGenerateRequest {
    fn from_common_request(request: &ChatRequest) -> Self {
        let system_instruction = request.system_text().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiRequestPart {
                text: text.to_owned(),
            }],
        });
        let contents = request
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::User)
            .map(|message| GeminiContent {
                role: Some("user".to_owned()),
                parts: vec![GeminiRequestPart {
                    text: message.content.clone(),
                }],
            })
            .collect();

        Self {
            system_instruction,
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: COMPLETION_TEMPERATURE,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiGenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_request_builds_expected_messages() {
        let request = ChatRequest::from_prompts("model-a", "system prompt", "user prompt");

        assert_eq!(request.model, "model-a");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.messages[0].content, "system prompt");
        assert_eq!(request.messages[1].role, MessageRole::User);
        assert_eq!(request.messages[1].content, "user prompt");
    }

    #[test]
    fn provider_requests_share_same_message_conversion() {
        let request = ChatRequest::from_prompts("m", "s", "u");
        let ollama = OllamaChatRequest::from_common_request(&request);
        let openai = OpenAiChatRequest::from_common_request(&request);

        assert_eq!(ollama.model, "m");
        assert_eq!(openai.model, "m");
        assert_eq!(
            ollama.messages,
            vec![
                ProviderMessage {
                    role: "system".to_owned(),
                    content: "s".to_owned(),
                },
                ProviderMessage {
                    role: "user".to_owned(),
                    content: "u".to_owned(),
                },
            ]
        );
        assert_eq!(openai.messages, ollama.messages);
        assert_eq!(openai.temperature, COMPLETION_TEMPERATURE);
    }

    #[test]
    fn gemini_request_moves_system_prompt_into_instruction() {
        let request = ChatRequest::from_prompts("gemini-x", "be terse", "fix this");
        let gemini = GeminiGenerateRequest::from_common_request(&request);
        let body = serde_json::to_value(&gemini).expect("gemini request should serialize");

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "fix this");
        let temperature = body["generationConfig"]["temperature"]
            .as_f64()
            .expect("temperature should be a number");
        assert!((temperature - 0.1).abs() < 1e-6);
    }

    #[test]
    fn gemini_response_tolerates_missing_candidates() {
        let payload: GeminiGenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#)
                .expect("payload should deserialize");
        assert!(payload.candidates.is_empty());
    }

    #[test]
    fn extract_openai_content_from_string() {
        let value = serde_json::Value::String("hello world".to_owned());
        let text = extract_openai_content_text(&value);
        assert_eq!(text.as_deref(), Some("hello world"));
    }

    #[test]
    fn extract_openai_content_from_array_parts() {
        let value = serde_json::json!([
            {"type": "output_text", "text": "line one"},
            {"type": "output_text", "text": "line two"}
        ]);

        let text = extract_openai_content_text(&value);
        assert_eq!(text.as_deref(), Some("line one\nline two"));
    }

    #[tokio::test]
    async fn hosted_provider_without_key_fails_before_sending() {
        let mut settings = crate::test_support::settings_for_test();
        for (provider, key_name) in [
            (RepairProvider::Gemini, "GEMINI_API_KEY"),
            (RepairProvider::OpenAi, "OPENAI_API_KEY"),
        ] {
            settings.repair_provider = provider;
            let error = ModelClient::new(settings.clone())
                .chat("system", "user")
                .await
                .expect_err("missing key should fail");
            match error {
                ModelClientError::Configuration(message) => {
                    assert!(message.contains(key_name), "{message}");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn chat_response_trims_but_keeps_empty_text() {
        assert_eq!(ChatResponse::from_text("  graph TD\n").text, "graph TD");
        assert_eq!(ChatResponse::from_text(" \n ").text, "");
    }
}
