use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::llm::{LLMError, LLM};
use crate::schemas::Message;

use super::models::{ApiMessage, ApiResponse, Payload};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat-completions client for OpenAI-compatible endpoints.
///
/// The base URL is overrideable, so any provider speaking the same wire
/// format (local inference servers included) can stand in as the planner's
/// oracle.
#[derive(Clone)]
pub struct OpenAi {
    model: String,
    base_url: String,
    api_key: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl Default for OpenAi {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAi {
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn endpoint(&self) -> Result<Url, LLMError> {
        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        let url = Url::parse(&base)?.join("chat/completions")?;
        Ok(url)
    }

    fn build_payload(&self, messages: &[Message]) -> Payload {
        Payload {
            model: self.model.clone(),
            messages: messages.iter().map(ApiMessage::from_message).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl LLM for OpenAi {
    async fn generate(&self, messages: Vec<Message>) -> Result<String, LLMError> {
        let client = Client::new();
        let payload = self.build_payload(&messages);

        let res = client
            .post(self.endpoint()?)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json; charset=utf-8")
            .json(&payload)
            .send()
            .await?;

        let res = match res.status().as_u16() {
            401 => {
                return Err(LLMError::AuthenticationError(
                    "Invalid API Key".to_string(),
                ))
            }
            403 => {
                return Err(LLMError::PermissionError(
                    "Permission Denied".to_string(),
                ))
            }
            404 => return Err(LLMError::NotFoundError("Not Found".to_string())),
            429 => {
                return Err(LLMError::RateLimitError(
                    "Rate Limit Exceeded".to_string(),
                ))
            }
            503 => {
                return Err(LLMError::OverloadedError(
                    "Service Unavailable".to_string(),
                ))
            }
            status if status >= 400 => {
                let message = res.text().await.unwrap_or_default();
                return Err(LLMError::ApiError { status, message });
            }
            _ => res.json::<ApiResponse>().await?,
        };

        res.choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LLMError::ContentNotFound("choices[0].message.content".to_string()))
    }
}
