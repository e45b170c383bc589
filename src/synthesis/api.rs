//! Chat completion synthesizer (OpenAI-compatible).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{ApiSynthesisConfig, API_KEY_ENV};
use crate::error::{Result, SynthesisError};

use super::traits::Synthesizer;
use super::types::{SynthesisRequest, SynthesisResponse};

/// Synthesizer backed by a chat completion endpoint returning JSON.
pub struct ApiSynthesizer {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI error response format.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl ApiSynthesizer {
    /// Create a synthesizer from configuration.
    pub fn from_config(config: &ApiSynthesisConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .ok_or_else(|| {
                SynthesisError::Api(format!(
                    "API key not provided and {} env var not set",
                    API_KEY_ENV
                ))
            })?;

        let mut synthesizer =
            Self::new(&config.base_url, &config.model, &api_key, config.timeout_secs)?;
        synthesizer.temperature = config.temperature;
        Ok(synthesizer)
    }

    /// Create a synthesizer with explicit parameters.
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SynthesisError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            temperature: 0.2,
            timeout_secs,
        })
    }

    fn system_prompt(request: &SynthesisRequest) -> String {
        let mut prompt = String::new();
        prompt.push_str(&request.guidance.instructions);
        prompt.push_str("\n\n");
        prompt.push_str(&request.guidance.weighting_rules);
        if !request.guidance.categories.is_empty() {
            prompt.push_str("\n\nAllowed categories:\n");
            for (name, description) in &request.guidance.categories {
                prompt.push_str(&format!("- {}: {}\n", name, description));
            }
        }
        prompt.push_str(
            "\n\nRespond with a JSON object: {\"knowledge_units\": [{\"fragment_ids\": [..], \
             \"title\": .., \"summary\": .., \"category\": .., \"content\": .., \
             \"confidence\": \"high|medium|low\", \"confidence_comment\": .., \
             \"clustering_rationale\": ..}], \"message\": ..}",
        );
        prompt
    }

    async fn complete(&self, request: &SynthesisRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let fragments = serde_json::to_string(&request.fragments)?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::system_prompt(request),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: fragments,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    SynthesisError::Api(format!("Connection failed: {}", e))
                } else {
                    SynthesisError::Api(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();

        if status.is_success() {
            let result: ChatResponse = response.json().await.map_err(|e| {
                SynthesisError::MalformedResponse(format!("Failed to parse response: {}", e))
            })?;
            result
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content)
                .ok_or_else(|| SynthesisError::MalformedResponse("no choices".to_string()).into())
        } else if status.as_u16() == 429 {
            Err(SynthesisError::RateLimited.into())
        } else {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                Err(SynthesisError::Api(format!(
                    "API error ({}): {}",
                    status, error_response.error.message
                ))
                .into())
            } else {
                Err(SynthesisError::Api(format!("API error ({}): {}", status, error_text)).into())
            }
        }
    }
}

/// Parse model output, tolerating a fenced code block around the JSON.
fn parse_response(content: &str) -> Result<SynthesisResponse> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim())
        .map_err(|e| SynthesisError::MalformedResponse(e.to_string()).into())
}

#[async_trait]
impl Synthesizer for ApiSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResponse> {
        let content = self.complete(request).await?;
        parse_response(&content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoalesceError;
    use crate::model::FragmentId;

    #[test]
    fn test_base_url_normalized() {
        let synthesizer =
            ApiSynthesizer::new("https://example.com/v1/", "test-model", "key", 5).unwrap();
        assert_eq!(synthesizer.base_url, "https://example.com/v1");
        assert_eq!(synthesizer.name(), "test-model");
    }

    #[test]
    fn test_missing_api_key() {
        if std::env::var(API_KEY_ENV).is_ok() {
            return;
        }
        let config = ApiSynthesisConfig::default();
        let result = ApiSynthesizer::from_config(&config);
        assert!(matches!(
            result,
            Err(CoalesceError::Synthesis(SynthesisError::Api(_)))
        ));
    }

    #[test]
    fn test_parse_fenced_response() {
        let content = "```json\n{\"knowledge_units\": [{\"fragment_ids\": [3, 4]}]}\n```";
        let response = parse_response(content).unwrap();
        assert_eq!(
            response.knowledge_units[0].fragment_ids,
            vec![FragmentId(3), FragmentId(4)]
        );
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let result = parse_response("I could not do that");
        assert!(matches!(
            result,
            Err(CoalesceError::Synthesis(SynthesisError::MalformedResponse(_)))
        ));
    }

    #[test]
    fn test_system_prompt_lists_categories() {
        let mut request = SynthesisRequest {
            guidance: Default::default(),
            fragments: vec![],
        };
        request
            .guidance
            .categories
            .insert("fact".to_string(), "A verifiable statement".to_string());
        let prompt = ApiSynthesizer::system_prompt(&request);
        assert!(prompt.contains("- fact: A verifiable statement"));
        assert!(prompt.contains("knowledge_units"));
    }
}
