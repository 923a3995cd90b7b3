use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One categorization call: the rulebook, the post descriptors as JSON text,
/// and decoding parameters.
#[derive(Debug, Clone)]
pub struct CategorizationRequest {
    pub model: String,
    pub system_instruction: String,
    pub user_message: String,
    pub temperature: f32,
}

/// The external model behind the classifier. Returns the raw response text,
/// expected to be JSON.
#[async_trait]
pub trait CategorizationService: Send + Sync {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, GEMINI_API_URL)
    }

    /// `base_url` is the models collection; requests go to
    /// `{base_url}/{model}:generateContent`.
    pub fn with_base_url(api_key: String, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Concatenates the text parts of every candidate. Blank output is an error.
fn response_text(response: GenerateContentResponse) -> Result<String> {
    let text = response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .collect::<String>();

    if text.trim().is_empty() {
        return Err(AppError::ClassifierApi("empty response".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl CategorizationService for GeminiClient {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<String> {
        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(request.system_instruction.clone()),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.user_message.clone()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(format!("{}/{}:generateContent", self.base_url, request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::ClassifierApi(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        response_text(parsed)
    }
}
