//! # Vision Model Module
//!
//! Single-shot multimodal requests (prompt + image) to a generative model.
//! Credentials and the model name travel with each request; the client only
//! holds the HTTP connection pool and base URL.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::TransportError;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// One prompt + image request
#[derive(Clone)]
pub struct VisionRequest<'a> {
    pub api_key: &'a str,
    pub model: &'a str,
    pub prompt: &'a str,
    pub image: &'a [u8],
    pub mime_type: &'a str,
}

/// Generative model able to answer a prompt about an image
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Free-text answer of the model
    async fn generate(&self, request: VisionRequest<'_>) -> Result<String, TransportError>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Google Gemini `generateContent` client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    async fn generate(&self, request: VisionRequest<'_>) -> Result<String, TransportError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: request.prompt,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: request.mime_type,
                            data: BASE64.encode(request.image),
                        },
                    },
                ],
            }],
        };

        debug!(model = request.model, image_bytes = request.image.len(), "Calling vision model");
        let response = self
            .http
            .post(self.endpoint(request.model))
            .header(API_KEY_HEADER, request.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "Vision model request rejected");
            return Err(TransportError::Model(format!("HTTP {status}: {detail}")));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(TransportError::Model("empty model response".to_string()));
        }
        Ok(text)
    }
}
