//! Gemini generator
//!
//! Talks to the Generative Language REST API with reqwest.

use std::sync::Arc;

use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use super::prompts;
use super::{Expansion, Generator, GeneratorError, Refinement};
use crate::models::ExpandMode;

/// Gemini generator configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-3-flash-preview".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: String) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part { text: Some(text) }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdeasPayload {
    #[serde(default)]
    ideas: Vec<String>,
}

/// Parses the JSON body the model was asked to produce
fn parse_ideas(text: &str) -> Result<Vec<String>, GeneratorError> {
    let payload: IdeasPayload = serde_json::from_str(text.trim())?;
    Ok(payload.ideas)
}

/// Generator backed by the Gemini API
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    http_client: Arc<ReqwestClient>,
    config: GeminiConfig,
}

impl GeminiGenerator {
    /// Create a new generator with custom configuration
    pub fn with_config(config: GeminiConfig) -> Self {
        Self {
            http_client: Arc::new(ReqwestClient::new()),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, GeneratorError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GeneratorError::MissingApiKey)?;

        debug!(model = %self.config.model, "sending generation request");
        let response = self
            .http_client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = response.json().await?;
        body.text().ok_or(GeneratorError::EmptyResponse)
    }
}

#[async_trait::async_trait]
impl Generator for GeminiGenerator {
    async fn expand(
        &self,
        text: &str,
        mode: ExpandMode,
        context: &[String],
        instruction: &str,
    ) -> Result<Expansion, GeneratorError> {
        let system_instruction = prompts::expand_system_instruction(mode, instruction);
        let prompt = prompts::expand_prompt(text, context);
        let full_prompt = prompts::full_prompt(&system_instruction, &prompt);

        let request = GenerateRequest {
            system_instruction: Content::text(None, system_instruction),
            contents: vec![Content::text(Some("user"), prompt)],
            generation_config: Some(json!({
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "ideas": {
                            "type": "ARRAY",
                            "items": { "type": "STRING" },
                            "description": format!(
                                "A list of exactly {} expanded ideas",
                                prompts::IDEAS_PER_EXPANSION
                            ),
                        }
                    },
                    "required": ["ideas"],
                }
            })),
        };

        let raw = self.generate(&request).await.map_err(|e| {
            error!(error = %e, "expansion request failed");
            e
        })?;
        let ideas = parse_ideas(&raw)?;
        Ok(Expansion {
            ideas,
            prompt: full_prompt,
        })
    }

    async fn refine(&self, text: &str, instruction: &str) -> Result<Refinement, GeneratorError> {
        let system_instruction = prompts::refine_system_instruction(instruction);
        let prompt = prompts::refine_prompt(text);
        let full_prompt = prompts::full_prompt(&system_instruction, &prompt);

        let request = GenerateRequest {
            system_instruction: Content::text(None, system_instruction),
            contents: vec![Content::text(Some("user"), prompt)],
            generation_config: None,
        };

        // Refinement soft-fails: the original text comes back unchanged
        let refined = match self.generate(&request).await {
            Ok(raw) => raw.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "refine request failed, keeping original text");
                text.to_string()
            }
        };
        Ok(Refinement {
            text: refined,
            prompt: full_prompt,
        })
    }
}
