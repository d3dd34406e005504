//! HTTP client implementation
//!
//! Speaks the JSON envelope served by [`crate::api::server`].

use std::sync::Arc;

use reqwest::{header, Client as ReqwestClient, Error as ReqwestError, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::Client;
use crate::api::server::StatusResponse;
use crate::command::{Command, CommandOutcome};
use crate::core::{Export, TreeView};
use crate::models::{PromptLog, Settings};

/// API client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Generic API response structure
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] ReqwestError),

    #[error("API error: {0}")]
    Api(String),

    #[error("Missing data in response")]
    MissingData,
}

/// HTTP client for a running server
#[derive(Debug, Clone)]
pub struct HttpClientImpl {
    http_client: Arc<ReqwestClient>,
    config: ClientConfig,
}

impl HttpClientImpl {
    /// Create a new client with default configuration
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            http_client: Arc::new(ReqwestClient::new()),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.http_client.get(self.url(path)).send().await?;
        parse_response(response).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }
}

impl Default for HttpClientImpl {
    fn default() -> Self {
        Self::new()
    }
}

/// Unwraps the envelope. Error statuses still carry an envelope with the
/// server's message.
async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let body = response.text().await?;

    match serde_json::from_str::<ApiResponse<T>>(&body) {
        Ok(api_response) if api_response.success => {
            api_response.data.ok_or(ClientError::MissingData)
        }
        Ok(api_response) => Err(ClientError::Api(
            api_response
                .error
                .unwrap_or_else(|| "Unknown API error".to_string()),
        )),
        Err(_) if !status.is_success() => Err(ClientError::Api(format!("HTTP error: {}", status))),
        Err(e) => Err(ClientError::Api(format!("Malformed response: {}", e))),
    }
}

/// Pulls `filename="..."` out of a Content-Disposition header
fn disposition_file_name(value: &str) -> Option<String> {
    let start = value.find("filename=\"")? + "filename=\"".len();
    let rest = &value[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[async_trait::async_trait]
impl Client for HttpClientImpl {
    async fn get_tree(&self) -> Result<TreeView, ClientError> {
        self.get("/api/tree").await
    }

    async fn command(&self, command: Command) -> Result<CommandOutcome, ClientError> {
        self.post("/api/command", &command).await
    }

    async fn export(&self) -> Result<Export, ClientError> {
        let response = self.http_client.get(self.url("/api/export")).send().await?;
        if !response.status().is_success() {
            return parse_response::<Export>(response).await;
        }

        let file_name = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_file_name)
            .unwrap_or_else(|| "tree.json".to_string());
        let contents = response.text().await?;
        Ok(Export {
            file_name,
            contents,
        })
    }

    async fn logs(&self) -> Result<Vec<PromptLog>, ClientError> {
        self.get("/api/logs").await
    }

    async fn settings(&self) -> Result<Settings, ClientError> {
        self.get("/api/settings").await
    }

    async fn set_instruction(&self, instruction: String) -> Result<Settings, ClientError> {
        #[derive(Serialize)]
        struct SettingsRequest {
            instruction: String,
        }

        self.post("/api/settings", &SettingsRequest { instruction })
            .await
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.get("/api/status").await
    }
}
