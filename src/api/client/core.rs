//! Core client implementation
//!
//! This module provides a client implementation that wraps Core directly,
//! providing the same interface as HttpClientImpl but without HTTP overhead.

use super::{Client, ClientError};
use crate::api::server::StatusResponse;
use crate::command::{Command, CommandOutcome};
use crate::core::{CoreError, Export, TreeView};
use crate::models::{PromptLog, Settings};
use crate::Core;

/// A client implementation that wraps Core directly
#[derive(Clone)]
pub struct CoreClient {
    core: Core,
}

impl CoreClient {
    /// Create a new CoreClient with the given Core instance
    pub fn new(core: Core) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Core {
        &self.core
    }
}

/// Convert CoreError to ClientError for interface compatibility
impl From<CoreError> for ClientError {
    fn from(error: CoreError) -> Self {
        ClientError::Api(error.to_string())
    }
}

#[async_trait::async_trait]
impl Client for CoreClient {
    async fn get_tree(&self) -> Result<TreeView, ClientError> {
        Ok(self.core.view())
    }

    async fn command(&self, command: Command) -> Result<CommandOutcome, ClientError> {
        self.core.dispatch(command).await.map_err(ClientError::from)
    }

    async fn export(&self) -> Result<Export, ClientError> {
        self.core.export().map_err(ClientError::from)
    }

    async fn logs(&self) -> Result<Vec<PromptLog>, ClientError> {
        Ok(self.core.logs())
    }

    async fn settings(&self) -> Result<Settings, ClientError> {
        Ok(self.core.settings())
    }

    async fn set_instruction(&self, instruction: String) -> Result<Settings, ClientError> {
        Ok(self.core.set_instruction(&instruction))
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        let view = self.core.view();
        Ok(StatusResponse {
            any_expanding: view.any_expanding,
            status: view.status,
            can_undo: view.can_undo,
            can_redo: view.can_redo,
        })
    }
}
