//! Client trait definition
//!
//! This module defines the `Client` trait that abstracts over different client implementations.

use super::ClientError;
use crate::api::server::StatusResponse;
use crate::command::{Command, CommandOutcome};
use crate::core::{Export, TreeView};
use crate::models::{PromptLog, Settings};

/// Trait defining the client interface for the idea tree
#[async_trait::async_trait]
pub trait Client {
    /// Get the tree with its derived view state
    async fn get_tree(&self) -> Result<TreeView, ClientError>;

    /// Run a single command
    async fn command(&self, command: Command) -> Result<CommandOutcome, ClientError>;

    /// Download the tree as JSON
    async fn export(&self) -> Result<Export, ClientError>;

    /// Prompt log entries, newest first
    async fn logs(&self) -> Result<Vec<PromptLog>, ClientError>;

    async fn settings(&self) -> Result<Settings, ClientError>;

    async fn set_instruction(&self, instruction: String) -> Result<Settings, ClientError>;

    /// Request-gate summary
    async fn status(&self) -> Result<StatusResponse, ClientError>;
}
