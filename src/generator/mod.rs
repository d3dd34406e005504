//! Generator module
//!
//! The generator is the external text-generation collaborator: given a
//! node's text it proposes child ideas, or rewrites the text itself. The
//! [`Generator`] trait is the seam; [`GeminiGenerator`] is the shipped
//! implementation.

mod gemini;
pub mod prompts;

pub use gemini::{GeminiConfig, GeminiGenerator};

use crate::models::ExpandMode;

/// Ideas proposed for a node, with the exact prompt sent for the log
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub ideas: Vec<String>,
    pub prompt: String,
}

/// A rewritten node text, with the exact prompt sent for the log
#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    pub text: String,
    pub prompt: String,
}

/// Generator errors
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse generator response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("empty response from generator")]
    EmptyResponse,

    #[error("generator did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("no API key configured")]
    MissingApiKey,
}

/// Trait defining the generator interface
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Proposes child ideas for `text`. Fails on transport or parse errors.
    async fn expand(
        &self,
        text: &str,
        mode: ExpandMode,
        context: &[String],
        instruction: &str,
    ) -> Result<Expansion, GeneratorError>;

    /// Rewrites `text`. Implementations soft-fail by returning the original
    /// text unchanged rather than an error.
    async fn refine(&self, text: &str, instruction: &str) -> Result<Refinement, GeneratorError>;
}

/// Trims ideas and drops blank ones
pub fn clean_ideas(ideas: Vec<String>) -> Vec<String> {
    ideas
        .into_iter()
        .map(|idea| idea.trim().to_string())
        .filter(|idea| !idea.is_empty())
        .collect()
}
