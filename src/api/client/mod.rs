//! Client module
//!
//! This module provides clients for the idea tree: one speaking HTTP to a
//! running server, one wrapping an in-process [`crate::Core`].

mod core;
mod http;
mod trait_def;

// Re-export the trait and types
pub use self::core::CoreClient;
pub use self::http::{ClientConfig, ClientError, HttpClientImpl};
pub use self::trait_def::Client;
