//! API module
//!
//! This module provides the outer surfaces of the idea tree: the HTTP
//! server and the clients that talk to it or to an in-process core.

pub mod client;
pub mod server;

// Re-export commonly used types
pub use client::{Client, ClientConfig, ClientError, CoreClient, HttpClientImpl};
pub use server::{serve, ServerConfig};
