//! Thoughtree
//!
//! A state engine for an idea tree: a forest of short text nodes that can be
//! expanded with generated causes ("why") or components ("what"), refined,
//! collapsed, pinned as context, and undone step by step.

pub mod api;
pub mod cli;
pub mod command;
pub mod context;
pub mod core;
pub mod generator;
pub mod history;
pub mod ids;
pub mod layout;
pub mod models;
pub mod store;
pub mod tree;
pub mod visibility;

pub use crate::core::Core;
