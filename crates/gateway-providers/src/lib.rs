//! # Gateway Providers
//!
//! Backend implementations for the agent inference gateway.
//!
//! Every local model server and external API the gateway talks to is reached
//! through the OpenAI-compatible chat completions dialect.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod openai;

// Re-export main types
pub use openai::{OpenAiCompatBackend, OpenAiCompatConfig};
