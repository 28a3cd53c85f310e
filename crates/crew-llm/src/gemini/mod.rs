//! Google Gemini streaming provider (`streamGenerateContent?alt=sse`).

pub mod converter;
pub mod provider;
pub mod sse;
pub mod types;

pub use provider::{GeminiConfig, GeminiProvider};
