//! Model-backed capabilities for Kindred.
//!
//! [`OllamaClient`] talks to a local Ollama server and implements the
//! `Judge`, `Summarizer` and `Responder` contracts from `kindred_core`.
//! [`ScriptedJudge`] implements the same contracts from canned outcomes.

pub mod extraction;
pub mod mock;
pub mod ollama;
pub mod prompts;
pub mod retry;

pub use mock::ScriptedJudge;
pub use ollama::OllamaClient;
pub use retry::RetryConfig;
