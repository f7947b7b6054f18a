//! Governance layer for outbound LLM calls.
//!
//! Guarantees, regardless of caller behavior: secrets and PII are redacted
//! before any prompt leaves the process, per-caller request and cost
//! budgets are enforced, and the model's structured output is validated for
//! completeness and dangerous content before it is surfaced.

pub mod config;
pub mod llm_client;
pub mod patterns;
pub mod pipeline;
pub mod prompt;
pub mod quota;
pub mod redact;
pub mod schema;
pub mod validate;
