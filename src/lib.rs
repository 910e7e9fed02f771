//! # MediBot — retrieval-augmented medical Q&A
//!
//! Answers questions from a local vector index: the question is embedded,
//! the nearest passages are retrieved and rendered into a prompt, and a
//! hosted LLM (Groq) writes the answer. The answer comes back with the
//! passages it was grounded on.
//!
//! ## Architecture
//!
//! - **[`config`]** — JSON configuration with per-field defaults
//! - **[`embedder`]** — Text embedding via ONNX Runtime (all-MiniLM-L6-v2)
//! - **[`store`]** — SQLite + sqlite-vec vector index and its load-once cache
//! - **[`prompt`]** — Validated prompt templates
//! - **[`llm`]** — Chat-completion client with structured error kinds
//! - **[`pipeline`]** — Retrieve → prompt → complete, with the retry policy
//! - **[`format`]** — Markdown rendering of answers and sources
//! - **[`chat`]** — Chat sessions plus terminal and HTTP hosts

pub mod chat;
pub mod config;
pub mod embedder;
pub mod format;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod store;
