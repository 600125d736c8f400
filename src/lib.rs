//! mosp is a terminal chat client for local and hosted language models.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the streaming decoder, the persisted conversation store,
//!   provider resolution, context selection, and the per-pane send path.
//! - [`api`] defines request and response payloads for the Ollama, OpenAI
//!   and Anthropic dialects, plus model discovery.
//! - [`cli`] parses arguments and runs the interactive and one-shot commands.
//! - [`utils`] holds authentication headers, URL handling, and logging setup.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
