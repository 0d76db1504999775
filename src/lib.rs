//! # Lectern
//!
//! A document-grounded conversational assistant.
//!
//! Lectern ingests a single document (plain text or EPUB), chunks and
//! embeds it into a content-addressed passage index, and answers
//! questions about it: each question retrieves the most similar passages
//! and grounds one generation call in them, with conversation history
//! carried across turns.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐
//! │ Extract  │──▶│  Pipeline    │──▶│  SQLite   │
//! │ text/epub│   │ Chunk+Embed │   │  indexes  │
//! └──────────┘   └─────────────┘   └────┬──────┘
//!                                       │
//!                   ┌───────────────────┤
//!                   ▼                   ▼
//!              ┌──────────┐       ┌──────────┐
//!              │   CLI    │       │   HTTP   │
//!              │(lectern) │       │ (serve)  │
//!              └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! lectern ingest book.epub        # build (or reuse) the passage index
//! lectern ask book.epub "Who is the narrator?"
//! lectern chat book.epub          # interactive conversation
//! lectern serve                   # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Plain-text and EPUB text extraction |
//! | [`chunk`] | Overlapping passage chunking |
//! | [`embedding`] | Embedding service client and vector utilities |
//! | [`llm`] | Chat completion client |
//! | [`store`] | Content-addressed passage index storage |
//! | [`session`] | Conversation session state |
//! | [`engine`] | Condense → retrieve → generate loop |
//! | [`assistant`] | Ingest and ask facade |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection and schema |

pub mod assistant;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;
pub mod store;

pub use assistant::Assistant;
pub use error::{Error, Result};
pub use models::{Credential, GroundedAnswer};
pub use session::Session;
