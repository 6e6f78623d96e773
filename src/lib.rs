//! # Rulesmith
//!
//! A board-game rules service: upload a game's rules PDF, search it
//! semantically, and chat with an assistant grounded in the retrieved text.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │ PDF      │──▶│   Pipeline    │──▶│  SQLite   │
//! │ upload   │   │ Chunk+Embed  │   │ (5 tables)│
//! └──────────┘   └──────────────┘   └────┬──────┘
//!                                        │
//!                  ┌─────────────────────┤
//!                  ▼                     ▼
//!             ┌──────────┐        ┌───────────┐
//!             │  Search  │───────▶│   Chat    │──▶ LLM
//!             │ (cosine) │        │ sessions  │
//!             └──────────┘        └───────────┘
//! ```
//!
//! Writes flow upload → extract → chunk → embed → transactional replace;
//! reads flow query → embed → cosine scan → ranked chunks, optionally on to
//! the chat orchestrator, which grounds LLM replies in the retrieved chunks
//! and records which ones it used.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and wire shapes |
//! | [`error`] | Error taxonomy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Relational store (games, house rules, chunks, chat) |
//! | [`pdf`] | PDF validation and text extraction |
//! | [`chunk`] | Overlapping-window text chunking |
//! | [`embedding`] | Embedding backends and vector utilities |
//! | [`llm`] | Chat-completion client |
//! | [`ingest`] | Rules-document ingestion pipeline |
//! | [`search`] | Similarity search engine |
//! | [`chat`] | Chat orchestration |
//! | [`server`] | HTTP/JSON API |
//! | [`locks`] | Per-key advisory locks |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod locks;
pub mod migrate;
pub mod models;
pub mod pdf;
pub mod search;
pub mod server;
pub mod store;
