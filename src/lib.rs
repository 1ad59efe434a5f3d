//! # datasearch
//!
//! Dataset-catalog enrichment and hybrid search.
//!
//! Dataset metadata is pulled from external catalogs (Kaggle, HuggingFace
//! Hub), moved through a staged enrichment lifecycle, embedded, and ranked
//! by a hybrid of semantic, keyword and popularity signals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐   ┌───────────┐
//! │ Connectors  │──▶│ Orchestrator │──▶│  SQLite  │──▶│ Embedding │
//! │ Kaggle / HF │   │ seed/enrich/ │   │ catalog  │◀──│ processor │
//! └─────────────┘   │ latest       │   └────┬─────┘   └───────────┘
//!        ▲          └──────────────┘        │
//!   rate limiter                            ▼
//!                                     hybrid scorer
//! ```
//!
//! The lifecycle types, store and connector traits, and the scorer live
//! in [`datasearch_core`]; this crate holds the SQLite store, the HTTP
//! connectors, the embedding providers, and the CLI commands.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Dependency struct shared by all commands |
//! | [`enrich`] | Seed, enrich and latest phases |
//! | [`embed_cmd`] | Embedding batch processor |
//! | [`sqlite_store`] | SQLite [`CatalogStore`](datasearch_core::store::CatalogStore) |
//! | [`connector_kaggle`] / [`connector_hf`] | Source connectors |
//! | [`embedding`] | Embedding providers |
//! | [`search`] | Hybrid search command |

pub mod app;
pub mod config;
pub mod connector_hf;
pub mod connector_http;
pub mod connector_kaggle;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod enrich;
pub mod get;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod rate_limit;
pub mod search;
pub mod sources;
pub mod sqlite_store;
pub mod stats;

pub use datasearch_core::{connector, models, scoring, status, store};
