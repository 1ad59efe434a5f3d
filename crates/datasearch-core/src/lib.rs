//! # datasearch core
//!
//! Runtime-agnostic logic for the dataset catalog: data models, the
//! enrichment status state machine, the source/store/encoder traits,
//! vector utilities, and the hybrid ranking function.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The
//! application crate supplies concrete connectors, the SQLite store, the
//! embedding backends, and the phase drivers that sequence them.

pub mod connector;
pub mod embedding;
pub mod error;
pub mod models;
pub mod scoring;
pub mod status;
pub mod store;

pub use error::{EncodingError, SourceError};
pub use models::{Dataset, DatasetContent, EnrichmentLog, LogOutcome, Source};
pub use status::EnrichmentStatus;
