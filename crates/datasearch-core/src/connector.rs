//! Source connector capability interface.
//!
//! One implementation per external catalog. The phase drivers only ever
//! see this trait, so adding a catalog means adding an implementation and
//! a [`Source`] variant; the orchestrator does not change.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::{MappedRecord, RawRecord, SortOrder, Source};

/// A catalog that datasets can be seeded from, enriched against, and
/// polled for recent changes.
///
/// Fetch methods perform I/O and report failures through the
/// [`SourceError`] taxonomy. [`map`](SourceConnector::map) is pure: it
/// must not block or touch the network, and a malformed payload is a
/// [`SourceError::Mapping`].
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use datasearch_core::connector::SourceConnector;
/// use datasearch_core::error::SourceError;
/// use datasearch_core::models::*;
///
/// struct Empty;
///
/// #[async_trait]
/// impl SourceConnector for Empty {
///     fn source(&self) -> Source { Source::Kaggle }
///     async fn fetch_seed(&self) -> Result<Vec<RawRecord>, SourceError> { Ok(vec![]) }
///     async fn fetch_by_id(&self, id: &str) -> Result<RawRecord, SourceError> {
///         Err(SourceError::NotFound(id.to_string()))
///     }
///     async fn fetch_latest(&self, _: usize, _: SortOrder) -> Result<Vec<RawRecord>, SourceError> {
///         Ok(vec![])
///     }
///     fn map(&self, raw: &RawRecord) -> Result<MappedRecord, SourceError> {
///         Err(SourceError::Mapping(raw.external_id.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// The catalog this connector talks to.
    fn source(&self) -> Source;

    /// Human-readable description for `dsearch sources`.
    fn description(&self) -> String {
        format!("{} catalog", self.source())
    }

    /// Bulk seed feed. Large; used once or on forced refresh.
    async fn fetch_seed(&self) -> Result<Vec<RawRecord>, SourceError>;

    /// Full metadata for one dataset.
    async fn fetch_by_id(&self, external_id: &str) -> Result<RawRecord, SourceError>;

    /// A page of recently changed datasets, at most `limit` records.
    async fn fetch_latest(
        &self,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<RawRecord>, SourceError>;

    /// Map a payload of any shape this connector produces onto dataset
    /// content.
    fn map(&self, raw: &RawRecord) -> Result<MappedRecord, SourceError>;
}
