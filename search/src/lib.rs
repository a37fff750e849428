//! Full-text search over ingested workplace documents.
//!
//! Two tantivy partitions (Slack messages, Confluence content) live under a
//! shared index directory; the aggregator fans a query out across them and
//! merges hits with per-provider counts.

pub mod aggregator;
pub mod error;
pub mod highlight;
pub mod partitions;

pub use aggregator::SearchAggregator;
pub use error::{SearchError, SearchResult};
pub use partitions::{ContentHit, ContentPartition, MessageHit, MessagePartition};
