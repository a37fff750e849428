use thiserror::Error;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("failed to open index directory: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("invalid query: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("stored document is corrupt: {0}")]
    CorruptDocument(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
