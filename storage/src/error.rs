use thiserror::Error;
use wl_core::Provider;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Encryption(#[from] crate::encryption::EncryptionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no credential stored for provider {provider}")]
    CredentialNotFound { provider: Provider },

    #[error("credential for {provider} has keys {got:?} but expects {expected:?}")]
    SchemaMismatch {
        provider: Provider,
        expected: Vec<String>,
        got: Vec<String>,
    },
}
