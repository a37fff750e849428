//! Persistence for the two pieces of cross-run shared state: encrypted
//! provider credentials and per-resource ingestion watermarks. Both are
//! exposed as traits with a Postgres backend for production and an in-memory
//! backend for tests and local runs.

pub mod credentials;
pub mod encryption;
pub mod error;
pub mod watermarks;

pub use credentials::{
    CredentialStore, DecryptedCredential, MemoryCredentialStore, PgCredentialStore,
};
pub use encryption::{CredentialCipher, EncryptedValue, EncryptionError};
pub use error::{StorageError, StorageResult};
pub use watermarks::{MemoryWatermarkStore, PgWatermarkStore, Watermark, WatermarkStore};
