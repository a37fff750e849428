//! The credential vault: per-provider API secrets encrypted at rest, plus
//! the shared-user OAuth grant and per-user grants.
//!
//! Writes enforce the provider's declared key schema, and every successful
//! write bumps a generation counter that connectors use to detect rotation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;
use wl_core::{CredentialKey, Provider, provider_fields, public_provider_fields};

use crate::encryption::{CredentialCipher, EncryptedValue};
use crate::error::{StorageError, StorageResult};

/// A provider credential with all fields decrypted.
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub provider: Provider,
    pub fields: HashMap<CredentialKey, String>,
    pub shared_user_credential: Option<serde_json::Value>,
    pub valid_shared_user_credential: bool,
    pub generation: i64,
}

impl DecryptedCredential {
    pub fn field(&self, key: CredentialKey) -> Option<&str> {
        self.fields.get(&key).map(String::as_str)
    }

    /// The subset of fields safe to expose to non-admin callers.
    pub fn public_fields(&self) -> HashMap<CredentialKey, String> {
        public_provider_fields(self.provider)
            .iter()
            .filter_map(|key| self.fields.get(key).map(|v| (*key, v.clone())))
            .collect()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Decrypted credential for a provider, or `None` if never configured.
    async fn get(&self, provider: Provider) -> StorageResult<Option<DecryptedCredential>>;

    /// Replace the provider's credential fields. Fails with `SchemaMismatch`
    /// unless the key set exactly matches the provider's declared schema.
    /// Bumps the generation so live connector sessions rebuild. The shared
    /// user grant and its validity flag are left untouched: rotating the app
    /// secrets is independent of the OAuth grant, which only
    /// `update_shared_user_credential` restores.
    async fn put(
        &self,
        provider: Provider,
        fields: HashMap<CredentialKey, String>,
    ) -> StorageResult<DecryptedCredential>;

    /// Store a fresh shared-user OAuth blob (access + refresh token) and
    /// mark it valid again.
    async fn update_shared_user_credential(
        &self,
        provider: Provider,
        credentials: serde_json::Value,
    ) -> StorageResult<()>;

    /// Record that the shared-user grant was revoked upstream. Ingestion for
    /// the provider pauses until an admin reconnects.
    async fn mark_shared_invalid(&self, provider: Provider) -> StorageResult<()>;

    /// Current credential generation, bumped on every `put`.
    async fn generation(&self, provider: Provider) -> StorageResult<Option<i64>>;

    async fn get_user_credential(
        &self,
        provider: Provider,
        user_id: &str,
    ) -> StorageResult<Option<serde_json::Value>>;

    async fn put_user_credential(
        &self,
        provider: Provider,
        user_id: &str,
        credentials: serde_json::Value,
    ) -> StorageResult<()>;
}

/// Order-independent set equality against the provider's declared schema.
fn check_schema(
    provider: Provider,
    fields: &HashMap<CredentialKey, String>,
) -> StorageResult<()> {
    let mut expected: Vec<&'static str> =
        provider_fields(provider).iter().map(|k| k.as_str()).collect();
    expected.sort_unstable();
    let mut got: Vec<&'static str> = fields.keys().map(|k| k.as_str()).collect();
    got.sort_unstable();

    if expected != got {
        return Err(StorageError::SchemaMismatch {
            provider,
            expected: expected.into_iter().map(String::from).collect(),
            got: got.into_iter().map(String::from).collect()
        });
    }
    Ok(())
}

fn encrypt_fields(
    cipher: &CredentialCipher,
    fields: &HashMap<CredentialKey, String>,
) -> StorageResult<HashMap<CredentialKey, EncryptedValue>> {
    fields
        .iter()
        .map(|(key, value)| Ok((*key, cipher.encrypt(value)?)))
        .collect()
}

fn decrypt_fields(
    cipher: &CredentialCipher,
    fields: &HashMap<CredentialKey, EncryptedValue>,
) -> StorageResult<HashMap<CredentialKey, String>> {
    fields
        .iter()
        .map(|(key, value)| Ok((*key, cipher.decrypt(value)?)))
        .collect()
}

fn decrypt_json(
    cipher: &CredentialCipher,
    value: &EncryptedValue,
) -> StorageResult<serde_json::Value> {
    Ok(serde_json::from_str(&cipher.decrypt(value)?)?)
}

// ---------------------------------------------------------------------------
// Postgres backend
// ---------------------------------------------------------------------------

pub struct PgCredentialStore {
    pool: PgPool,
    cipher: Arc<CredentialCipher>,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, cipher: Arc<CredentialCipher>) -> Self {
        Self { pool, cipher }
    }
}

type GlobalRow = (serde_json::Value, Option<serde_json::Value>, bool, i64);

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get(&self, provider: Provider) -> StorageResult<Option<DecryptedCredential>> {
        let row = sqlx::query_as::<_, GlobalRow>(
            r#"
            SELECT encrypted_fields, shared_user_credential, valid_shared_user_credential, generation
            FROM global_api_credentials
            WHERE provider = $1
            "#,
        )
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some((fields_json, shared_json, valid, generation)) = row else {
            return Ok(None);
        };

        let encrypted: HashMap<CredentialKey, EncryptedValue> =
            serde_json::from_value(fields_json)?;
        let shared = shared_json
            .map(|raw| -> StorageResult<serde_json::Value> {
                let sealed: EncryptedValue = serde_json::from_value(raw)?;
                decrypt_json(&self.cipher, &sealed)
            })
            .transpose()?;

        Ok(Some(DecryptedCredential {
            provider,
            fields: decrypt_fields(&self.cipher, &encrypted)?,
            shared_user_credential: shared,
            valid_shared_user_credential: valid,
            generation,
        }))
    }

    async fn put(
        &self,
        provider: Provider,
        fields: HashMap<CredentialKey, String>,
    ) -> StorageResult<DecryptedCredential> {
        check_schema(provider, &fields)?;
        let encrypted = encrypt_fields(&self.cipher, &fields)?;
        let fields_json = serde_json::to_value(&encrypted)?;

        let (shared_json, valid, generation) =
            sqlx::query_as::<_, (Option<serde_json::Value>, bool, i64)>(
                r#"
                INSERT INTO global_api_credentials
                    (provider, encrypted_fields, valid_shared_user_credential, generation, updated_at)
                VALUES ($1, $2, true, 1, NOW())
                ON CONFLICT (provider) DO UPDATE SET
                    encrypted_fields = EXCLUDED.encrypted_fields,
                    generation = global_api_credentials.generation + 1,
                    updated_at = NOW()
                RETURNING shared_user_credential, valid_shared_user_credential, generation
                "#,
            )
            .bind(provider.as_str())
            .bind(&fields_json)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(provider = %provider, generation, "stored credential");

        let shared = shared_json
            .map(|raw| -> StorageResult<serde_json::Value> {
                let sealed: EncryptedValue = serde_json::from_value(raw)?;
                decrypt_json(&self.cipher, &sealed)
            })
            .transpose()?;

        Ok(DecryptedCredential {
            provider,
            fields,
            shared_user_credential: shared,
            valid_shared_user_credential: valid,
            generation,
        })
    }

    async fn update_shared_user_credential(
        &self,
        provider: Provider,
        credentials: serde_json::Value,
    ) -> StorageResult<()> {
        let sealed = self.cipher.encrypt(&serde_json::to_string(&credentials)?)?;
        let affected = sqlx::query(
            r#"
            UPDATE global_api_credentials
            SET shared_user_credential = $2,
                valid_shared_user_credential = true,
                updated_at = NOW()
            WHERE provider = $1
            "#,
        )
        .bind(provider.as_str())
        .bind(serde_json::to_value(&sealed)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StorageError::CredentialNotFound { provider });
        }
        Ok(())
    }

    async fn mark_shared_invalid(&self, provider: Provider) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE global_api_credentials
            SET valid_shared_user_credential = false, updated_at = NOW()
            WHERE provider = $1
            "#,
        )
        .bind(provider.as_str())
        .execute(&self.pool)
        .await?;
        tracing::warn!(provider = %provider, "marked shared user credential invalid");
        Ok(())
    }

    async fn generation(&self, provider: Provider) -> StorageResult<Option<i64>> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"SELECT generation FROM global_api_credentials WHERE provider = $1"#,
        )
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(g,)| g))
    }

    async fn get_user_credential(
        &self,
        provider: Provider,
        user_id: &str,
    ) -> StorageResult<Option<serde_json::Value>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            r#"
            SELECT encrypted_credentials
            FROM user_api_credentials
            WHERE provider = $1 AND user_id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(raw,)| -> StorageResult<serde_json::Value> {
            let sealed: EncryptedValue = serde_json::from_value(raw)?;
            decrypt_json(&self.cipher, &sealed)
        })
        .transpose()
    }

    async fn put_user_credential(
        &self,
        provider: Provider,
        user_id: &str,
        credentials: serde_json::Value,
    ) -> StorageResult<()> {
        let sealed = self.cipher.encrypt(&serde_json::to_string(&credentials)?)?;
        sqlx::query(
            r#"
            INSERT INTO user_api_credentials (provider, user_id, encrypted_credentials, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (provider, user_id) DO UPDATE SET
                encrypted_credentials = EXCLUDED.encrypted_credentials,
                updated_at = NOW()
            "#,
        )
        .bind(provider.as_str())
        .bind(user_id)
        .bind(serde_json::to_value(&sealed)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend (tests, local runs)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryGlobalRow {
    fields: HashMap<CredentialKey, EncryptedValue>,
    shared: Option<EncryptedValue>,
    valid: bool,
    generation: i64,
}

/// Memory-backed store that still round-trips every value through the
/// cipher, so it exercises the same encryption path as Postgres.
pub struct MemoryCredentialStore {
    cipher: Arc<CredentialCipher>,
    rows: RwLock<HashMap<Provider, MemoryGlobalRow>>,
    user_rows: RwLock<HashMap<(Provider, String), EncryptedValue>>,
}

impl MemoryCredentialStore {
    pub fn new(cipher: Arc<CredentialCipher>) -> Self {
        Self {
            cipher,
            rows: RwLock::new(HashMap::new()),
            user_rows: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, provider: Provider) -> StorageResult<Option<DecryptedCredential>> {
        let rows = self.rows.read();
        let Some(row) = rows.get(&provider) else {
            return Ok(None);
        };
        let shared = row
            .shared
            .as_ref()
            .map(|sealed| decrypt_json(&self.cipher, sealed))
            .transpose()?;
        Ok(Some(DecryptedCredential {
            provider,
            fields: decrypt_fields(&self.cipher, &row.fields)?,
            shared_user_credential: shared,
            valid_shared_user_credential: row.valid,
            generation: row.generation,
        }))
    }

    async fn put(
        &self,
        provider: Provider,
        fields: HashMap<CredentialKey, String>,
    ) -> StorageResult<DecryptedCredential> {
        check_schema(provider, &fields)?;
        let encrypted = encrypt_fields(&self.cipher, &fields)?;

        let mut rows = self.rows.write();
        let row = rows.entry(provider).or_insert_with(|| MemoryGlobalRow {
            valid: true,
            ..MemoryGlobalRow::default()
        });
        row.fields = encrypted;
        row.generation += 1;

        let shared = row
            .shared
            .as_ref()
            .map(|sealed| decrypt_json(&self.cipher, sealed))
            .transpose()?;

        Ok(DecryptedCredential {
            provider,
            fields,
            shared_user_credential: shared,
            valid_shared_user_credential: row.valid,
            generation: row.generation,
        })
    }

    async fn update_shared_user_credential(
        &self,
        provider: Provider,
        credentials: serde_json::Value,
    ) -> StorageResult<()> {
        let sealed = self.cipher.encrypt(&serde_json::to_string(&credentials)?)?;
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&provider)
            .ok_or(StorageError::CredentialNotFound { provider })?;
        row.shared = Some(sealed);
        row.valid = true;
        Ok(())
    }

    async fn mark_shared_invalid(&self, provider: Provider) -> StorageResult<()> {
        if let Some(row) = self.rows.write().get_mut(&provider) {
            row.valid = false;
        }
        Ok(())
    }

    async fn generation(&self, provider: Provider) -> StorageResult<Option<i64>> {
        Ok(self.rows.read().get(&provider).map(|row| row.generation))
    }

    async fn get_user_credential(
        &self,
        provider: Provider,
        user_id: &str,
    ) -> StorageResult<Option<serde_json::Value>> {
        self.user_rows
            .read()
            .get(&(provider, user_id.to_string()))
            .map(|sealed| decrypt_json(&self.cipher, sealed))
            .transpose()
    }

    async fn put_user_credential(
        &self,
        provider: Provider,
        user_id: &str,
        credentials: serde_json::Value,
    ) -> StorageResult<()> {
        let sealed = self.cipher.encrypt(&serde_json::to_string(&credentials)?)?;
        self.user_rows
            .write()
            .insert((provider, user_id.to_string()), sealed);
        Ok(())
    }
}
