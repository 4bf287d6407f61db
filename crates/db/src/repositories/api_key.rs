//! API-key repository: issuing, authenticating, and revoking keys.
//!
//! Raw keys look like `tsk_<32 alphanumeric chars>` and are shown exactly
//! once at issue time. Only the SHA-256 digest is stored; lookup is a single
//! indexed query on the digest.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use tesoro_shared::types::{ApiKeyId, WalletId};
use tesoro_shared::{ApiKeyIdentity, Scope, SpendLimits};

use crate::entities::api_keys;
use crate::entities::sea_orm_active_enums::ApiKeyStatus;

/// Prefix carried by every raw key.
pub const KEY_PREFIX: &str = "tsk_";

/// Length of the random portion of a raw key.
const KEY_RANDOM_LEN: usize = 32;

/// Errors from API-key operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    /// The key does not exist or the credential is wrong.
    #[error("Invalid API key")]
    InvalidKey,

    /// The key exists but was revoked.
    #[error("API key has been revoked")]
    Revoked,

    /// The key row does not exist.
    #[error("API key not found: {0}")]
    NotFound(ApiKeyId),

    /// Stored scopes could not be decoded.
    #[error("Corrupt scope list on API key {0}")]
    CorruptScopes(ApiKeyId),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// A freshly issued key: the persisted id plus the raw secret, which is
/// never stored.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// The key's id.
    pub id: ApiKeyId,
    /// The raw secret, shown once.
    pub raw_key: String,
}

/// API-key repository.
#[derive(Debug, Clone)]
pub struct ApiKeyRepository {
    db: DatabaseConnection,
}

fn digest_of(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl ApiKeyRepository {
    /// Creates a new repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Issues a key for a wallet with the given scopes and limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn issue(
        &self,
        wallet_id: WalletId,
        scopes: &[Scope],
        limits: SpendLimits,
    ) -> Result<IssuedKey, ApiKeyError> {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(KEY_RANDOM_LEN)
            .map(char::from)
            .collect();
        let raw_key = format!("{KEY_PREFIX}{random}");
        let id = ApiKeyId::from_uuid(Uuid::now_v7());

        let scope_strings: Vec<String> = scopes.iter().map(ToString::to_string).collect();

        api_keys::ActiveModel {
            id: Set(id.into_inner()),
            key_digest: Set(digest_of(&raw_key)),
            key_prefix: Set(raw_key[..KEY_PREFIX.len() + 4].to_string()),
            wallet_id: Set(wallet_id.into_inner()),
            scopes: Set(serde_json::json!(scope_strings)),
            per_tx_max: Set(limits.per_tx_max),
            window_max: Set(limits.window_max),
            status: Set(ApiKeyStatus::Active),
            last_used_at: Set(None),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.db)
        .await?;

        Ok(IssuedKey { id, raw_key })
    }

    /// Authenticates a raw key and returns the caller identity.
    ///
    /// # Errors
    ///
    /// `InvalidKey` for unknown credentials, `Revoked` for revoked keys.
    pub async fn authenticate(&self, raw_key: &str) -> Result<ApiKeyIdentity, ApiKeyError> {
        let model = api_keys::Entity::find()
            .filter(api_keys::Column::KeyDigest.eq(digest_of(raw_key)))
            .one(&self.db)
            .await?
            .ok_or(ApiKeyError::InvalidKey)?;

        if model.status != ApiKeyStatus::Active {
            return Err(ApiKeyError::Revoked);
        }

        let id = ApiKeyId::from_uuid(model.id);
        let scopes = decode_scopes(&model.scopes).ok_or(ApiKeyError::CorruptScopes(id))?;
        let identity = ApiKeyIdentity {
            api_key_id: id,
            wallet_id: WalletId::from_uuid(model.wallet_id),
            scopes,
            limits: SpendLimits {
                per_tx_max: model.per_tx_max,
                window_max: model.window_max,
            },
        };

        let mut active: api_keys::ActiveModel = model.into();
        active.last_used_at = Set(Some(Utc::now().into()));
        active.update(&self.db).await?;

        Ok(identity)
    }

    /// Revokes a key.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key does not exist.
    pub async fn revoke(&self, id: ApiKeyId) -> Result<(), ApiKeyError> {
        let model = api_keys::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await?
            .ok_or(ApiKeyError::NotFound(id))?;
        let mut active: api_keys::ActiveModel = model.into();
        active.status = Set(ApiKeyStatus::Revoked);
        active.update(&self.db).await?;
        Ok(())
    }
}

fn decode_scopes(value: &serde_json::Value) -> Option<Vec<Scope>> {
    let raw: Vec<String> = serde_json::from_value(value.clone()).ok()?;
    raw.iter().map(|s| s.parse().ok()).collect()
}
