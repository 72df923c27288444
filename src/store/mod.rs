use async_trait::async_trait;

use crate::entity::{key, platform, token};

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::SeaOrmStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Pluggable persistence for the provider's logical collections.
///
/// Every method addresses exactly one row by its full key; upserts are
/// per-key last-writer-wins. Public and private key rows always move
/// together so a platform's key pair cannot half-exist.
#[async_trait]
pub trait Store: Send + Sync {
    /// Prepares the backing storage (schema creation and the like).
    async fn setup(&self) -> Result<(), StoreError>;

    async fn find_platform(&self, platform_url: &str) -> Result<Option<platform::Model>, StoreError>;
    async fn list_platforms(&self) -> Result<Vec<platform::Model>, StoreError>;
    async fn upsert_platform(&self, platform: platform::Model) -> Result<(), StoreError>;
    async fn delete_platform(&self, platform_url: &str) -> Result<(), StoreError>;

    async fn find_public_key(&self, kid: &str) -> Result<Option<key::public::Model>, StoreError>;
    async fn find_private_key(&self, kid: &str) -> Result<Option<key::private::Model>, StoreError>;
    async fn list_public_keys(&self) -> Result<Vec<key::public::Model>, StoreError>;
    async fn upsert_key_pair(
        &self,
        public: key::public::Model,
        private: key::private::Model,
    ) -> Result<(), StoreError>;
    async fn delete_key_pair(&self, kid: &str) -> Result<(), StoreError>;

    async fn find_id_token(
        &self,
        iss: &str,
        deployment_id: &str,
        user: &str,
    ) -> Result<Option<token::id::Model>, StoreError>;
    async fn upsert_id_token(&self, token: token::id::Model) -> Result<(), StoreError>;

    async fn find_context_token(
        &self,
        context_id: &str,
        user: &str,
    ) -> Result<Option<token::context::Model>, StoreError>;
    async fn upsert_context_token(&self, token: token::context::Model) -> Result<(), StoreError>;
    /// Patches only the stored path, used when a redirect binds the
    /// context to a new resource.
    async fn update_context_path(
        &self,
        context_id: &str,
        user: &str,
        path: &str,
    ) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}
