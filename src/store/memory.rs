use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::entity::{key, platform, token};

use super::{Store, StoreError};

/// In-memory store, suitable for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryStore {
    platforms: RwLock<HashMap<String, platform::Model>>,
    public_keys: RwLock<HashMap<String, key::public::Model>>,
    private_keys: RwLock<HashMap<String, key::private::Model>>,
    id_tokens: RwLock<HashMap<(String, String, String), token::id::Model>>,
    context_tokens: RwLock<HashMap<(String, String), token::context::Model>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn setup(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_platform(&self, platform_url: &str) -> Result<Option<platform::Model>, StoreError> {
        Ok(self.platforms.read().await.get(platform_url).cloned())
    }

    async fn list_platforms(&self) -> Result<Vec<platform::Model>, StoreError> {
        Ok(self.platforms.read().await.values().cloned().collect())
    }

    async fn upsert_platform(&self, platform: platform::Model) -> Result<(), StoreError> {
        self.platforms.write().await.insert(platform.platform_url.clone(), platform);
        Ok(())
    }

    async fn delete_platform(&self, platform_url: &str) -> Result<(), StoreError> {
        self.platforms.write().await.remove(platform_url);
        Ok(())
    }

    async fn find_public_key(&self, kid: &str) -> Result<Option<key::public::Model>, StoreError> {
        Ok(self.public_keys.read().await.get(kid).cloned())
    }

    async fn find_private_key(&self, kid: &str) -> Result<Option<key::private::Model>, StoreError> {
        Ok(self.private_keys.read().await.get(kid).cloned())
    }

    async fn list_public_keys(&self) -> Result<Vec<key::public::Model>, StoreError> {
        Ok(self.public_keys.read().await.values().cloned().collect())
    }

    async fn upsert_key_pair(
        &self,
        public: key::public::Model,
        private: key::private::Model,
    ) -> Result<(), StoreError> {
        self.public_keys.write().await.insert(public.kid.clone(), public);
        self.private_keys.write().await.insert(private.kid.clone(), private);
        Ok(())
    }

    async fn delete_key_pair(&self, kid: &str) -> Result<(), StoreError> {
        self.public_keys.write().await.remove(kid);
        self.private_keys.write().await.remove(kid);
        Ok(())
    }

    async fn find_id_token(
        &self,
        iss: &str,
        deployment_id: &str,
        user: &str,
    ) -> Result<Option<token::id::Model>, StoreError> {
        let key = (iss.to_string(), deployment_id.to_string(), user.to_string());
        Ok(self.id_tokens.read().await.get(&key).cloned())
    }

    async fn upsert_id_token(&self, token: token::id::Model) -> Result<(), StoreError> {
        let key = (token.iss.clone(), token.deployment_id.clone(), token.user.clone());
        self.id_tokens.write().await.insert(key, token);
        Ok(())
    }

    async fn find_context_token(
        &self,
        context_id: &str,
        user: &str,
    ) -> Result<Option<token::context::Model>, StoreError> {
        let key = (context_id.to_string(), user.to_string());
        Ok(self.context_tokens.read().await.get(&key).cloned())
    }

    async fn upsert_context_token(&self, token: token::context::Model) -> Result<(), StoreError> {
        let key = (token.context_id.clone(), token.user.clone());
        self.context_tokens.write().await.insert(key, token);
        Ok(())
    }

    async fn update_context_path(
        &self,
        context_id: &str,
        user: &str,
        path: &str,
    ) -> Result<(), StoreError> {
        let key = (context_id.to_string(), user.to_string());
        if let Some(token) = self.context_tokens.write().await.get_mut(&key) {
            token.path = path.to_string();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
