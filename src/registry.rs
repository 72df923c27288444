use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, Header, encode};
use serde::{Deserialize, Serialize};

use crate::entity::platform::{self, AuthConfig};
use crate::error::{AppError, OptionExt};
use crate::keyring::KeyRing;
use crate::store::Store;
use crate::util;

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Registration input. For a new platform every field is required; for an
/// existing `platform_url` the present fields are merged into the record.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistration {
    pub platform_url: String,
    pub name: Option<String>,
    pub client_id: Option<String>,
    pub auth_endpoint: Option<String>,
    pub accesstoken_endpoint: Option<String>,
    pub auth_config: Option<AuthConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

struct CachedToken {
    token: AccessToken,
    expires_at: Instant,
}

/// CRUD over platform trust records, plus the client-credentials grant
/// against a platform's token endpoint.
#[derive(Clone)]
pub struct PlatformRegistry {
    store: Arc<dyn Store>,
    keyring: KeyRing,
    http: reqwest::Client,
    tokens: Arc<DashMap<String, CachedToken>>,
}

impl PlatformRegistry {
    pub fn new(store: Arc<dyn Store>, keyring: KeyRing) -> Self {
        Self {
            store,
            keyring,
            http: reqwest::Client::new(),
            tokens: Arc::new(DashMap::new()),
        }
    }

    /// Registers a platform, or merges into an existing record with the
    /// same issuer URL. A fresh tool key pair is generated for new
    /// platforms; if the platform row cannot be written afterwards the
    /// pair is rolled back.
    pub async fn register(
        &self,
        registration: PlatformRegistration,
    ) -> Result<platform::Model, AppError> {
        let url = registration.platform_url.trim().to_string();
        if url.is_empty() {
            return Err(AppError::missing_argument("Missing platform_url"));
        }

        if let Some(mut existing) = self.store.find_platform(&url).await.map_err(AppError::Store)? {
            if let Some(name) = registration.name {
                existing.name = name;
            }
            if let Some(client_id) = registration.client_id {
                existing.client_id = client_id;
            }
            if let Some(auth_endpoint) = registration.auth_endpoint {
                existing.auth_endpoint = auth_endpoint;
            }
            if let Some(accesstoken_endpoint) = registration.accesstoken_endpoint {
                existing.accesstoken_endpoint = accesstoken_endpoint;
            }
            if let Some(auth_config) = registration.auth_config {
                existing.auth_config = serde_json::to_string(&auth_config)
                    .map_err(|e| AppError::Store(e.into()))?;
            }
            self.store.upsert_platform(existing.clone()).await.map_err(AppError::Store)?;
            return Ok(existing);
        }

        let name = registration.name.or_missing_argument("Missing name")?;
        let client_id = registration.client_id.or_missing_argument("Missing client_id")?;
        let auth_endpoint = registration.auth_endpoint.or_missing_argument("Missing auth_endpoint")?;
        let accesstoken_endpoint = registration
            .accesstoken_endpoint
            .or_missing_argument("Missing accesstoken_endpoint")?;
        let auth_config = registration.auth_config.or_missing_argument("Missing auth_config")?;
        let auth_config = serde_json::to_string(&auth_config).map_err(|e| AppError::Store(e.into()))?;

        let kid = self.keyring.generate(&url).await?;
        let model = platform::Model {
            platform_url: url.clone(),
            name,
            client_id,
            auth_endpoint,
            accesstoken_endpoint,
            kid: kid.clone(),
            auth_config,
            created_at: Utc::now(),
        };

        if let Err(err) = self.store.upsert_platform(model.clone()).await {
            // undo the key pair and any partial row before surfacing
            let _ = self.keyring.remove(&kid).await;
            let _ = self.store.delete_platform(&url).await;
            return Err(AppError::Store(err));
        }

        tracing::info!(platform = %url, "registered platform");
        Ok(model)
    }

    pub async fn get(&self, platform_url: &str) -> Result<Option<platform::Model>, AppError> {
        if platform_url.trim().is_empty() {
            return Err(AppError::missing_argument("Missing platform_url"));
        }
        self.store.find_platform(platform_url).await.map_err(AppError::Store)
    }

    pub async fn get_all(&self) -> Result<Vec<platform::Model>, AppError> {
        self.store.list_platforms().await.map_err(AppError::Store)
    }

    /// Deletes the platform row and its key pair.
    pub async fn delete(&self, platform_url: &str) -> Result<(), AppError> {
        if platform_url.trim().is_empty() {
            return Err(AppError::missing_argument("Missing platform_url"));
        }
        let Some(platform) = self.store.find_platform(platform_url).await.map_err(AppError::Store)?
        else {
            return Ok(());
        };
        self.store.delete_platform(platform_url).await.map_err(AppError::Store)?;
        self.keyring.remove(&platform.kid).await?;
        Ok(())
    }

    /// Obtains (and caches) a service access token from the platform via
    /// the client-credentials grant with a JWT bearer client assertion
    /// signed by the tool's key for that platform.
    pub async fn access_token(
        &self,
        platform: &platform::Model,
        scopes: &str,
    ) -> Result<AccessToken, AppError> {
        let cache_key = format!("{}|{}", platform.platform_url, scopes);
        if let Some(entry) = self.tokens.get(&cache_key)
            && entry.expires_at > Instant::now()
        {
            return Ok(entry.token.clone());
        }

        let signing_key = self.keyring.signing_key(&platform.kid).await?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(platform.kid.clone());

        let now = util::unix_now();
        let assertion = ClientAssertion {
            iss: platform.client_id.clone(),
            sub: platform.client_id.clone(),
            aud: platform.accesstoken_endpoint.clone(),
            iat: now,
            exp: now + 60,
            jti: util::random_string(25),
        };
        let client_assertion = encode(&header, &assertion, &signing_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("client assertion signing failed: {e}")))?;

        let token: AccessToken = self
            .http
            .post(&platform.accesstoken_endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                ("client_assertion", client_assertion.as_str()),
                ("scope", scopes),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // refresh a minute early so in-flight requests never carry an
        // expired token
        let ttl = token.expires_in.unwrap_or(3600).saturating_sub(60).max(60);
        self.tokens.insert(
            cache_key,
            CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl),
            },
        );
        Ok(token)
    }
}

#[derive(Serialize)]
struct ClientAssertion {
    iss: String,
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    jti: String,
}
