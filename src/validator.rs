use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::platform::{self, AuthConfig};
use crate::error::AppError;
use crate::nonce::NonceStore;
use crate::store::Store;
use crate::util;

pub const MESSAGE_TYPE_RESOURCE_LINK: &str = "LtiResourceLinkRequest";
pub const MESSAGE_TYPE_DEEP_LINKING: &str = "LtiDeepLinkingRequest";
pub const LTI_VERSION: &str = "1.3.0";

/// `aud` may be a single value or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLink {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextClaim {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The claims of a validated LTI launch token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtiClaims {
    pub iss: String,
    #[serde(default)]
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    pub nbf: Option<i64>,
    pub azp: Option<String>,
    pub nonce: Option<String>,

    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,

    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
    pub message_type: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
    pub version: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
    pub deployment_id: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri")]
    pub target_link_uri: Option<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link")]
    pub resource_link: Option<ResourceLink>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/context")]
    pub context: Option<ContextClaim>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/roles", default)]
    pub roles: Vec<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/custom")]
    pub custom: Option<Value>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/launch_presentation")]
    pub launch_presentation: Option<Value>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/lis")]
    pub lis: Option<Value>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/tool_platform")]
    pub platform_info: Option<Value>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint")]
    pub endpoint: Option<Value>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-nrps/claim/namesrolesservice")]
    pub names_roles: Option<Value>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings")]
    pub deep_linking_settings: Option<Value>,
}

impl LtiClaims {
    pub fn is_deep_linking(&self) -> bool {
        self.message_type.as_deref() == Some(MESSAGE_TYPE_DEEP_LINKING)
    }
}

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// Verifies inbound ID tokens against each platform's declared key
/// source and enforces the launch claim rules.
pub struct TokenValidator {
    store: Arc<dyn Store>,
    nonces: NonceStore,
    http: reqwest::Client,
    jwks_cache: DashMap<String, CachedJwks>,
    jwks_ttl: Duration,
    dev_mode: bool,
    token_max_age: Option<u64>,
}

impl TokenValidator {
    pub fn new(
        store: Arc<dyn Store>,
        nonces: NonceStore,
        dev_mode: bool,
        token_max_age: Option<u64>,
    ) -> Self {
        Self {
            store,
            nonces,
            http: reqwest::Client::new(),
            jwks_cache: DashMap::new(),
            jwks_ttl: Duration::from_secs(300),
            dev_mode,
            token_max_age,
        }
    }

    /// Validates a compact ID token. `expected_iss` is the value of the
    /// state cookie set at login; in dev mode a missing cookie falls back
    /// to the issuer named by the token itself.
    pub async fn validate(
        &self,
        id_token: &str,
        expected_iss: Option<&str>,
    ) -> Result<(platform::Model, LtiClaims), AppError> {
        let header = decode_header(id_token)
            .map_err(|e| AppError::malformed_token(format!("undecodable token header: {e}")))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| AppError::malformed_token("token header carries no kid"))?;
        if !matches!(
            header.alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ) {
            return Err(AppError::malformed_token(format!(
                "unsupported token algorithm: {:?}",
                header.alg
            )));
        }

        let payload_iss = peek_issuer(id_token)?;
        let iss = match expected_iss {
            Some(expected) => {
                if payload_iss != expected {
                    return Err(AppError::IssuerMismatch(format!(
                        "token issuer {payload_iss} does not match the login issuer"
                    )));
                }
                expected.to_string()
            }
            None if self.dev_mode => payload_iss,
            None => {
                return Err(AppError::IssuerMismatch(
                    "no issuer bound to this launch".to_string(),
                ));
            }
        };

        let platform = self
            .store
            .find_platform(&iss)
            .await
            .map_err(AppError::Store)?
            .ok_or_else(|| AppError::unregistered_platform(&iss))?;

        let decoding_key = self.resolve_key(&platform, &kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.leeway = 0;
        let claims = decode::<LtiClaims>(id_token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AppError::BadSignature,
                ErrorKind::ExpiredSignature => AppError::invalid_claims("token has expired"),
                _ => AppError::malformed_token(format!("undecodable token: {e}")),
            })?;

        self.check_claims(&platform, &claims)?;
        Ok((platform, claims))
    }

    async fn resolve_key(
        &self,
        platform: &platform::Model,
        kid: &str,
    ) -> Result<DecodingKey, AppError> {
        match platform
            .auth_config()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("platform auth config is invalid: {e}")))?
        {
            AuthConfig::RsaKey(pem) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AppError::Internal(anyhow::anyhow!("platform RSA key is invalid: {e}"))),
            AuthConfig::Jwk(jwk) => {
                let jwk: Jwk = serde_json::from_value(jwk)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("platform JWK is invalid: {e}")))?;
                DecodingKey::from_jwk(&jwk)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("platform JWK is unusable: {e}")))
            }
            AuthConfig::JwkSet(url) => self.key_from_remote_set(&url, kid).await,
        }
    }

    /// Looks the `kid` up in the platform's remote JWKS, fetching through
    /// a short-lived per-URL cache.
    async fn key_from_remote_set(&self, url: &str, kid: &str) -> Result<DecodingKey, AppError> {
        let jwks = self.get_jwks(url).await?;
        let jwk = match find_jwk(&jwks, kid) {
            Some(jwk) => jwk.clone(),
            None => {
                // the platform may have rotated since the cache was filled
                let refreshed = self.refresh_jwks(url).await?;
                find_jwk(&refreshed, kid)
                    .cloned()
                    .ok_or_else(|| AppError::UnknownKeyId(kid.to_string()))?
            }
        };
        DecodingKey::from_jwk(&jwk)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("platform JWKS key is unusable: {e}")))
    }

    async fn get_jwks(&self, url: &str) -> Result<JwkSet, AppError> {
        if let Some(entry) = self.jwks_cache.get(url)
            && entry.expires_at > Instant::now()
        {
            return Ok(entry.jwks.clone());
        }
        self.refresh_jwks(url).await
    }

    async fn refresh_jwks(&self, url: &str) -> Result<JwkSet, AppError> {
        tracing::debug!(url = %url, "fetching platform JWKS");
        let jwks: JwkSet = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JWKS fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JWKS response is invalid: {e}")))?;
        self.jwks_cache.insert(
            url.to_string(),
            CachedJwks {
                jwks: jwks.clone(),
                expires_at: Instant::now() + self.jwks_ttl,
            },
        );
        Ok(jwks)
    }

    fn check_claims(&self, platform: &platform::Model, claims: &LtiClaims) -> Result<(), AppError> {
        if !claims.aud.contains(&platform.client_id) {
            return Err(AppError::invalid_claims("aud does not include this tool's client id"));
        }
        if let Some(azp) = &claims.azp
            && azp != &platform.client_id
        {
            return Err(AppError::invalid_claims("azp does not match this tool's client id"));
        }

        let now = util::unix_now();
        if claims.iat > now {
            return Err(AppError::invalid_claims("iat is in the future"));
        }
        if let Some(nbf) = claims.nbf
            && nbf > now
        {
            return Err(AppError::invalid_claims("token is not yet valid"));
        }
        if let Some(max_age) = self.token_max_age
            && now - claims.iat > max_age as i64
        {
            return Err(AppError::invalid_claims("token is too old"));
        }

        let nonce = claims
            .nonce
            .as_deref()
            .filter(|nonce| !nonce.is_empty())
            .ok_or_else(|| AppError::invalid_claims("missing nonce"))?;
        if !self.nonces.check_and_insert(&claims.iss, nonce) {
            return Err(AppError::invalid_claims("nonce replay"));
        }

        let message_type = claims
            .message_type
            .as_deref()
            .ok_or_else(|| AppError::invalid_claims("missing message type claim"))?;
        if message_type != MESSAGE_TYPE_RESOURCE_LINK && message_type != MESSAGE_TYPE_DEEP_LINKING {
            return Err(AppError::invalid_claims(format!(
                "unsupported message type: {message_type}"
            )));
        }
        if claims.version.as_deref() != Some(LTI_VERSION) {
            return Err(AppError::invalid_claims("unsupported LTI version"));
        }
        claims
            .deployment_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid_claims("missing deployment id claim"))?;
        if message_type == MESSAGE_TYPE_RESOURCE_LINK {
            claims
                .resource_link
                .as_ref()
                .filter(|link| !link.id.is_empty())
                .ok_or_else(|| AppError::invalid_claims("missing resource link claim"))?;
        }
        claims
            .target_link_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| AppError::invalid_claims("missing target link uri claim"))?;
        if claims.sub.is_empty() {
            return Err(AppError::invalid_claims("anonymous launches are not supported"));
        }

        Ok(())
    }
}

fn find_jwk<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .find(|key| key.common.key_id.as_deref() == Some(kid))
}

/// Reads `iss` out of the payload without trusting the signature; used
/// only to pick the verification key and to cross-check the login cookie.
fn peek_issuer(token: &str) -> Result<String, AppError> {
    let mut parts = token.split('.');
    let _header = parts.next();
    let payload = parts
        .next()
        .ok_or_else(|| AppError::malformed_token("token is not a compact JWS"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AppError::malformed_token("token payload is not base64url"))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|_| AppError::malformed_token("token payload is not JSON"))?;
    claims
        .get("iss")
        .and_then(|iss| iss.as_str())
        .map(|iss| iss.to_string())
        .ok_or_else(|| AppError::malformed_token("token carries no issuer"))
}
