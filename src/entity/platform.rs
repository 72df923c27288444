use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::{Deserialize, Serialize};

/// How a platform declares the key material used to verify its ID tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "key")]
pub enum AuthConfig {
    /// A PEM-encoded RSA public key.
    #[serde(rename = "RSA_KEY")]
    RsaKey(String),
    /// A single JWK document.
    #[serde(rename = "JWK_KEY")]
    Jwk(serde_json::Value),
    /// A remote JWKS URL; keys are selected by the token header `kid`.
    #[serde(rename = "JWK_SET")]
    JwkSet(String),
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "platforms")]
pub struct Model {
    /// Issuer URL; the trust anchor key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub platform_url: String,
    pub name: String,
    pub client_id: String,
    pub auth_endpoint: String,
    pub accesstoken_endpoint: String,
    /// The tool's key pair used when talking to this platform.
    pub kid: String,
    pub auth_config: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            created_at: Set(Utc::now()),
            ..ActiveModelTrait::default()
        }
    }
}

impl Model {
    pub fn auth_config(&self) -> Result<AuthConfig, serde_json::Error> {
        serde_json::from_str(&self.auth_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_round_trips_through_json() {
        for config in [
            AuthConfig::RsaKey("-----BEGIN PUBLIC KEY-----".to_string()),
            AuthConfig::Jwk(serde_json::json!({ "kty": "RSA", "n": "abc", "e": "AQAB" })),
            AuthConfig::JwkSet("https://lms.example/jwks".to_string()),
        ] {
            let encoded = serde_json::to_string(&config).unwrap();
            let decoded: AuthConfig = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, config);
        }
    }

    #[test]
    fn auth_config_uses_wire_method_names() {
        let encoded = serde_json::to_string(&AuthConfig::JwkSet("u".to_string())).unwrap();
        assert!(encoded.contains("JWK_SET"));
    }
}
