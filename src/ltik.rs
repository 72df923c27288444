use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::keyring::MasterKey;
use crate::util;

/// Payload of the launch continuation token carried by in-tool requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LtikClaims {
    #[serde(rename = "platformUrl")]
    pub platform_url: String,
    #[serde(rename = "deploymentId")]
    pub deployment_id: String,
    #[serde(rename = "platformCode")]
    pub platform_code: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    pub user: String,
    /// State nonce of the originating launch.
    pub s: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Signs and verifies the continuation token (HS256 under the master
/// key). Without a configured max age the token carries no expiry; its
/// lifetime is bounded by the session cookie and the stored launch rows.
#[derive(Clone)]
pub struct LtikCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    max_age: Option<u64>,
}

impl LtikCodec {
    pub fn new(master: &MasterKey, max_age: Option<u64>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(master.ltik_secret()),
            decoding: DecodingKey::from_secret(master.ltik_secret()),
            max_age,
        }
    }

    pub fn encode(&self, mut claims: LtikClaims) -> Result<String, AppError> {
        if let Some(max_age) = self.max_age {
            claims.exp = Some(util::unix_now() as u64 + max_age);
        }
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("ltik signing failed: {e}")))
    }

    /// Signature (and, when configured, expiry) verification only; the
    /// semantic checks happen against the session cookie and the store.
    pub fn decode(&self, token: &str) -> Result<LtikClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = self.max_age.is_some();
        decode::<LtikClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AppError::BadSignature,
                _ => AppError::malformed_token(format!("invalid ltik: {e}")),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> LtikClaims {
        LtikClaims {
            platform_url: "https://lms.example/".to_string(),
            deployment_id: "d".to_string(),
            platform_code: "lti-code".to_string(),
            context_id: "ctx".to_string(),
            user: "u1".to_string(),
            s: "state123".to_string(),
            exp: None,
        }
    }

    #[test]
    fn round_trip_returns_the_signed_payload() {
        let codec = LtikCodec::new(&MasterKey::new("secret"), None);
        let token = codec.encode(claims()).unwrap();
        assert_eq!(codec.decode(&token).unwrap(), claims());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let codec = LtikCodec::new(&MasterKey::new("secret"), None);
        let token = codec.encode(claims()).unwrap();

        let mut bytes = token.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert!(matches!(
            codec.decode(&tampered),
            Err(AppError::BadSignature) | Err(AppError::MalformedToken(_))
        ));
    }

    #[test]
    fn different_master_keys_do_not_verify() {
        let signer = LtikCodec::new(&MasterKey::new("secret-a"), None);
        let verifier = LtikCodec::new(&MasterKey::new("secret-b"), None);
        let token = signer.encode(claims()).unwrap();
        assert!(matches!(verifier.decode(&token), Err(AppError::BadSignature)));
    }

    #[test]
    fn max_age_knob_adds_and_enforces_expiry() {
        let codec = LtikCodec::new(&MasterKey::new("secret"), Some(3600));
        let token = codec.encode(claims()).unwrap();
        let decoded = codec.decode(&token).unwrap();
        assert!(decoded.exp.is_some());

        // a token whose expiry is well in the past no longer verifies
        let mut stale = claims();
        stale.exp = Some((util::unix_now() - 600) as u64);
        let key = EncodingKey::from_secret(b"secret");
        let stale_token = encode(&Header::default(), &stale, &key).unwrap();
        assert!(codec.decode(&stale_token).is_err());
    }
}
