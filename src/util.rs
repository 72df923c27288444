use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ring::rand::{SecureRandom, SystemRandom};

pub fn random_bytes(length: usize) -> Vec<u8> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; length];
    rng.fill(&mut bytes).unwrap();
    bytes
}

pub fn random_string(length: usize) -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(length)).chars().take(length).collect()
}

/// Lowercase alphanumeric nonce, used for the OIDC `state` and `nonce`
/// parameters.
pub fn random_base36(length: usize) -> String {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    random_bytes(length)
        .iter()
        .map(|b| CHARSET[(*b as usize) % CHARSET.len()] as char)
        .collect()
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
