use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Replay protection for ID token nonces: a nonce may be accepted once
/// per issuer within the TTL window.
pub struct NonceStore {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl NonceStore {
    /// `ttl` must cover at least the accepted ID token age.
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Records the nonce and reports whether it was fresh. The insert is
    /// a single atomic map operation, so two concurrent launches cannot
    /// both see the same nonce as fresh.
    pub fn check_and_insert(&self, iss: &str, nonce: &str) -> bool {
        self.evict_expired();
        let key = format!("{iss}#{nonce}");
        let now = Instant::now();
        match self.seen.insert(key, now) {
            Some(seen_at) if now.duration_since(seen_at) < self.ttl => false,
            _ => true,
        }
    }

    fn evict_expired(&self) {
        let ttl = self.ttl;
        self.seen.retain(|_, seen_at| seen_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
