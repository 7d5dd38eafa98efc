//! Anti-forgery tokens for the remote check endpoint.
//!
//! A token is bound to an action name and to a time tick half a lifetime
//! long.  It verifies during the tick it was issued in and the one after.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Action name the remote check tokens are issued for.
pub const CHECK_ACTION: &str = "linkguard_check";

const TOKEN_LEN: usize = 10;

/// How old a verified token is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceAge {
    /// Issued during the current tick.
    Fresh,
    /// Issued during the previous tick.
    Aging,
}

#[derive(Clone)]
pub struct NonceIssuer {
    secret: Vec<u8>,
    lifetime: Duration,
}

impl std::fmt::Debug for NonceIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceIssuer")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl NonceIssuer {
    pub fn new(secret: impl Into<Vec<u8>>, lifetime: Duration) -> Self {
        Self {
            secret: secret.into(),
            lifetime,
        }
    }

    /// Issuer with a random per-process secret.
    pub fn ephemeral(lifetime: Duration) -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(secret.to_vec(), lifetime)
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(&self, action: &str) -> String {
        self.issue_at(action, now_secs())
    }

    pub fn verify(&self, token: &str, action: &str) -> Option<NonceAge> {
        self.verify_at(token, action, now_secs())
    }

    pub fn issue_at(&self, action: &str, now: u64) -> String {
        self.token_for_tick(self.tick(now), action)
    }

    pub fn verify_at(&self, token: &str, action: &str, now: u64) -> Option<NonceAge> {
        if token.is_empty() {
            return None;
        }
        let tick = self.tick(now);
        if constant_time_eq(token, &self.token_for_tick(tick, action)) {
            return Some(NonceAge::Fresh);
        }
        if tick > 0 && constant_time_eq(token, &self.token_for_tick(tick - 1, action)) {
            return Some(NonceAge::Aging);
        }
        None
    }

    fn tick(&self, now: u64) -> u64 {
        let half = (self.lifetime.as_secs() / 2).max(1);
        now.div_ceil(half)
    }

    fn token_for_tick(&self, tick: u64, action: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b"|");
        hasher.update(tick.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(action.as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex[..TOKEN_LEN].to_owned()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);
    const NOW: u64 = 1_700_000_000;

    fn issuer() -> NonceIssuer {
        NonceIssuer::new(b"test-secret".to_vec(), DAY)
    }

    #[test]
    fn token_is_ten_hex_chars() {
        let token = issuer().issue_at(CHECK_ACTION, NOW);
        assert_eq!(token.len(), 10);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fresh_then_aging_then_expired() {
        let n = issuer();
        let token = n.issue_at(CHECK_ACTION, NOW);
        assert_eq!(n.verify_at(&token, CHECK_ACTION, NOW), Some(NonceAge::Fresh));
        let half = DAY.as_secs() / 2;
        assert_eq!(
            n.verify_at(&token, CHECK_ACTION, NOW + half),
            Some(NonceAge::Aging)
        );
        assert_eq!(n.verify_at(&token, CHECK_ACTION, NOW + 2 * half), None);
    }

    #[test]
    fn bound_to_action_and_secret() {
        let n = issuer();
        let token = n.issue_at(CHECK_ACTION, NOW);
        assert_eq!(n.verify_at(&token, "other_action", NOW), None);
        let other = NonceIssuer::new(b"different".to_vec(), DAY);
        assert_eq!(other.verify_at(&token, CHECK_ACTION, NOW), None);
    }

    #[test]
    fn rejects_empty_and_garbage() {
        let n = issuer();
        assert_eq!(n.verify_at("", CHECK_ACTION, NOW), None);
        assert_eq!(n.verify_at("-1", CHECK_ACTION, NOW), None);
        assert_eq!(n.verify_at("zzzzzzzzzz", CHECK_ACTION, NOW), None);
    }

    #[test]
    fn ephemeral_issuers_differ() {
        let a = NonceIssuer::ephemeral(DAY);
        let b = NonceIssuer::ephemeral(DAY);
        let token = a.issue(CHECK_ACTION);
        assert!(a.verify(&token, CHECK_ACTION).is_some());
        assert!(b.verify(&token, CHECK_ACTION).is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let text = format!("{:?}", issuer());
        assert!(!text.contains("test-secret"));
        assert!(!text.contains("116"));
    }
}
