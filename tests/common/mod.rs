#![allow(dead_code)]

use std::collections::HashMap;

use linkguard::detector::UrlDetector;
use linkguard::live::DEFAULT_BANNER_MESSAGE;
use linkguard::validator::DEFAULT_FIELD_MESSAGE;
use linkguard::AppConfig;

pub const TEST_SECRET: &str = "integration-secret";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    /// Remove every `LINKGUARD_*` variable so a test starts from defaults.
    pub fn clear_linkguard(&mut self) {
        let keys: Vec<String> = std::env::vars()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with("LINKGUARD_"))
            .collect();
        for key in keys {
            self.remove(&key);
        }
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Configuration with a fixed token secret and no environment involved.
pub fn test_config() -> AppConfig {
    AppConfig {
        detector: UrlDetector::default(),
        field_message: DEFAULT_FIELD_MESSAGE.to_owned(),
        banner_message: DEFAULT_BANNER_MESSAGE.to_owned(),
        allowed_tokens: None,
        max_request_bytes: None,
        nonce_secret: Some(TEST_SECRET.to_owned()),
        nonce_lifetime_secs: 86_400,
    }
}

/// `application/x-www-form-urlencoded` body from key/value pairs.
pub fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
