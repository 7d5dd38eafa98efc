use std::collections::HashSet;
use std::env;
use std::fs;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detector::{DetectionPolicy, UrlDetector, DEFAULT_PATTERN};
use crate::live::DEFAULT_BANNER_MESSAGE;
use crate::validator::DEFAULT_FIELD_MESSAGE;

/// Default token lifetime, one day.
const DEFAULT_NONCE_LIFETIME_SECS: u64 = 86_400;

/// Optional JSON file overriding the detection policy and user-facing text.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyFile {
    pattern: Option<String>,
    #[serde(alias = "case_insensitive")]
    case_insensitive: Option<bool>,
    #[serde(alias = "field_message")]
    field_message: Option<String>,
    #[serde(alias = "banner_message")]
    banner_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub detector: UrlDetector,
    pub field_message: String,
    pub banner_message: String,
    pub allowed_tokens: Option<HashSet<String>>,
    pub max_request_bytes: Option<usize>,
    pub nonce_secret: Option<String>,
    pub nonce_lifetime_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let file = if let Ok(path) = env::var("LINKGUARD_POLICY_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!(
                    "Failed to read LINKGUARD_POLICY_CONFIG '{}': file unreadable",
                    path
                )
            })?;
            let file = serde_json::from_str::<PolicyFile>(&content).with_context(|| {
                format!(
                    "Failed to parse LINKGUARD_POLICY_CONFIG '{}': invalid JSON configuration",
                    path
                )
            })?;
            Some((path, file))
        } else {
            None
        };

        let (detector, field_message, banner_message) = match file {
            Some((path, file)) => {
                let policy = DetectionPolicy {
                    pattern: file.pattern.unwrap_or_else(|| DEFAULT_PATTERN.to_owned()),
                    case_insensitive: file.case_insensitive.unwrap_or(true),
                };
                let detector = policy.compile().with_context(|| {
                    format!("Invalid pattern in LINKGUARD_POLICY_CONFIG '{}'", path)
                })?;
                (
                    detector,
                    non_empty(file.field_message).unwrap_or_else(|| DEFAULT_FIELD_MESSAGE.into()),
                    non_empty(file.banner_message)
                        .unwrap_or_else(|| DEFAULT_BANNER_MESSAGE.into()),
                )
            }
            None => (
                UrlDetector::default(),
                DEFAULT_FIELD_MESSAGE.to_owned(),
                DEFAULT_BANNER_MESSAGE.to_owned(),
            ),
        };

        let allowed_tokens = env::var("LINKGUARD_ALLOWED_TOKENS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<HashSet<_>>()
            })
            .filter(|set: &HashSet<String>| !set.is_empty());

        let max_request_bytes =
            parse_optional_u64("LINKGUARD_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let nonce_secret = env::var("LINKGUARD_NONCE_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let nonce_lifetime_secs = parse_optional_u64("LINKGUARD_NONCE_LIFETIME_SECS")?
            .unwrap_or(DEFAULT_NONCE_LIFETIME_SECS);
        if nonce_lifetime_secs < 2 {
            return Err(anyhow!(
                "LINKGUARD_NONCE_LIFETIME_SECS must be at least 2 seconds"
            ));
        }

        Ok(Self {
            detector,
            field_message,
            banner_message,
            allowed_tokens,
            max_request_bytes,
            nonce_secret,
            nonce_lifetime_secs,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
