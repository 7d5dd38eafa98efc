//! URL detection policy shared by every checker in linkguard.
//!
//! A `DetectionPolicy` is the serialisable contract (pattern source plus
//! case folding) and a `UrlDetector` is its compiled form.  The same policy
//! is handed to browser clients through `/client-config`, so the pattern
//! must stay within the syntax common to Rust and ECMAScript regexes.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Matches `http://` or `https://` followed by at least one non-whitespace
/// character, or `www.` followed by at least one non-whitespace character.
/// Whitespace is the ASCII set spelled out as a class: `\s` differs between
/// the Rust and ECMAScript engines outside ASCII (U+0085, U+FEFF).
pub const DEFAULT_PATTERN: &str = r"(https?://[^ \t\n\x0B\f\r]+)|(www\.[^ \t\n\x0B\f\r]+)";

/// Upper bound on a configured pattern source.
const MAX_PATTERN_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("detection pattern is empty")]
    Empty,
    #[error("detection pattern exceeds {max} bytes ({len})")]
    TooLong { len: usize, max: usize },
    #[error("detection pattern does not compile: {0}")]
    Invalid(#[from] regex::Error),
}

/// Serialisable description of what counts as a URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionPolicy {
    pub pattern: String,
    #[serde(default = "default_case_insensitive", alias = "case_insensitive")]
    pub case_insensitive: bool,
}

fn default_case_insensitive() -> bool {
    true
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_owned(),
            case_insensitive: true,
        }
    }
}

impl DetectionPolicy {
    /// ECMAScript flags equivalent to this policy.  No `g` flag: a global
    /// regex keeps `lastIndex` between `test` calls, which would make the
    /// client check depend on the previous field.
    pub fn js_flags(&self) -> &'static str {
        if self.case_insensitive {
            "i"
        } else {
            ""
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn compile(&self) -> Result<UrlDetector, PolicyError> {
        UrlDetector::new(self.clone())
    }
}

/// Compiled detector.  Cheap to share behind an `Arc`; all methods are pure.
#[derive(Clone, Debug)]
pub struct UrlDetector {
    policy: DetectionPolicy,
    re: Regex,
}

static DEFAULT_DETECTOR: Lazy<UrlDetector> = Lazy::new(|| {
    // DEFAULT_PATTERN is a literal checked by the tests below.
    UrlDetector::new(DetectionPolicy::default()).expect("default pattern compiles")
});

impl UrlDetector {
    pub fn new(policy: DetectionPolicy) -> Result<Self, PolicyError> {
        let source = policy.pattern.trim();
        if source.is_empty() {
            return Err(PolicyError::Empty);
        }
        if source.len() > MAX_PATTERN_LEN {
            return Err(PolicyError::TooLong {
                len: source.len(),
                max: MAX_PATTERN_LEN,
            });
        }
        let re = RegexBuilder::new(source)
            .case_insensitive(policy.case_insensitive)
            .build()?;
        Ok(Self { policy, re })
    }

    /// The built-in detector.
    pub fn builtin() -> &'static UrlDetector {
        &DEFAULT_DETECTOR
    }

    pub fn policy(&self) -> &DetectionPolicy {
        &self.policy
    }

    /// Returns true when `text` contains something URL-like.
    pub fn contains_url(&self, text: &str) -> bool {
        !text.is_empty() && self.re.is_match(text)
    }

    /// First URL-like substring, if any.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.re.find(text).map(|m| m.as_str())
    }
}

impl Default for UrlDetector {
    fn default() -> Self {
        DEFAULT_DETECTOR.clone()
    }
}

/// Convenience wrapper over the built-in detector.
pub fn contains_url(text: &str) -> bool {
    DEFAULT_DETECTOR.contains_url(text)
}
