//! Text clean-up applied to remote check payloads before detection.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LESS_THAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>?").unwrap());
static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script[^>]*?>.*?</script>").unwrap());
static STYLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<style[^>]*?>.*?</style>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static OCTET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"%[a-fA-F0-9]{2}").unwrap());

/// Sanitise multi-line form text: unslash, strip markup, drop
/// percent-encoded octets and trim.  Interior newlines survive.
pub fn sanitize_textarea(raw: &str) -> String {
    let mut text = unslash(raw);

    if text.contains('<') {
        text = escape_lone_less_than(&text);
        text = SCRIPT_RE.replace_all(&text, "").into_owned();
        text = STYLE_RE.replace_all(&text, "").into_owned();
        text = TAG_RE.replace_all(&text, "").into_owned();
    }

    // Removing one octet can splice two halves into a new one ("%%4141").
    while OCTET_RE.is_match(&text) {
        text = OCTET_RE.replace_all(&text, "").into_owned();
    }

    text.trim_matches(is_trimmed).to_owned()
}

/// Characters stripped from both ends: ASCII whitespace, NUL and VT only,
/// so a trailing U+00A0 still counts as part of a URL.
fn is_trimmed(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B')
}

/// Undo backslash escaping: `\x` becomes `x`, `\\` becomes `\`.
pub fn unslash(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// A `<` that never closes is text, not markup; encode it so tag
/// stripping leaves the rest of the line alone.
fn escape_lone_less_than(text: &str) -> String {
    LESS_THAN_RE
        .replace_all(text, |caps: &Captures| {
            let m = &caps[0];
            if m.ends_with('>') {
                m.to_owned()
            } else {
                format!("&lt;{}", &m[1..])
            }
        })
        .into_owned()
}
