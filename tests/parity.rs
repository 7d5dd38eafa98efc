//! The submission gate, the live validator, the remote check and a client
//! rebuilding the exported pattern must all agree on every input.

#[path = "common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::Request;
use common::{form_body, test_config};
use linkguard::live::{FieldKind, FormField, FormInstance, Trigger};
use linkguard::nonce::CHECK_ACTION;
use linkguard::{app, AppState, FieldValue, SubmissionGate};
use regex::RegexBuilder;
use tower::ServiceExt;

const CORPUS: &[&str] = &[
    "",
    "hello",
    "www.",
    "contact me at www.",
    "www.example",
    "WWW.EXAMPLE.COM",
    "visit https://example.com today",
    "HTTP://SHOUTING.EXAMPLE",
    "http://",
    "http:// spaced.example",
    "https:/one-slash.example",
    "ftp://files.example",
    "multi\nline\nwww.x",
    "trailing https://x\n",
    "email alice@example.com",
    "wwwexample.com",
    "é www.ü",
    "tab\thttp://t",
];

#[test]
fn server_and_live_validators_agree() {
    let state = AppState::from_config(test_config());
    for text in CORPUS {
        let server = !state
            .validator
            .validate(&[FieldValue::text("message", *text)])
            .is_empty();

        let mut form = FormInstance::new(vec![FormField::new("message", FieldKind::Textarea)]);
        let outcome = form.input(&state.live, "message", *text).unwrap();
        let submit = form.handle(&state.live, Trigger::Submit);

        assert_eq!(server, form.view().submit_disabled, "input {:?}", text);
        assert_eq!(server, submit.cancel, "input {:?}", text);
        assert!(!outcome.cancel);
        assert_eq!(server, state.detector.contains_url(text), "input {:?}", text);
    }
}

#[test]
fn exported_contract_rebuilds_the_same_detector() {
    let state = AppState::from_config(test_config());
    let policy = state.detector.policy();
    let rebuilt = RegexBuilder::new(&policy.pattern)
        .case_insensitive(policy.js_flags().contains('i'))
        .build()
        .unwrap();
    for text in CORPUS {
        assert_eq!(
            rebuilt.is_match(text),
            state.detector.contains_url(text),
            "input {:?}",
            text
        );
    }
}

#[tokio::test]
async fn remote_check_agrees_with_server() {
    let state = AppState::from_config(test_config());
    let router = app(state.clone());
    for text in CORPUS.iter().filter(|t| !t.trim().is_empty()) {
        let nonce = state.nonces.issue(CHECK_ACTION);
        let body = form_body(&[("nonce", nonce.as_str()), ("text", *text)]);
        let req = Request::builder()
            .method("POST")
            .uri("/check")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            json["data"]["containsUrl"],
            serde_json::Value::Bool(state.detector.contains_url(text)),
            "input {:?}",
            text
        );
    }
}

/// Characters where regex engines disagree about `\s`.  The verdicts are the
/// ones a browser computes from the exported pattern.
const WHITESPACE_VERDICTS: &[(&str, bool)] = &[
    ("www.\u{FEFF}", true),
    ("www.\u{0085}", true),
    ("www.\u{00A0}", true),
    ("www.\u{3000}", true),
    ("www.\u{2028}", true),
    ("http://\u{00A0}", true),
    ("see www.\u{00A0}x", true),
    ("www.\t", false),
    ("www.\u{000B}", false),
    ("www.\u{000C}", false),
    ("https://\r\nexample", false),
];

#[tokio::test]
async fn every_checker_matches_pinned_whitespace_verdicts() {
    let state = AppState::from_config(test_config());
    let router = app(state.clone());
    assert!(!state.detector.policy().pattern.contains(r"\S"));

    for (text, expected) in WHITESPACE_VERDICTS {
        assert_eq!(state.detector.contains_url(text), *expected, "detector {:?}", text);

        let gate = !state
            .validator
            .validate(&[FieldValue::text("message", *text)])
            .is_empty();
        assert_eq!(gate, *expected, "gate {:?}", text);

        let mut form = FormInstance::new(vec![FormField::new("message", FieldKind::Textarea)]);
        form.input(&state.live, "message", *text).unwrap();
        assert_eq!(form.view().submit_disabled, *expected, "live {:?}", text);
        assert_eq!(
            form.handle(&state.live, Trigger::Submit).cancel,
            *expected,
            "live submit {:?}",
            text
        );

        let nonce = state.nonces.issue(CHECK_ACTION);
        let body = form_body(&[("nonce", nonce.as_str()), ("text", *text)]);
        let req = Request::builder()
            .method("POST")
            .uri("/check")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            json["data"]["containsUrl"],
            serde_json::Value::Bool(*expected),
            "remote check {:?}",
            text
        );
    }
}
