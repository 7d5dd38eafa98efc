//! Live form validation as seen from the browser.
//!
//! `FormInstance` holds the UI state of one rendered form.  Each trigger
//! rescans every relevant field with the shared detector and recomputes
//! the whole view, so handling the same trigger twice is a no-op.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::detector::UrlDetector;

/// Banner text shown while any field holds a URL.
pub const DEFAULT_BANNER_MESSAGE: &str =
    "URLs are not allowed in form fields. Please remove any URLs to submit the form.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Email,
    Textarea,
    Other,
}

impl FieldKind {
    /// Kinds the validator watches.
    pub const WATCHED: [FieldKind; 3] = [FieldKind::Text, FieldKind::Email, FieldKind::Textarea];

    pub fn is_watched(self) -> bool {
        !matches!(self, FieldKind::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Email => "email",
            FieldKind::Textarea => "textarea",
            FieldKind::Other => "other",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub value: String,
}

impl FormField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// A watched field changed.
    Input,
    /// The user submitted the form.
    Submit,
    /// The host finished its own submit handling.
    PostSubmit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BannerTransition {
    SlideDown,
    SlideUp,
    Unchanged,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormView {
    pub invalid_fields: BTreeSet<String>,
    pub submit_disabled: bool,
    pub banner_visible: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerOutcome {
    /// True when the submission must be cancelled client-side.
    pub cancel: bool,
    pub banner: BannerTransition,
}

#[derive(Clone, Debug)]
pub struct LiveValidator {
    detector: Arc<UrlDetector>,
    banner_message: String,
}

impl LiveValidator {
    pub fn new(detector: Arc<UrlDetector>, banner_message: impl Into<String>) -> Self {
        Self {
            detector,
            banner_message: banner_message.into(),
        }
    }

    pub fn banner_message(&self) -> &str {
        &self.banner_message
    }

    /// Scan the watched fields and produce a fresh view.
    pub fn scan(&self, fields: &[FormField]) -> FormView {
        let invalid_fields: BTreeSet<String> = fields
            .iter()
            .filter(|f| f.kind.is_watched() && self.detector.contains_url(&f.value))
            .map(|f| f.name.clone())
            .collect();
        let has_url = !invalid_fields.is_empty();
        FormView {
            invalid_fields,
            submit_disabled: has_url,
            banner_visible: has_url,
        }
    }
}

impl Default for LiveValidator {
    fn default() -> Self {
        Self::new(Arc::new(UrlDetector::default()), DEFAULT_BANNER_MESSAGE)
    }
}

/// UI state of a single rendered form.
#[derive(Clone, Debug, Default)]
pub struct FormInstance {
    fields: Vec<FormField>,
    view: FormView,
}

impl FormInstance {
    pub fn new(fields: Vec<FormField>) -> Self {
        Self {
            fields,
            view: FormView::default(),
        }
    }

    pub fn view(&self) -> &FormView {
        &self.view
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    /// Type into a field and fire the input trigger when the field is
    /// watched.  Returns `None` for unknown or unwatched fields.
    pub fn input(
        &mut self,
        validator: &LiveValidator,
        name: &str,
        value: impl Into<String>,
    ) -> Option<TriggerOutcome> {
        let field = self.fields.iter_mut().find(|f| f.name == name)?;
        field.value = value.into();
        if !field.kind.is_watched() {
            return None;
        }
        Some(self.handle(validator, Trigger::Input))
    }

    /// Recompute the view for `trigger`.
    pub fn handle(&mut self, validator: &LiveValidator, trigger: Trigger) -> TriggerOutcome {
        let next = validator.scan(&self.fields);
        let banner = match (self.view.banner_visible, next.banner_visible) {
            (false, true) => BannerTransition::SlideDown,
            (true, false) => BannerTransition::SlideUp,
            _ => BannerTransition::Unchanged,
        };
        let cancel = match trigger {
            Trigger::Input => false,
            Trigger::Submit | Trigger::PostSubmit => next.submit_disabled,
        };
        if cancel {
            tracing::debug!(
                invalid = next.invalid_fields.len(),
                ?trigger,
                "client submission cancelled"
            );
        }
        self.view = next;
        TriggerOutcome { cancel, banner }
    }
}
