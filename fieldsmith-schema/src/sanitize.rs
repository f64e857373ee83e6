//! Per-kind sanitizers for submitted values.
//!
//! One pure function per leaf kind, dispatched by exhaustive match on
//! [`FieldKind`]. Sanitizers never touch persistence; image fields carry
//! file payloads and are routed through the media collaborators by the
//! store, never through this module.

use serde_json::Value;
use url::Url;

use crate::types::FieldKind;

/// The outcome of sanitizing one submitted (field, value) pair.
///
/// A normalized value equal to the currently persisted one is always
/// `Unchanged` — no-ops never count as changes for diffing purposes.
#[derive(Debug, Clone, PartialEq)]
pub enum Sanitized {
    Unchanged,
    Changed(Value),
    Rejected(String),
}

impl Sanitized {
    /// Wrap a normalized value, collapsing to `Unchanged` when it equals
    /// the current persisted value.
    fn diffed(normalized: Value, current: Option<&Value>) -> Self {
        if current == Some(&normalized) {
            Sanitized::Unchanged
        } else {
            Sanitized::Changed(normalized)
        }
    }
}

/// Sanitize one raw submitted value against a leaf field kind.
///
/// `current` is the field's currently persisted value, used only to decide
/// `Unchanged` vs `Changed`. `Multiple` must be expanded to per-row calls
/// before reaching this function; `Image` expects a file payload and
/// rejects bare text values.
pub fn sanitize_leaf(kind: &FieldKind, raw: &Value, current: Option<&Value>) -> Sanitized {
    match kind {
        FieldKind::Text => Sanitized::diffed(Value::String(strip_control(&raw_text(raw))), current),
        FieldKind::Link { mandatory_domains } => sanitize_link(&raw_text(raw), mandatory_domains, current),
        FieldKind::Number { .. } => sanitize_number(kind, &raw_text(raw), current),
        FieldKind::Color => sanitize_color(&raw_text(raw), current),
        FieldKind::Image { .. } => {
            Sanitized::Rejected("image fields accept file uploads only".to_string())
        }
        FieldKind::Multiple { .. } => {
            Sanitized::Rejected("repeatable fields are sanitized per row".to_string())
        }
    }
}

/// Sanitize a display name: control characters stripped, edges trimmed.
/// Used for admin-submitted names during reconciliation.
pub fn sanitize_display_name(raw: &str) -> String {
    strip_control(raw).trim().to_string()
}

/// Render a raw JSON value as the text a user typed.
fn raw_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Drop control characters, keeping newlines and tabs.
fn strip_control(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

fn sanitize_link(raw: &str, mandatory_domains: &[String], current: Option<&Value>) -> Sanitized {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Sanitized::diffed(Value::String(String::new()), current);
    }

    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return Sanitized::Rejected("not a well-formed URL".to_string()),
    };
    let Some(host) = url.host_str() else {
        return Sanitized::Rejected("URL has no host".to_string());
    };

    if !mandatory_domains.is_empty() {
        let host = host.to_ascii_lowercase();
        let allowed = mandatory_domains.iter().any(|d| {
            let d = d.trim().to_ascii_lowercase();
            host == d || host.ends_with(&format!(".{d}"))
        });
        if !allowed {
            return Sanitized::Rejected(format!(
                "link must point at one of: {}",
                mandatory_domains.join(", ")
            ));
        }
    }

    Sanitized::diffed(Value::String(url.to_string()), current)
}

fn sanitize_number(kind: &FieldKind, raw: &str, current: Option<&Value>) -> Sanitized {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Sanitized::diffed(Value::Null, current);
    }

    let n: i64 = match trimmed.parse() {
        Ok(n) => n,
        Err(_) => return Sanitized::Rejected("must be an integer".to_string()),
    };

    // number_bounds() returns None when min > max, disabling the check.
    if let Some((min, max)) = kind.number_bounds() {
        if n < min || n > max {
            return Sanitized::Rejected(format!("must be between {min} and {max}"));
        }
    }

    Sanitized::diffed(Value::from(n), current)
}

fn sanitize_color(raw: &str, current: Option<&Value>) -> Sanitized {
    let hex: String = raw
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(6)
        .collect();
    if hex.len() != 6 {
        return Sanitized::Rejected("must be a color in #rrggbb form".to_string());
    }
    Sanitized::diffed(
        Value::String(format!("#{}", hex.to_ascii_lowercase())),
        current,
    )
}
