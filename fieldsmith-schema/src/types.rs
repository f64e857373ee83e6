//! Core schema types for the field registry.
//!
//! All types serialize to/from YAML via serde. Field definitions describe
//! named, typed attributes a user can fill in. User types gate which fields
//! a given user sees. Registrations bind a user to a user type plus any
//! extra per-user field grants.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Slug of the synthetic user type inserted whenever the catalog would
/// otherwise be empty.
pub const DEFAULT_USER_TYPE_SLUG: &str = "default_type";

/// The kind of a field — determines how a submitted value is sanitized.
///
/// This is a closed set: the catalog of kinds is fixed and not user-editable.
/// `Multiple` is never a leaf validation kind; its child must be one of the
/// other five.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldKind {
    Text,
    Link {
        /// When non-empty, the submitted URL's host must be one of these
        /// domains (or a subdomain of one).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mandatory_domains: Vec<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Color,
    /// Stores a blob path, not pixel data. Width/height parameterize the
    /// delegated resize; zero means "leave that dimension alone".
    Image {
        #[serde(default)]
        width: u32,
        #[serde(default)]
        height: u32,
    },
    /// A bounded-length ordered sequence of child-kinded values.
    /// `max_len == 0` means unbounded.
    Multiple {
        child: Box<FieldKind>,
        #[serde(default)]
        min_len: usize,
        #[serde(default)]
        max_len: usize,
    },
}

impl FieldKind {
    /// The stable string identifier for this kind.
    pub fn type_id(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Link { .. } => "link",
            FieldKind::Number { .. } => "number",
            FieldKind::Color => "color",
            FieldKind::Image { .. } => "image",
            FieldKind::Multiple { .. } => "multiple",
        }
    }

    /// Whether this kind can be validated directly (everything but `Multiple`).
    pub fn is_leaf(&self) -> bool {
        !matches!(self, FieldKind::Multiple { .. })
    }

    /// Whether the numeric range check is active.
    ///
    /// Both bounds must be present and `min <= max`. A catalog carrying
    /// `min > max` disables the check entirely — a long-standing quirk that
    /// is preserved, not extended.
    pub fn number_bounds(&self) -> Option<(i64, i64)> {
        match self {
            FieldKind::Number {
                min: Some(min),
                max: Some(max),
            } if min <= max => Some((*min, *max)),
            _ => None,
        }
    }
}

/// A descriptor in the fixed, non-editable catalog of field types.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTypeDescriptor {
    pub type_id: &'static str,
    pub display_name: &'static str,
    /// Names of the special parameters this kind accepts.
    pub special_params: &'static [&'static str],
}

const FIELD_TYPES: &[FieldTypeDescriptor] = &[
    FieldTypeDescriptor {
        type_id: "text",
        display_name: "Text",
        special_params: &[],
    },
    FieldTypeDescriptor {
        type_id: "link",
        display_name: "Link",
        special_params: &["mandatory_domains"],
    },
    FieldTypeDescriptor {
        type_id: "number",
        display_name: "Number",
        special_params: &["min", "max"],
    },
    FieldTypeDescriptor {
        type_id: "color",
        display_name: "Color",
        special_params: &[],
    },
    FieldTypeDescriptor {
        type_id: "image",
        display_name: "Image",
        special_params: &["width", "height"],
    },
    FieldTypeDescriptor {
        type_id: "multiple",
        display_name: "Repeatable",
        special_params: &["child", "min_len", "max_len"],
    },
];

/// The full built-in field type catalog.
pub fn field_type_catalog() -> &'static [FieldTypeDescriptor] {
    FIELD_TYPES
}

/// Look up a field type descriptor by its identifier.
pub fn field_type(type_id: &str) -> Option<&'static FieldTypeDescriptor> {
    FIELD_TYPES.iter().find(|d| d.type_id == type_id)
}

/// A field definition — the complete schema for a single named attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDef {
    pub id: Ulid,
    pub slug: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// User type slugs allowed to see this field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_user_types: Vec<String>,
    /// Display/evaluation order, ascending. Tie-break key on merge.
    #[serde(default)]
    pub score: i64,
}

impl FieldDef {
    /// The value a user gets before ever submitting this field.
    ///
    /// Multiple fields default to an empty sequence regardless of the
    /// configured per-row default.
    pub fn default_value(&self) -> Value {
        match &self.kind {
            FieldKind::Multiple { .. } => Value::Array(Vec::new()),
            _ => self.default.clone().unwrap_or(Value::Null),
        }
    }

    /// The per-row default for a multiple field (or the plain default for
    /// a leaf).
    pub fn row_default(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

/// A concrete, indexable unit derived on demand from a [`FieldDef`].
///
/// A leaf field yields exactly one instance with no parent/index. A
/// `Multiple` field yields one instance per row, with slugs of the form
/// `parent_slug + "_" + index`. Instances are never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInstance {
    pub slug: String,
    pub display_name: String,
    pub kind: FieldKind,
    pub parent_slug: Option<String>,
    pub index: Option<usize>,
}

/// One entry in the ordered user-type catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserType {
    pub slug: String,
    pub display_name: String,
}

impl UserType {
    /// The synthetic entry inserted when a catalog would otherwise be empty.
    pub fn synthetic_default() -> Self {
        Self {
            slug: DEFAULT_USER_TYPE_SLUG.to_string(),
            display_name: "Default type".to_string(),
        }
    }
}

/// A user registration: which user type a user has, plus any fields granted
/// to that user individually.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub user_id: String,
    pub user_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub special_fields: Vec<String>,
}

/// An opaque token identifying the schema shape a rendered form was
/// generated against. Compared against the live token before a submission
/// is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaVersionToken(String);

impl SchemaVersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchemaVersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
