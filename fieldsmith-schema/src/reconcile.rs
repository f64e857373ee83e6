//! Catalog reconciliation.
//!
//! An admin edit submits the *entire* desired catalog. Reconciliation merges
//! it against the previously persisted catalog in three phases — prune,
//! update, insert — so that untouched entries survive byte-for-byte:
//!
//! 1. **Prune**: every existing entry whose key is absent from the
//!    submission is dropped. Absence means the admin removed it.
//! 2. **Update**: retained entries are merged with their edit payload
//!    through the field-level sanitizers. A requested rename is honored
//!    only when the normalized new identifier collides with nothing
//!    retained; otherwise it is silently dropped.
//! 3. **Insert**: entries tagged `new` are materialized with defaulted
//!    payloads and deterministic slugs, skipped on collision.
//!
//! The same submission applied twice is a no-op the second time:
//! `reconcile(reconcile(C, S), S) == reconcile(C, S)`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::sanitize::sanitize_display_name;
use crate::slug::slugify;
use crate::types::{FieldDef, FieldKind, Registration, UserType};

/// One admin edit against the field catalog.
///
/// `slug` addresses an existing entry (or proposes a name for a `new_entry`).
/// Every other member is "apply when present".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldEdit {
    pub slug: String,
    #[serde(default)]
    pub new_entry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FieldKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_user_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

impl FieldEdit {
    /// An edit that just keeps an existing entry alive, unchanged.
    pub fn keep(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }

    /// An edit materializing a new field.
    pub fn new_field(slug: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            slug: slug.into(),
            new_entry: true,
            kind: Some(kind),
            ..Self::default()
        }
    }
}

/// One admin edit against the user-type catalog.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserTypeEdit {
    pub slug: String,
    #[serde(default)]
    pub new_entry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserTypeEdit {
    pub fn keep(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }
}

/// One admin edit against the registration catalog.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistrationEdit {
    pub user_id: String,
    #[serde(default)]
    pub new_entry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_fields: Option<Vec<String>>,
}

impl RegistrationEdit {
    pub fn keep(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

/// Validate and normalize an edited field kind.
///
/// A `Multiple` child must be a leaf kind; inverted repeat bounds are
/// clamped (`min_len <= max_len` unless `max_len == 0`). Returns `None`
/// when the kind is structurally invalid, in which case the old kind is
/// kept.
fn normalize_kind(kind: &FieldKind) -> Option<FieldKind> {
    match kind {
        FieldKind::Multiple {
            child,
            min_len,
            max_len,
        } => {
            if !child.is_leaf() {
                return None;
            }
            let min_len = if *max_len != 0 {
                (*min_len).min(*max_len)
            } else {
                *min_len
            };
            Some(FieldKind::Multiple {
                child: child.clone(),
                min_len,
                max_len: *max_len,
            })
        }
        leaf => Some(leaf.clone()),
    }
}

/// Merge an admin-submitted field catalog against the persisted one.
///
/// `user_types` is the current (already reconciled, when both change in one
/// request) user-type catalog; `allowed_user_types` references outside it
/// are dropped.
pub fn reconcile_field_catalog(
    existing: &[FieldDef],
    edits: &[FieldEdit],
    user_types: &[UserType],
) -> Vec<FieldDef> {
    let known_types: HashSet<&str> = user_types.iter().map(|t| t.slug.as_str()).collect();
    let filter_types = |types: &[String]| -> Vec<String> {
        types
            .iter()
            .map(|t| slugify(t))
            .filter(|t| known_types.contains(t.as_str()))
            .collect()
    };

    // Rename targets count as submission keys: once a rename has been
    // applied, re-applying the same submission must retain the entry
    // under its new identifier.
    let mut submitted: HashSet<String> = HashSet::new();
    for edit in edits {
        let key = slugify(&edit.slug);
        if !key.is_empty() {
            submitted.insert(key);
        }
        if let Some(target) = &edit.rename_to {
            let target = slugify(target);
            if !target.is_empty() {
                submitted.insert(target);
            }
        }
    }

    // Phase 1: prune.
    let mut retained: Vec<FieldDef> = existing
        .iter()
        .filter(|f| submitted.contains(&f.slug))
        .cloned()
        .collect();
    let mut slugs: HashSet<String> = retained.iter().map(|f| f.slug.clone()).collect();

    // Sentinel scores start above every explicit score in play.
    let mut sentinel = retained
        .iter()
        .map(|f| f.score)
        .chain(edits.iter().filter_map(|e| e.score))
        .max()
        .unwrap_or(0)
        + 1;

    // Phase 2: update.
    for edit in edits.iter().filter(|e| !e.new_entry) {
        let key = slugify(&edit.slug);
        let Some(idx) = retained.iter().position(|f| f.slug == key) else {
            // References a field deleted elsewhere; not an error.
            continue;
        };

        if let Some(name) = &edit.display_name {
            let name = sanitize_display_name(name);
            if !name.is_empty() {
                retained[idx].display_name = name;
            }
        }
        if let Some(desc) = &edit.description {
            retained[idx].description = Some(sanitize_display_name(desc));
        }
        if let Some(kind) = &edit.kind {
            if let Some(kind) = normalize_kind(kind) {
                retained[idx].kind = kind;
            }
        }
        if let Some(default) = &edit.default {
            retained[idx].default = Some(default.clone());
        }
        if let Some(types) = &edit.allowed_user_types {
            retained[idx].allowed_user_types = filter_types(types);
        }
        if let Some(score) = edit.score {
            retained[idx].score = score;
        }

        if let Some(target) = &edit.rename_to {
            let target = slugify(target);
            if !target.is_empty() && target != key && !slugs.contains(&target) {
                slugs.remove(&key);
                slugs.insert(target.clone());
                retained[idx].slug = target;
            }
            // Collision or no-op: rename silently dropped, old slug kept.
        }
    }

    // Phase 3: insert.
    for edit in edits.iter().filter(|e| e.new_entry) {
        let slug = slugify(&edit.slug);
        if slug.is_empty() || slugs.contains(&slug) {
            continue;
        }
        let display_name = edit
            .display_name
            .as_deref()
            .map(sanitize_display_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| slug.clone());
        let kind = edit
            .kind
            .as_ref()
            .and_then(normalize_kind)
            .unwrap_or(FieldKind::Text);
        let score = edit.score.unwrap_or_else(|| {
            let s = sentinel;
            sentinel += 1;
            s
        });

        slugs.insert(slug.clone());
        retained.push(FieldDef {
            id: Ulid::new(),
            slug,
            display_name,
            description: edit.description.as_deref().map(sanitize_display_name),
            kind,
            default: edit.default.clone(),
            allowed_user_types: filter_types(edit.allowed_user_types.as_deref().unwrap_or(&[])),
            score,
        });
    }

    retained.sort_by_key(|f| f.score);
    retained
}

/// Merge an admin-submitted user-type catalog against the persisted one.
///
/// Order is the existing catalog's order with new entries appended. The
/// catalog is never left empty: a synthetic `default_type` is inserted
/// when pruning plus absence of new entries would empty it.
pub fn reconcile_user_type_catalog(existing: &[UserType], edits: &[UserTypeEdit]) -> Vec<UserType> {
    let mut submitted: HashSet<String> = HashSet::new();
    for edit in edits {
        let key = slugify(&edit.slug);
        if !key.is_empty() {
            submitted.insert(key);
        }
        if let Some(target) = &edit.rename_to {
            let target = slugify(target);
            if !target.is_empty() {
                submitted.insert(target);
            }
        }
    }

    let mut retained: Vec<UserType> = existing
        .iter()
        .filter(|t| submitted.contains(&t.slug))
        .cloned()
        .collect();
    let mut slugs: HashSet<String> = retained.iter().map(|t| t.slug.clone()).collect();

    for edit in edits.iter().filter(|e| !e.new_entry) {
        let key = slugify(&edit.slug);
        let Some(idx) = retained.iter().position(|t| t.slug == key) else {
            continue;
        };

        if let Some(name) = &edit.display_name {
            let name = sanitize_display_name(name);
            if !name.is_empty() {
                retained[idx].display_name = name;
            }
        }
        if let Some(target) = &edit.rename_to {
            let target = slugify(target);
            if !target.is_empty() && target != key && !slugs.contains(&target) {
                slugs.remove(&key);
                slugs.insert(target.clone());
                retained[idx].slug = target;
            }
        }
    }

    for edit in edits.iter().filter(|e| e.new_entry) {
        let slug = slugify(&edit.slug);
        if slug.is_empty() || slugs.contains(&slug) {
            continue;
        }
        let display_name = edit
            .display_name
            .as_deref()
            .map(sanitize_display_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| slug.clone());
        slugs.insert(slug.clone());
        retained.push(UserType { slug, display_name });
    }

    if retained.is_empty() {
        retained.push(UserType::synthetic_default());
    }
    retained
}

/// Merge an admin-submitted registration catalog against the persisted one.
///
/// `user_types` is the current (post-reconcile) user-type catalog; a
/// registration referencing an unknown type keeps its old type on update
/// and falls back to the catalog's first entry on insert.
pub fn reconcile_user_catalog(
    existing: &[Registration],
    edits: &[RegistrationEdit],
    user_types: &[UserType],
) -> Vec<Registration> {
    let known_types: HashSet<&str> = user_types.iter().map(|t| t.slug.as_str()).collect();
    let fallback_type = user_types
        .first()
        .map(|t| t.slug.clone())
        .unwrap_or_else(|| crate::types::DEFAULT_USER_TYPE_SLUG.to_string());

    let mut submitted: HashSet<String> = HashSet::new();
    for edit in edits {
        let key = edit.user_id.trim();
        if !key.is_empty() {
            submitted.insert(key.to_string());
        }
        if let Some(target) = &edit.rename_to {
            let target = target.trim();
            if !target.is_empty() {
                submitted.insert(target.to_string());
            }
        }
    }

    let mut retained: Vec<Registration> = existing
        .iter()
        .filter(|r| submitted.contains(&r.user_id))
        .cloned()
        .collect();
    let mut ids: HashSet<String> = retained.iter().map(|r| r.user_id.clone()).collect();

    let normalize_fields = |fields: &[String]| -> Vec<String> {
        let mut seen = HashSet::new();
        fields
            .iter()
            .map(|f| slugify(f))
            .filter(|f| !f.is_empty() && seen.insert(f.clone()))
            .collect()
    };

    for edit in edits.iter().filter(|e| !e.new_entry) {
        let key = edit.user_id.trim();
        let Some(idx) = retained.iter().position(|r| r.user_id == key) else {
            continue;
        };

        if let Some(user_type) = &edit.user_type {
            let user_type = slugify(user_type);
            if known_types.contains(user_type.as_str()) {
                retained[idx].user_type = user_type;
            }
        }
        if let Some(fields) = &edit.special_fields {
            retained[idx].special_fields = normalize_fields(fields);
        }
        if let Some(target) = &edit.rename_to {
            let target = target.trim().to_string();
            if !target.is_empty() && target != key && !ids.contains(&target) {
                ids.remove(key);
                ids.insert(target.clone());
                retained[idx].user_id = target;
            }
        }
    }

    for edit in edits.iter().filter(|e| e.new_entry) {
        let user_id = edit.user_id.trim().to_string();
        if user_id.is_empty() || ids.contains(&user_id) {
            continue;
        }
        let user_type = edit
            .user_type
            .as_deref()
            .map(slugify)
            .filter(|t| known_types.contains(t.as_str()))
            .unwrap_or_else(|| fallback_type.clone());

        ids.insert(user_id.clone());
        retained.push(Registration {
            user_id,
            user_type,
            special_fields: normalize_fields(edit.special_fields.as_deref().unwrap_or(&[])),
        });
    }

    retained
}
