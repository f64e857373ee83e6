//! UserDataStore — the submission engine.
//!
//! Built from one immutable schema snapshot plus the collaborator handles.
//! A store instance caches per-user allowed-field lists and is never
//! invalidated in process: construct a fresh store from a fresh snapshot
//! after any schema reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use ulid::Ulid;

use fieldsmith_schema::{
    instances, parse_instance_slug, reconcile_rows, sanitize_leaf, FieldDef, FieldInstance,
    FieldKind, Sanitized, SchemaSnapshot, SchemaVersionToken,
};

use crate::error::Result;
use crate::media::{BlobStore, MediaTranscoder};
use crate::record::{RecordStore, UserRecord};

/// Per-field submission status shown inline to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldStatus {
    Unchanged,
    Changed,
    Rejected(String),
}

/// The full result for one field: overall status, per-index statuses for
/// multiple fields, and padding warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldReport {
    pub status: FieldStatus,
    pub rows: BTreeMap<usize, FieldStatus>,
    pub warnings: Vec<String>,
}

impl FieldReport {
    fn leaf(status: FieldStatus) -> Self {
        Self {
            status,
            rows: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

/// Record-level outcome of one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// `changed` fields were merged into the record.
    Applied { changed: usize },
    /// Every field sanitized to its current value; nothing written.
    NoChanges,
    /// The form was rendered against an older schema. Nothing was
    /// sanitized, nothing was written — the submission must be redone.
    SchemaStale,
    /// The record store acknowledged zero affected rows. The caller must
    /// assume nothing was applied.
    PersistenceFailed,
}

/// One raw submitted value: a scalar for leaf fields, a keyed row set for
/// multiple fields (insertion order is meaningful).
#[derive(Debug, Clone)]
pub enum SubmittedValue {
    Scalar(Value),
    Rows(IndexMap<String, Value>),
}

/// An uploaded file awaiting placement, keyed in the submission by the
/// field slug (leaf image) or `{slug}_{row_key}` (multiple image rows).
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub tmp_path: PathBuf,
    pub original_name: String,
}

/// Schema-driven store for one snapshot's worth of user data.
pub struct UserDataStore {
    schema: SchemaSnapshot,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    media: Arc<dyn MediaTranscoder>,
    // user_id -> allowed field slugs, score order. Lives and dies with
    // this instance; there is no cross-reconciliation invalidation.
    allowed: RwLock<HashMap<String, Vec<String>>>,
}

impl UserDataStore {
    pub fn new(
        schema: SchemaSnapshot,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        media: Arc<dyn MediaTranscoder>,
    ) -> Self {
        Self {
            schema,
            records,
            blobs,
            media,
            allowed: RwLock::new(HashMap::new()),
        }
    }

    /// The token the current snapshot's forms must carry.
    pub fn version_token(&self) -> &SchemaVersionToken {
        self.schema.version_token()
    }

    /// The ordered field definitions visible to a user: fields whose
    /// `allowed_user_types` contains the user's type, plus fields named in
    /// the user's registration `special_fields`.
    pub fn allowed_fields(&self, user_id: &str) -> Vec<FieldDef> {
        if let Some(slugs) = self.allowed.read().ok().and_then(|c| c.get(user_id).cloned()) {
            return slugs
                .iter()
                .filter_map(|s| self.schema.field_by_slug(s))
                .cloned()
                .collect();
        }

        let user_type = self
            .schema
            .user_type_of(user_id)
            .map(|t| t.slug.clone())
            .unwrap_or_default();
        let special = self
            .schema
            .registration(user_id)
            .map(|r| r.special_fields.clone())
            .unwrap_or_default();

        let fields: Vec<FieldDef> = self
            .schema
            .fields
            .iter()
            .filter(|f| {
                f.allowed_user_types.iter().any(|t| *t == user_type)
                    || special.contains(&f.slug)
            })
            .cloned()
            .collect();

        if let Ok(mut cache) = self.allowed.write() {
            cache.insert(
                user_id.to_string(),
                fields.iter().map(|f| f.slug.clone()).collect(),
            );
        }
        fields
    }

    /// The concrete field instances a form renders for this user, with
    /// multiple fields expanded against the user's current row counts.
    pub async fn field_instances(&self, user_id: &str) -> Result<Vec<FieldInstance>> {
        let record = self.records.read(user_id).await?;
        let mut out = Vec::new();
        for def in self.allowed_fields(user_id) {
            let current_len = record
                .as_ref()
                .and_then(|r| r.get(&def.slug))
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            out.extend(instances(&def, current_len));
        }
        Ok(out)
    }

    /// The persisted value for a field (or instance) slug, falling back to
    /// the field's default. Unknown slugs read as null — a field may have
    /// been deleted since the caller learned the slug.
    pub async fn get_value(&self, user_id: &str, slug: &str) -> Result<Value> {
        let record = self.records.read(user_id).await?;

        if let Some(def) = self.schema.field_by_slug(slug) {
            let value = record
                .as_ref()
                .and_then(|r| r.get(slug))
                .cloned()
                .unwrap_or_else(|| def.default_value());
            return Ok(value);
        }

        // Instance slug: walk the multiple parent/index chain.
        if let Some((parent, index)) = parse_instance_slug(slug) {
            if let Some(def) = self.schema.field_by_slug(parent) {
                if matches!(def.kind, FieldKind::Multiple { .. }) {
                    let row = record
                        .as_ref()
                        .and_then(|r| r.get(parent))
                        .and_then(|v| v.as_array())
                        .and_then(|a| a.get(index))
                        .cloned();
                    return Ok(row.unwrap_or_else(|| def.row_default()));
                }
            }
        }

        Ok(Value::Null)
    }

    /// Validate and persist one user submission.
    ///
    /// `token` is the version token the form was rendered with — a mismatch
    /// against the live token voids the submission before any sanitization.
    /// Submitted keys naming unknown fields are silently ignored. Field
    /// failures never block sibling fields; only the changed subset is
    /// merged into the record, in one write.
    pub async fn submit(
        &self,
        user_id: &str,
        values: &IndexMap<String, SubmittedValue>,
        files: &IndexMap<String, FileUpload>,
        token: &SchemaVersionToken,
    ) -> Result<(IndexMap<String, FieldReport>, SubmitOutcome)> {
        if token != self.schema.version_token() {
            debug!(user_id, "stale schema token, submission voided");
            return Ok((IndexMap::new(), SubmitOutcome::SchemaStale));
        }

        let mut record = self
            .records
            .read(user_id)
            .await?
            .unwrap_or_else(|| UserRecord::new(user_id));

        let mut reports: IndexMap<String, FieldReport> = IndexMap::new();
        let mut changes: Map<String, Value> = Map::new();
        let mut stale_blobs: Vec<String> = Vec::new();
        let mut new_blobs: Vec<String> = Vec::new();

        for def in self.allowed_fields(user_id) {
            let current = record.get(&def.slug).cloned();
            let report = match &def.kind {
                FieldKind::Multiple { child, .. } => {
                    self.submit_rows(
                        user_id,
                        &def,
                        child,
                        values.get(&def.slug),
                        files,
                        current.as_ref(),
                        &mut changes,
                        &mut stale_blobs,
                        &mut new_blobs,
                    )
                    .await
                }
                FieldKind::Image { width, height } => {
                    let (status, new_value, old_blob) = self
                        .sanitize_image(
                            user_id,
                            &def.slug,
                            files.get(&def.slug),
                            *width,
                            *height,
                            current.as_ref(),
                        )
                        .await;
                    if let Some(value) = new_value {
                        if let Some(logical) = value.as_str() {
                            new_blobs.push(logical.to_string());
                        }
                        changes.insert(def.slug.clone(), value);
                    }
                    stale_blobs.extend(old_blob);
                    FieldReport::leaf(status)
                }
                _ => match values.get(&def.slug) {
                    None => FieldReport::leaf(FieldStatus::Unchanged),
                    Some(SubmittedValue::Rows(_)) => FieldReport::leaf(FieldStatus::Rejected(
                        "expected a single value".to_string(),
                    )),
                    Some(SubmittedValue::Scalar(raw)) => {
                        match sanitize_leaf(&def.kind, raw, current.as_ref()) {
                            Sanitized::Unchanged => FieldReport::leaf(FieldStatus::Unchanged),
                            Sanitized::Changed(value) => {
                                changes.insert(def.slug.clone(), value);
                                FieldReport::leaf(FieldStatus::Changed)
                            }
                            Sanitized::Rejected(reason) => {
                                FieldReport::leaf(FieldStatus::Rejected(reason))
                            }
                        }
                    }
                },
            };
            reports.insert(def.slug.clone(), report);
        }

        if changes.is_empty() {
            return Ok((reports, SubmitOutcome::NoChanges));
        }

        let changed = changes.len();
        for (slug, value) in changes {
            record.values.insert(slug, value);
        }
        record.updated_at = Utc::now();

        let affected = self.records.write(&record).await?;
        if affected == 0 {
            warn!(user_id, "record write affected zero rows");
            // Blobs placed for this submission are unreachable without the
            // record; remove them before reporting the failure.
            for logical in new_blobs {
                if !self.blobs.remove(&logical).await {
                    warn!(%logical, "orphaned blob not removed");
                }
            }
            return Ok((reports, SubmitOutcome::PersistenceFailed));
        }

        // Replaced uploads are deleted only after the record is safely down.
        // A replaced image row surfaces both from its sanitizer and from the
        // dropped-rows scan; remove each blob once.
        stale_blobs.sort();
        stale_blobs.dedup();
        for logical in stale_blobs {
            if !self.blobs.remove(&logical).await {
                warn!(%logical, "stale blob not removed");
            }
        }

        debug!(user_id, changed, "submission applied");
        Ok((reports, SubmitOutcome::Applied { changed }))
    }

    /// Sanitize one multiple-field submission into a dense array.
    ///
    /// An absent row set leaves the field untouched; a present-but-empty
    /// one collapses the stored value to an empty sequence.
    #[allow(clippy::too_many_arguments)]
    async fn submit_rows(
        &self,
        user_id: &str,
        def: &FieldDef,
        child: &FieldKind,
        submitted: Option<&SubmittedValue>,
        files: &IndexMap<String, FileUpload>,
        current: Option<&Value>,
        changes: &mut Map<String, Value>,
        stale_blobs: &mut Vec<String>,
        new_blobs: &mut Vec<String>,
    ) -> FieldReport {
        let rows = match submitted {
            None => return FieldReport::leaf(FieldStatus::Unchanged),
            Some(SubmittedValue::Scalar(Value::Null)) => IndexMap::new(),
            Some(SubmittedValue::Scalar(_)) => {
                return FieldReport::leaf(FieldStatus::Rejected("expected a row set".to_string()))
            }
            Some(SubmittedValue::Rows(rows)) => rows.clone(),
        };

        let empty = Vec::new();
        let current_rows = current.and_then(|v| v.as_array()).unwrap_or(&empty);
        let plan = reconcile_rows(def, &rows);

        let mut row_statuses: BTreeMap<usize, FieldStatus> = BTreeMap::new();
        let mut new_rows: Vec<Value> = Vec::with_capacity(plan.rows.len());

        for (i, row) in plan.rows.iter().enumerate() {
            let current_row = current_rows.get(i);
            let (status, value) = match child {
                FieldKind::Image { width, height } => {
                    let file = row
                        .key
                        .as_ref()
                        .and_then(|key| files.get(&format!("{}_{key}", def.slug)));
                    let instance_slug = format!("{}_{i}", def.slug);
                    let (status, new_value, old_blob) = self
                        .sanitize_image(user_id, &instance_slug, file, *width, *height, current_row)
                        .await;
                    if let Some(Value::String(logical)) = &new_value {
                        new_blobs.push(logical.clone());
                    }
                    stale_blobs.extend(old_blob);
                    (status, new_value)
                }
                _ => match sanitize_leaf(child, &row.value, current_row) {
                    Sanitized::Unchanged => (FieldStatus::Unchanged, None),
                    Sanitized::Changed(value) => (FieldStatus::Changed, Some(value)),
                    Sanitized::Rejected(reason) => (FieldStatus::Rejected(reason), None),
                },
            };

            // Rejected or unchanged rows keep their previous value (or the
            // row default when the index is new).
            let value =
                value.unwrap_or_else(|| current_row.cloned().unwrap_or_else(|| def.row_default()));
            new_rows.push(value);
            row_statuses.insert(i, status);
        }

        // Image rows dropped by truncation or clearing leave stale blobs.
        if matches!(child, FieldKind::Image { .. }) {
            for old in current_rows {
                if let Some(logical) = old.as_str() {
                    if !new_rows.iter().any(|v| v.as_str() == Some(logical)) {
                        stale_blobs.push(logical.to_string());
                    }
                }
            }
        }

        // An explicit empty set still persists as an empty sequence when
        // nothing was stored before: clearing is never "no change".
        let new_value = Value::Array(new_rows);
        let status = if Some(&new_value) != current {
            changes.insert(def.slug.clone(), new_value);
            FieldStatus::Changed
        } else {
            FieldStatus::Unchanged
        };

        FieldReport {
            status,
            rows: row_statuses,
            warnings: plan.warnings,
        }
    }

    /// Route one image upload through the media collaborators.
    ///
    /// Returns (status, new persisted value, replaced blob to remove).
    /// Never touches pixels; detection and scaling are delegated.
    async fn sanitize_image(
        &self,
        user_id: &str,
        instance_slug: &str,
        file: Option<&FileUpload>,
        width: u32,
        height: u32,
        current: Option<&Value>,
    ) -> (FieldStatus, Option<Value>, Option<String>) {
        let Some(file) = file else {
            // No new upload: the stored value stands.
            return (FieldStatus::Unchanged, None, None);
        };

        let Some(mime) = self.media.detect_mime(&file.tmp_path).await else {
            return (
                FieldStatus::Rejected(
                    "unsupported image type (jpeg, png, gif only)".to_string(),
                ),
                None,
                None,
            );
        };

        let logical = format!("{user_id}_{instance_slug}_{}.{}", Ulid::new(), mime.extension());
        if !self.blobs.store(&file.tmp_path, &logical).await {
            warn!(%logical, original = %file.original_name, "upload placement failed");
            return (
                FieldStatus::Rejected("upload failed".to_string()),
                None,
                None,
            );
        }
        if !self.media.resize(&logical, width, height).await {
            // The blob was already placed; a rejected upload must not leave
            // it orphaned in the served directory.
            if !self.blobs.remove(&logical).await {
                warn!(%logical, "rejected upload not removed");
            }
            return (
                FieldStatus::Rejected("image processing failed".to_string()),
                None,
                None,
            );
        }

        let new_value = Value::String(logical);
        if current == Some(&new_value) {
            return (FieldStatus::Unchanged, None, None);
        }
        let old_blob = current.and_then(|v| v.as_str()).map(str::to_string);
        (FieldStatus::Changed, Some(new_value), old_blob)
    }
}
