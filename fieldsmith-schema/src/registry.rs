//! SchemaContext — main API surface for the schema registry.
//!
//! Manages the field catalog, user-type catalog, and registration catalog
//! as YAML files under a schema directory. Provides in-memory indexes for
//! fast lookup and hands consumers an immutable [`SchemaSnapshot`] — the
//! registry is read-only from a validator's perspective; all mutation goes
//! through the `apply_*` reconciliation entry points.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use ulid::Ulid;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::reconcile::{
    reconcile_field_catalog, reconcile_user_catalog, reconcile_user_type_catalog, FieldEdit,
    RegistrationEdit, UserTypeEdit,
};
use crate::types::{FieldDef, Registration, SchemaVersionToken, UserType};

/// A collection of built-in field definitions and user types.
///
/// Consumers build this to pass to `SchemaContextBuilder::with_defaults()`.
/// On open, defaults that don't already exist on disk are written.
#[derive(Default)]
pub struct SchemaDefaults {
    fields: Vec<FieldDef>,
    user_types: Vec<UserType>,
}

impl SchemaDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a default field definition.
    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    /// Add a default user type.
    pub fn user_type(mut self, user_type: UserType) -> Self {
        self.user_types.push(user_type);
        self
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn user_types(&self) -> &[UserType] {
        &self.user_types
    }
}

/// Builder for `SchemaContext`. Created by `SchemaContext::open()`.
pub struct SchemaContextBuilder {
    root: PathBuf,
    defaults: Option<SchemaDefaults>,
}

impl SchemaContextBuilder {
    /// Provide built-in field definitions and user types.
    /// Defaults are seeded on first open; existing catalogs are preserved.
    pub fn with_defaults(mut self, defaults: SchemaDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Build the context: create directories, seed defaults, load from disk.
    pub async fn build(self) -> Result<SchemaContext> {
        let root = self.root;

        fs::create_dir_all(root.join("fields")).await?;
        fs::create_dir_all(root.join("users")).await?;

        if let Some(defaults) = self.defaults {
            seed_defaults(&root, &defaults).await?;
        }

        let mut ctx = SchemaContext {
            root,
            fields: Vec::new(),
            user_types: Vec::new(),
            registrations: Vec::new(),
            slug_index: HashMap::new(),
            id_index: HashMap::new(),
            user_index: HashMap::new(),
            token: SchemaVersionToken::new(""),
        };

        ctx.load_fields().await?;
        ctx.load_user_types().await?;
        ctx.load_registrations().await?;
        ctx.refresh_indexes()?;

        debug!(
            fields = ctx.fields.len(),
            user_types = ctx.user_types.len(),
            registrations = ctx.registrations.len(),
            "schema context opened"
        );

        Ok(ctx)
    }
}

/// Seed built-in definitions that don't already exist on disk.
///
/// Fields are matched by ULID — if a file with that ULID exists (even if
/// renamed), the default is skipped. The user-type catalog is seeded only
/// when its file is missing entirely.
async fn seed_defaults(root: &Path, defaults: &SchemaDefaults) -> Result<()> {
    let fields_dir = root.join("fields");
    let existing_ids = collect_existing_field_ids(&fields_dir).await?;

    for def in defaults.fields() {
        if !existing_ids.contains(&def.id) {
            let yaml = serde_yaml::to_string(def)?;
            let path = fields_dir.join(format!("{}.yaml", def.slug));
            atomic_write(&path, yaml.as_bytes()).await?;
            debug!(slug = %def.slug, id = %def.id, "seeded default field");
        }
    }

    let types_path = root.join("user_types.yaml");
    if !types_path.exists() && !defaults.user_types().is_empty() {
        let yaml = serde_yaml::to_string(defaults.user_types())?;
        atomic_write(&types_path, yaml.as_bytes()).await?;
        debug!(count = defaults.user_types().len(), "seeded user types");
    }

    Ok(())
}

/// Read all .yaml files in fields/ and extract their ULIDs.
async fn collect_existing_field_ids(fields_dir: &Path) -> Result<Vec<Ulid>> {
    let mut ids = Vec::new();
    if !fields_dir.exists() {
        return Ok(ids);
    }
    let mut entries = fs::read_dir(fields_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        if let Ok(content) = fs::read_to_string(&path).await {
            if let Ok(def) = serde_yaml::from_str::<FieldDef>(&content) {
                ids.push(def.id);
            }
        }
    }
    Ok(ids)
}

/// An immutable view of the schema, handed to every store operation.
///
/// Reconciliation produces a fresh snapshot; nothing mutates one in place.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub fields: Vec<FieldDef>,
    pub user_types: Vec<UserType>,
    pub registrations: Vec<Registration>,
    token: SchemaVersionToken,
}

impl SchemaSnapshot {
    pub fn field_by_slug(&self, slug: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.slug == slug)
    }

    pub fn registration(&self, user_id: &str) -> Option<&Registration> {
        self.registrations.iter().find(|r| r.user_id == user_id)
    }

    /// The user type a user resolves to for reads.
    ///
    /// Unknown or missing types fall back to the catalog's first entry
    /// without mutating storage.
    pub fn user_type_of(&self, user_id: &str) -> Option<&UserType> {
        let slug = self.registration(user_id).map(|r| r.user_type.as_str());
        match slug {
            Some(slug) => self
                .user_types
                .iter()
                .find(|t| t.slug == slug)
                .or_else(|| self.user_types.first()),
            None => self.user_types.first(),
        }
    }

    pub fn version_token(&self) -> &SchemaVersionToken {
        &self.token
    }
}

/// Context for the field, user-type, and registration catalogs.
///
/// Owns a directory on disk with the structure:
/// ```text
/// schema/
///   fields/          ← one .yaml per field definition
///   user_types.yaml  ← ordered user-type catalog
///   users/           ← one .yaml per registration
/// ```
pub struct SchemaContext {
    root: PathBuf,
    fields: Vec<FieldDef>,
    user_types: Vec<UserType>,
    registrations: Vec<Registration>,
    slug_index: HashMap<String, usize>,
    id_index: HashMap<Ulid, usize>,
    user_index: HashMap<String, usize>,
    token: SchemaVersionToken,
}

impl SchemaContext {
    /// Open or create a schema directory. Returns a builder for optional
    /// configuration.
    pub fn open(root: impl Into<PathBuf>) -> SchemaContextBuilder {
        SchemaContextBuilder {
            root: root.into(),
            defaults: None,
        }
    }

    // --- Field definitions ---

    /// All field definitions, ordered by score ascending.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_by_slug(&self, slug: &str) -> Option<&FieldDef> {
        self.slug_index.get(slug).map(|&i| &self.fields[i])
    }

    pub fn field_by_id(&self, id: &Ulid) -> Option<&FieldDef> {
        self.id_index.get(id).map(|&i| &self.fields[i])
    }

    // --- User types ---

    /// The ordered user-type catalog. Never empty.
    pub fn user_types(&self) -> &[UserType] {
        &self.user_types
    }

    // --- Registrations ---

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn registration(&self, user_id: &str) -> Option<&Registration> {
        self.user_index.get(user_id).map(|&i| &self.registrations[i])
    }

    // --- Snapshot & token ---

    /// The token identifying the current catalog shape. Embedded in rendered
    /// forms and compared at submission time.
    pub fn version_token(&self) -> &SchemaVersionToken {
        &self.token
    }

    /// An immutable snapshot for store operations. Construct a fresh store
    /// from a fresh snapshot after any `apply_*` call.
    pub fn snapshot(&self) -> SchemaSnapshot {
        SchemaSnapshot {
            fields: self.fields.clone(),
            user_types: self.user_types.clone(),
            registrations: self.registrations.clone(),
            token: self.token.clone(),
        }
    }

    /// The root directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // --- Reconciliation entry points ---

    /// Reconcile and persist the field catalog.
    pub async fn apply_field_edits(&mut self, edits: &[FieldEdit]) -> Result<()> {
        let new_catalog = reconcile_field_catalog(&self.fields, edits, &self.user_types);
        self.persist_fields(new_catalog).await?;
        self.refresh_indexes()?;
        debug!(fields = self.fields.len(), "field catalog reconciled");
        Ok(())
    }

    /// Reconcile and persist the user-type catalog.
    pub async fn apply_user_type_edits(&mut self, edits: &[UserTypeEdit]) -> Result<()> {
        let new_catalog = reconcile_user_type_catalog(&self.user_types, edits);
        let yaml = serde_yaml::to_string(&new_catalog)?;
        atomic_write(&self.root.join("user_types.yaml"), yaml.as_bytes()).await?;
        self.user_types = new_catalog;
        self.refresh_indexes()?;
        debug!(user_types = self.user_types.len(), "user-type catalog reconciled");
        Ok(())
    }

    /// Reconcile and persist the registration catalog.
    pub async fn apply_registration_edits(&mut self, edits: &[RegistrationEdit]) -> Result<()> {
        let new_catalog = reconcile_user_catalog(&self.registrations, edits, &self.user_types);

        // Remove files for pruned or renamed registrations.
        for old in &self.registrations {
            if !new_catalog.iter().any(|r| r.user_id == old.user_id) {
                let _ = fs::remove_file(self.registration_path(&old.user_id)).await;
            }
        }
        for reg in &new_catalog {
            let yaml = serde_yaml::to_string(reg)?;
            atomic_write(&self.registration_path(&reg.user_id), yaml.as_bytes()).await?;
        }

        self.registrations = new_catalog;
        self.refresh_indexes()?;
        debug!(
            registrations = self.registrations.len(),
            "registration catalog reconciled"
        );
        Ok(())
    }

    // --- Internal ---

    fn field_path(&self, slug: &str) -> PathBuf {
        self.root.join("fields").join(format!("{slug}.yaml"))
    }

    fn registration_path(&self, user_id: &str) -> PathBuf {
        self.root.join("users").join(format!("{user_id}.yaml"))
    }

    async fn persist_fields(&mut self, new_catalog: Vec<FieldDef>) -> Result<()> {
        // Remove files for pruned or renamed fields (matched by slug).
        for old in &self.fields {
            if !new_catalog.iter().any(|f| f.slug == old.slug) {
                let _ = fs::remove_file(self.field_path(&old.slug)).await;
            }
        }
        for def in &new_catalog {
            let yaml = serde_yaml::to_string(def)?;
            atomic_write(&self.field_path(&def.slug), yaml.as_bytes()).await?;
        }
        self.fields = new_catalog;
        Ok(())
    }

    fn refresh_indexes(&mut self) -> Result<()> {
        self.fields.sort_by_key(|f| f.score);
        self.slug_index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.slug.clone(), i))
            .collect();
        self.id_index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
        self.user_index = self
            .registrations
            .iter()
            .enumerate()
            .map(|(i, r)| (r.user_id.clone(), i))
            .collect();
        self.token = compute_version_token(&self.fields, &self.user_types)?;
        Ok(())
    }

    async fn load_fields(&mut self) -> Result<()> {
        let fields_dir = self.root.join("fields");
        let mut entries = fs::read_dir(&fields_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_yaml::from_str::<FieldDef>(&content) {
                Ok(def) => self.fields.push(def),
                Err(e) => {
                    tracing::warn!(?path, %e, "skipping invalid field definition");
                }
            }
        }
        Ok(())
    }

    async fn load_user_types(&mut self) -> Result<()> {
        let path = self.root.join("user_types.yaml");
        if path.exists() {
            let content = fs::read_to_string(&path).await?;
            match serde_yaml::from_str::<Vec<UserType>>(&content) {
                Ok(types) => self.user_types = types,
                Err(e) => {
                    tracing::warn!(?path, %e, "ignoring invalid user-type catalog");
                }
            }
        }
        // The catalog is never empty: synthesize and persist the sentinel.
        if self.user_types.is_empty() {
            self.user_types.push(UserType::synthetic_default());
            let yaml = serde_yaml::to_string(&self.user_types)?;
            atomic_write(&path, yaml.as_bytes()).await?;
            debug!("synthesized default user type");
        }
        Ok(())
    }

    async fn load_registrations(&mut self) -> Result<()> {
        let users_dir = self.root.join("users");
        let mut entries = fs::read_dir(&users_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_yaml::from_str::<Registration>(&content) {
                Ok(reg) => self.registrations.push(reg),
                Err(e) => {
                    tracing::warn!(?path, %e, "skipping invalid registration");
                }
            }
        }
        Ok(())
    }
}

/// Derive the version token from the catalog's current shape.
///
/// Any field or user-type change yields a new token; forms rendered against
/// the old shape are then rejected wholesale at submission time.
fn compute_version_token(
    fields: &[FieldDef],
    user_types: &[UserType],
) -> Result<SchemaVersionToken> {
    let canonical = serde_yaml::to_string(&(fields, user_types))?;
    Ok(SchemaVersionToken::new(format!(
        "{:016x}",
        xxh3_64(canonical.as_bytes())
    )))
}

/// Write to a temp file then rename for atomic persistence.
async fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"))?;
    let tmp = dir.join(format!(".tmp_{}", Ulid::new()));
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
