//! Field registry, sanitization pipeline, and catalog reconciliation
//!
//! `fieldsmith-schema` is a standalone, schema-only crate. It owns the
//! catalog of field definitions, the catalog of user types, and the catalog
//! of user registrations — not the field values themselves (those live in
//! `fieldsmith-store`).
//!
//! # Architecture
//!
//! - **Schema-only**: Owns definitions and catalogs, never user values
//! - **YAML on disk**: One `.yaml` file per field definition and registration,
//!   a single ordered file for user types
//! - **Closed type set**: Field kinds are a tagged enum, exhaustively matched
//! - **Snapshot-based**: Consumers take an immutable [`SchemaSnapshot`];
//!   reconciliation produces a new snapshot instead of mutating shared state
//! - **Default seeding**: `with_defaults()` writes defaults that don't exist,
//!   preserves customizations

pub mod error;
pub mod reconcile;
pub mod registry;
pub mod repeat;
pub mod sanitize;
pub mod slug;
pub mod types;

pub use error::{Result, SchemaError};
pub use reconcile::{
    reconcile_field_catalog, reconcile_user_catalog, reconcile_user_type_catalog, FieldEdit,
    RegistrationEdit, UserTypeEdit,
};
pub use registry::{SchemaContext, SchemaContextBuilder, SchemaDefaults, SchemaSnapshot};
pub use repeat::{instances, parse_instance_slug, reconcile_rows, Row, RowPlan};
pub use sanitize::{sanitize_display_name, sanitize_leaf, Sanitized};
pub use slug::slugify;
pub use types::{
    field_type, field_type_catalog, FieldDef, FieldInstance, FieldKind, FieldTypeDescriptor,
    Registration, SchemaVersionToken, UserType, DEFAULT_USER_TYPE_SLUG,
};
