//! Per-user record store and submission engine
//!
//! `fieldsmith-store` owns user field *values*: one JSON record per user,
//! written through a narrow [`RecordStore`] contract. The submission engine
//! validates raw form values against an immutable schema snapshot from
//! `fieldsmith-schema`, computes exactly which fields changed, and persists
//! only those — so side effects like uploaded-file replacement fire only
//! when necessary.
//!
//! # Architecture
//!
//! - **Snapshot in, diff out**: A [`UserDataStore`] is built from one
//!   [`fieldsmith_schema::SchemaSnapshot`]; construct a fresh store after
//!   any schema reconciliation
//! - **File-backed by default**: [`StoreContext`] provides path helpers and
//!   atomic JSON I/O; the collaborator traits accept any other backend
//! - **No partial writes**: a stale version token or a failed record write
//!   voids the whole submission

pub mod context;
pub mod error;
pub mod media;
pub mod record;
pub mod store;

pub use context::StoreContext;
pub use error::{Result, StoreError};
pub use media::{BlobStore, FsBlobStore, FsMedia, ImageMime, MediaTranscoder};
pub use record::{RecordStore, UserRecord};
pub use store::{
    FieldReport, FieldStatus, FileUpload, SubmitOutcome, SubmittedValue, UserDataStore,
};
