//! Client library for the municipal fire-safety inspection logbook.
//!
//! Two parallel logbooks, building inspections (optionally geotagged and
//! photographed) and FSEC building-plan applications, are kept in sync
//! between an embedded local cache and a hosted Supabase/PostgREST backend.
//! Writes are optimistic: the in-memory list and the local cache are updated
//! first, the remote row follows, and a successful remote write is confirmed
//! by reloading the canonical remote list. When no remote store is configured
//! the library degrades to local-only operation.

pub mod cache;
pub mod client;
pub mod db_client;
pub mod models;
pub mod photo;
pub mod storage;

use thiserror::Error;

/// Errors surfaced to the presentation layer. Everything here is
/// user-recoverable; the worst case is a record that stays local-only.
#[derive(Debug, Error)]
pub enum LogbookError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("no record at index {0}")]
    UnknownIndex(usize),
    #[error("cannot delete: missing record id")]
    MissingId,
    #[error("login service not available (offline mode)")]
    Offline,
    #[error(transparent)]
    Remote(#[from] db_client::RemoteError),
}

pub use client::{InitOutcome, LogbookClient, SaveOutcome, StorageMode};
pub use db_client::{DatabaseConfig, RemoteError, RemoteErrorKind};
pub use models::{FsecForm, FsecRecord, InspectionForm, InspectionRecord, SyncState, UserSession};
pub use photo::PhotoAttachment;
