//! Local cache for the two logbooks, one embedded database file per
//! well-known storage key. The cache is a latency hider and an offline
//! fallback, never the source of truth while a session is running: loads
//! tolerate a missing or unreadable store and saves are best-effort.

use std::fs;
use std::path::{Path, PathBuf};

use native_db::{native_db, Builder, Database, Models, ToKey};
use native_model::{native_model, Model};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{FsecRecord, InspectionRecord, SyncState};
use crate::photo;

// ===== VERSIONED CACHE ROWS =====
// The sequence key preserves insertion order for records that have never
// been reloaded from the remote store.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct InspectionRecordLocal {
    #[primary_key]
    pub seq: u32,
    pub id: Option<i64>,
    pub io_number: String,
    pub fsic_number: String,
    pub insp_owner: String,
    pub business_name: String,
    pub insp_address: String,
    pub addr_barangay: String,
    pub addr_line: String,
    pub date_inspected: String,
    pub inspected_by: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub photo_url: Option<String>,
    pub photo_taken_at: Option<String>,
    pub created_at: String,
    pub sync_state: SyncState,
}

impl InspectionRecordLocal {
    /// Inline `data:` previews are dropped here; they are transient and
    /// would blow through any sensible storage budget.
    fn from_record(seq: u32, record: &InspectionRecord) -> Self {
        Self {
            seq,
            id: record.id,
            io_number: record.io_number.clone(),
            fsic_number: record.fsic_number.clone(),
            insp_owner: record.insp_owner.clone(),
            business_name: record.business_name.clone(),
            insp_address: record.insp_address.clone(),
            addr_barangay: record.addr_barangay.clone(),
            addr_line: record.addr_line.clone(),
            date_inspected: record.date_inspected.clone(),
            inspected_by: record.inspected_by.clone(),
            lat: record.lat,
            lng: record.lng,
            photo_url: record
                .photo_url
                .clone()
                .filter(|url| !photo::is_inline_data(url)),
            photo_taken_at: record.photo_taken_at.clone(),
            created_at: record.created_at.clone(),
            sync_state: record.sync_state,
        }
    }
}

impl From<InspectionRecordLocal> for InspectionRecord {
    fn from(row: InspectionRecordLocal) -> Self {
        Self {
            id: row.id,
            io_number: row.io_number,
            fsic_number: row.fsic_number,
            insp_owner: row.insp_owner,
            business_name: row.business_name,
            insp_address: row.insp_address,
            addr_barangay: row.addr_barangay,
            addr_line: row.addr_line,
            date_inspected: row.date_inspected,
            inspected_by: row.inspected_by,
            lat: row.lat,
            lng: row.lng,
            photo_url: row.photo_url,
            photo_taken_at: row.photo_taken_at,
            created_at: row.created_at,
            sync_state: row.sync_state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct FsecRecordLocal {
    #[primary_key]
    pub seq: u32,
    pub id: Option<i64>,
    pub fsec_owner: String,
    pub proposed_project: String,
    pub fsec_address: String,
    pub addr_barangay: String,
    pub addr_line: String,
    pub fsec_date: String,
    pub contact_number: String,
    pub created_at: String,
    pub sync_state: SyncState,
}

impl FsecRecordLocal {
    fn from_record(seq: u32, record: &FsecRecord) -> Self {
        Self {
            seq,
            id: record.id,
            fsec_owner: record.fsec_owner.clone(),
            proposed_project: record.proposed_project.clone(),
            fsec_address: record.fsec_address.clone(),
            addr_barangay: record.addr_barangay.clone(),
            addr_line: record.addr_line.clone(),
            fsec_date: record.fsec_date.clone(),
            contact_number: record.contact_number.clone(),
            created_at: record.created_at.clone(),
            sync_state: record.sync_state,
        }
    }
}

impl From<FsecRecordLocal> for FsecRecord {
    fn from(row: FsecRecordLocal) -> Self {
        Self {
            id: row.id,
            fsec_owner: row.fsec_owner,
            proposed_project: row.proposed_project,
            fsec_address: row.fsec_address,
            addr_barangay: row.addr_barangay,
            addr_line: row.addr_line,
            fsec_date: row.fsec_date,
            contact_number: row.contact_number,
            created_at: row.created_at,
            sync_state: row.sync_state,
        }
    }
}

// Model registration is a code constant; failure here is a defect in the
// definitions above, not a runtime condition.
static MODELS: Lazy<Models> = Lazy::new(|| {
    let mut models = Models::new();
    models
        .define::<InspectionRecordLocal>()
        .expect("register inspection cache model");
    models
        .define::<FsecRecordLocal>()
        .expect("register fsec cache model");
    models
});

pub struct LocalCache {
    path: PathBuf,
    db: Option<Database<'static>>,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("path", &self.path)
            .field("db", if self.db.is_some() { &"Open" } else { &"Unavailable" })
            .finish()
    }
}

impl LocalCache {
    /// Opens (or creates) the cache file for a storage key. An unopenable
    /// store degrades to a no-op cache rather than failing the session.
    pub fn open(dir: &Path, storage_key: &str) -> Self {
        let path = dir.join(format!("{storage_key}.db"));
        if let Err(err) = fs::create_dir_all(dir) {
            warn!(error = %err, dir = %dir.display(), "cannot create cache directory");
            return Self { path, db: None };
        }
        match Builder::new().create(&MODELS, &path) {
            Ok(db) => Self { path, db: Some(db) },
            Err(err) => {
                warn!(error = %err, path = %path.display(), "cannot open local cache");
                Self { path, db: None }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_inspections(&self) -> Vec<InspectionRecord> {
        self.load_rows::<InspectionRecordLocal>()
            .into_iter()
            .map(InspectionRecord::from)
            .collect()
    }

    pub fn save_inspections(&self, records: &[InspectionRecord]) {
        let rows: Vec<InspectionRecordLocal> = records
            .iter()
            .enumerate()
            .map(|(seq, record)| InspectionRecordLocal::from_record(seq as u32, record))
            .collect();
        self.replace_rows(rows, "inspection");
    }

    pub fn load_fsecs(&self) -> Vec<FsecRecord> {
        self.load_rows::<FsecRecordLocal>()
            .into_iter()
            .map(FsecRecord::from)
            .collect()
    }

    pub fn save_fsecs(&self, records: &[FsecRecord]) {
        let rows: Vec<FsecRecordLocal> = records
            .iter()
            .enumerate()
            .map(|(seq, record)| FsecRecordLocal::from_record(seq as u32, record))
            .collect();
        self.replace_rows(rows, "fsec");
    }

    /// Primary scans are key-ordered, which is the saved sequence order.
    /// Rows that fail to decode are skipped, never fatal.
    fn load_rows<T>(&self) -> Vec<T>
    where
        T: native_db::ToInput + Clone,
    {
        let Some(db) = &self.db else {
            return Vec::new();
        };
        let result = (|| -> Result<Vec<T>, native_db::db_type::Error> {
            let r = db.r_transaction()?;
            let rows = r
                .scan()
                .primary::<T>()?
                .all()?
                .filter_map(Result::ok)
                .collect();
            Ok(rows)
        })();
        match result {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "cache load failed; starting empty");
                Vec::new()
            }
        }
    }

    /// Replaces the whole stored list. Failures are logged and swallowed;
    /// the in-memory list stays authoritative for the session.
    fn replace_rows<T>(&self, rows: Vec<T>, what: &str)
    where
        T: native_db::ToInput + Clone,
    {
        let Some(db) = &self.db else {
            return;
        };
        let result = (|| -> Result<(), native_db::db_type::Error> {
            let rw = db.rw_transaction()?;
            let existing: Vec<T> = rw
                .scan()
                .primary::<T>()?
                .all()?
                .collect::<Result<Vec<_>, _>>()?;
            for row in existing {
                rw.remove(row)?;
            }
            for row in rows {
                rw.insert(row)?;
            }
            rw.commit()?;
            Ok(())
        })();
        if let Err(err) = result {
            warn!(error = %err, what, "failed to persist local cache; keeping in-memory state");
        }
    }
}
