//! Session controller for both logbooks. Owns the in-memory lists, the two
//! local caches and the optional remote clients, and reconciles every
//! save/delete against the remote store with optimistic local updates.

use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::cache::LocalCache;
use crate::db_client::{DatabaseConfig, InspectionWrite, LogbookDbClient};
use crate::models::{
    FsecForm, FsecRecord, InspectionForm, InspectionRecord, SyncState, UserSession,
    FSEC_STORAGE_KEY, INSPECTION_STORAGE_KEY,
};
use crate::photo::{self, PhotoAttachment};
use crate::storage::{StorageClient, StorageConfig};
use crate::LogbookError;

/// Where a save ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No remote store configured; the record lives in the local cache only.
    SavedLocally,
    /// The remote write succeeded and the list was reloaded from the remote
    /// store.
    SavedToDatabase,
}

/// Result of an init call. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Init already ran this session; nothing was reloaded.
    AlreadyInitialized,
    /// No remote store configured; cached records are the working set.
    LocalOnly,
    /// The canonical remote list was fetched and replaced the cached view.
    Refreshed,
    /// The remote fetch failed; the cached view stays in place.
    UsingCachedData,
}

/// Storage badge shown by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Database,
    Local,
}

pub struct LogbookClient {
    db: Option<LogbookDbClient>,
    storage: Option<StorageClient>,
    inspection_cache: LocalCache,
    fsec_cache: LocalCache,
    inspection_data: Vec<InspectionRecord>,
    fsec_data: Vec<FsecRecord>,
    inspection_loaded: bool,
    fsec_loaded: bool,
    last_fix: Option<(f64, f64)>,
}

impl std::fmt::Debug for LogbookClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogbookClient")
            .field("db", if self.db.is_some() { &"Database" } else { &"Local" })
            .field("inspections", &self.inspection_data.len())
            .field("fsecs", &self.fsec_data.len())
            .finish_non_exhaustive()
    }
}

impl LogbookClient {
    /// Builds a client over the given cache directory. With no database
    /// config the client runs local-only; every operation still works.
    pub fn new(cache_dir: &Path, database: Option<DatabaseConfig>) -> anyhow::Result<Self> {
        let storage = match &database {
            Some(config) => Some(StorageClient::new(StorageConfig::from_database(config))?),
            None => None,
        };
        let db = database.as_ref().map(LogbookDbClient::new);
        if db.is_none() {
            info!("no remote store configured; running local-only");
        }
        Ok(Self {
            db,
            storage,
            inspection_cache: LocalCache::open(cache_dir, INSPECTION_STORAGE_KEY),
            fsec_cache: LocalCache::open(cache_dir, FSEC_STORAGE_KEY),
            inspection_data: Vec::new(),
            fsec_data: Vec::new(),
            inspection_loaded: false,
            fsec_loaded: false,
            last_fix: None,
        })
    }

    pub fn from_env(cache_dir: &Path) -> anyhow::Result<Self> {
        Self::new(cache_dir, DatabaseConfig::from_env()?)
    }

    // ===== INIT =====

    /// Loads the inspection list: cache first for an instant view, then one
    /// remote refresh per session. A failed refresh is downgraded to the
    /// cached view, never an error.
    pub async fn init_inspection_data(&mut self) -> InitOutcome {
        if self.inspection_loaded {
            return InitOutcome::AlreadyInitialized;
        }
        self.inspection_loaded = true;
        self.inspection_data = self.inspection_cache.load_inspections();

        let Some(db) = &self.db else {
            return InitOutcome::LocalOnly;
        };
        match db.list_inspections().await {
            Ok(rows) => {
                self.inspection_data = rows.into_iter().map(InspectionRecord::from_row).collect();
                self.inspection_cache.save_inspections(&self.inspection_data);
                InitOutcome::Refreshed
            }
            Err(err) => {
                warn!(error = %err, "inspection refresh failed; serving cached records");
                InitOutcome::UsingCachedData
            }
        }
    }

    pub async fn init_fsec_data(&mut self) -> InitOutcome {
        if self.fsec_loaded {
            return InitOutcome::AlreadyInitialized;
        }
        self.fsec_loaded = true;
        self.fsec_data = self.fsec_cache.load_fsecs();

        let Some(db) = &self.db else {
            return InitOutcome::LocalOnly;
        };
        match db.list_fsecs().await {
            Ok(rows) => {
                self.fsec_data = rows.into_iter().map(FsecRecord::from_row).collect();
                self.fsec_cache.save_fsecs(&self.fsec_data);
                InitOutcome::Refreshed
            }
            Err(err) => {
                warn!(error = %err, "fsec refresh failed; serving cached records");
                InitOutcome::UsingCachedData
            }
        }
    }

    // ===== SAVE =====

    /// Saves a new or edited inspection. The in-memory list and the local
    /// cache are updated before the remote write; a remote failure leaves
    /// the record marked `SyncFailed` and local-only.
    pub async fn save_inspection(
        &mut self,
        editing: Option<usize>,
        form: InspectionForm,
        attachment: Option<PhotoAttachment>,
    ) -> Result<SaveOutcome, LogbookError> {
        form.validate()?;
        if let Some(idx) = editing {
            if idx >= self.inspection_data.len() {
                return Err(LogbookError::UnknownIndex(idx));
            }
        }

        let mut record = form.into_record(Utc::now().to_rfc3339());

        // Coordinates: photo EXIF wins, then the live device fix.
        let metadata = attachment
            .as_ref()
            .map(|photo| photo::read_metadata(&photo.bytes))
            .unwrap_or_default();
        match (metadata.lat, metadata.lng) {
            (Some(lat), Some(lng)) => {
                record.lat = Some(lat);
                record.lng = Some(lng);
            }
            _ => {
                if let Some((lat, lng)) = self.last_fix {
                    record.lat = Some(lat);
                    record.lng = Some(lng);
                }
            }
        }
        record.photo_taken_at = metadata.taken_at;
        if let Some(photo) = &attachment {
            record.photo_url = Some(photo::to_data_uri(photo.content_type(), &photo.bytes));
        }
        record.enforce_photo_invariant();
        record.sync_state = if self.db.is_some() {
            SyncState::Syncing
        } else {
            SyncState::Local
        };

        // Optimistic update; edits keep the remote identity and timestamp.
        let slot = match editing {
            Some(idx) => {
                record.id = self.inspection_data[idx].id;
                record.created_at = self.inspection_data[idx].created_at.clone();
                self.inspection_data[idx] = record;
                idx
            }
            None => {
                self.inspection_data.push(record);
                self.inspection_data.len() - 1
            }
        };
        self.inspection_cache.save_inspections(&self.inspection_data);

        let Some(db) = &self.db else {
            return Ok(SaveOutcome::SavedLocally);
        };

        // Photo upload only makes sense when the record keeps a location.
        // On failure the locally computed photo fields stand; only the
        // remote row goes photo-less (the payload drops inline previews).
        if self.inspection_data[slot].has_location() {
            if let Some((storage, photo)) = self.storage.as_ref().zip(attachment) {
                let bytes = photo::compress(&photo.bytes);
                let path = storage.object_path(&photo.file_name);
                match storage.upload_photo(&path, bytes, photo.content_type()).await {
                    Ok(url) => self.inspection_data[slot].photo_url = Some(url),
                    Err(err) => {
                        warn!(error = %err, "photo upload failed; keeping local photo value");
                    }
                }
            }
        }

        let written = db.upsert_inspection(&self.inspection_data[slot]).await;
        self.complete_inspection_write(slot, written).await
    }

    /// Reconciles the in-memory record at `slot` with the outcome of its
    /// remote write.
    async fn complete_inspection_write(
        &mut self,
        slot: usize,
        written: Result<InspectionWrite, crate::db_client::RemoteError>,
    ) -> Result<SaveOutcome, LogbookError> {
        match written {
            Ok(InspectionWrite::Full) => {
                self.reload_inspections_after_write().await;
                Ok(SaveOutcome::SavedToDatabase)
            }
            // The remote row lacks the geo columns; reloading would erase
            // the coordinates we still hold, so the optimistic copy stands.
            Ok(InspectionWrite::ReducedSchema) => {
                self.inspection_data[slot].sync_state = SyncState::Synced;
                self.inspection_cache.save_inspections(&self.inspection_data);
                Ok(SaveOutcome::SavedToDatabase)
            }
            Err(err) => {
                if let Some(hint) = err.policy_hint() {
                    warn!(error = %err, hint, "inspection write rejected");
                } else {
                    warn!(error = %err, "inspection write failed; record stays local");
                }
                self.inspection_data[slot].sync_state = SyncState::SyncFailed;
                self.inspection_cache.save_inspections(&self.inspection_data);
                Err(err.into())
            }
        }
    }

    pub async fn save_fsec(
        &mut self,
        editing: Option<usize>,
        form: FsecForm,
    ) -> Result<SaveOutcome, LogbookError> {
        form.validate()?;
        if let Some(idx) = editing {
            if idx >= self.fsec_data.len() {
                return Err(LogbookError::UnknownIndex(idx));
            }
        }

        let mut record = form.into_record(Utc::now().to_rfc3339());
        record.sync_state = if self.db.is_some() {
            SyncState::Syncing
        } else {
            SyncState::Local
        };

        let slot = match editing {
            Some(idx) => {
                record.id = self.fsec_data[idx].id;
                record.created_at = self.fsec_data[idx].created_at.clone();
                self.fsec_data[idx] = record;
                idx
            }
            None => {
                self.fsec_data.push(record);
                self.fsec_data.len() - 1
            }
        };
        self.fsec_cache.save_fsecs(&self.fsec_data);

        let Some(db) = &self.db else {
            return Ok(SaveOutcome::SavedLocally);
        };
        let written = db.upsert_fsec(&self.fsec_data[slot]).await;
        match written {
            Ok(()) => {
                self.reload_fsecs_after_write().await;
                Ok(SaveOutcome::SavedToDatabase)
            }
            Err(err) => {
                if let Some(hint) = err.policy_hint() {
                    warn!(error = %err, hint, "fsec write rejected");
                } else {
                    warn!(error = %err, "fsec write failed; record stays local");
                }
                self.fsec_data[slot].sync_state = SyncState::SyncFailed;
                self.fsec_cache.save_fsecs(&self.fsec_data);
                Err(err.into())
            }
        }
    }

    /// Pulls the canonical list back in after a successful write. A reload
    /// failure keeps the optimistic copy; the next init or save catches up.
    async fn reload_inspections_after_write(&mut self) {
        let Some(db) = &self.db else { return };
        match db.list_inspections().await {
            Ok(rows) => {
                self.inspection_data = rows.into_iter().map(InspectionRecord::from_row).collect();
            }
            Err(err) => {
                warn!(error = %err, "post-write reload failed; keeping optimistic list");
                for record in &mut self.inspection_data {
                    if record.sync_state == SyncState::Syncing {
                        record.sync_state = SyncState::Synced;
                    }
                }
            }
        }
        self.inspection_cache.save_inspections(&self.inspection_data);
    }

    async fn reload_fsecs_after_write(&mut self) {
        let Some(db) = &self.db else { return };
        match db.list_fsecs().await {
            Ok(rows) => {
                self.fsec_data = rows.into_iter().map(FsecRecord::from_row).collect();
            }
            Err(err) => {
                warn!(error = %err, "post-write reload failed; keeping optimistic list");
                for record in &mut self.fsec_data {
                    if record.sync_state == SyncState::Syncing {
                        record.sync_state = SyncState::Synced;
                    }
                }
            }
        }
        self.fsec_cache.save_fsecs(&self.fsec_data);
    }

    // ===== DELETE =====

    pub async fn delete_inspection(&mut self, index: usize) -> Result<(), LogbookError> {
        if index >= self.inspection_data.len() {
            return Err(LogbookError::UnknownIndex(index));
        }
        let Some(db) = &self.db else {
            self.inspection_data.remove(index);
            self.inspection_cache.save_inspections(&self.inspection_data);
            return Ok(());
        };
        // A record that never reached the remote store has no id and cannot
        // be deleted there.
        let id = self.inspection_data[index].id.ok_or(LogbookError::MissingId)?;
        db.delete_inspection(id).await?;
        self.inspection_data.remove(index);
        self.reload_inspections_after_write().await;
        Ok(())
    }

    pub async fn delete_fsec(&mut self, index: usize) -> Result<(), LogbookError> {
        if index >= self.fsec_data.len() {
            return Err(LogbookError::UnknownIndex(index));
        }
        let Some(db) = &self.db else {
            self.fsec_data.remove(index);
            self.fsec_cache.save_fsecs(&self.fsec_data);
            return Ok(());
        };
        let id = self.fsec_data[index].id.ok_or(LogbookError::MissingId)?;
        db.delete_fsec(id).await?;
        self.fsec_data.remove(index);
        self.reload_fsecs_after_write().await;
        Ok(())
    }

    // ===== SESSION / STATUS =====

    /// Feeds the latest device position; used for records whose photo
    /// carries no GPS tag.
    pub fn update_device_fix(&mut self, lat: f64, lng: f64) {
        self.last_fix = Some((lat, lng));
    }

    pub fn last_device_fix(&self) -> Option<(f64, f64)> {
        self.last_fix
    }

    pub async fn storage_mode(&self) -> StorageMode {
        match &self.db {
            Some(db) if db.probe().await.is_ok() => StorageMode::Database,
            _ => StorageMode::Local,
        }
    }

    /// Verifies credentials against the remote login procedure. Returns
    /// `Ok(None)` for rejected credentials.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<Option<UserSession>, LogbookError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(LogbookError::MissingField("username"));
        }
        if password.is_empty() {
            return Err(LogbookError::MissingField("password"));
        }
        let db = self.db.as_ref().ok_or(LogbookError::Offline)?;
        let user = db.app_login(username, password).await?;
        Ok(user.map(|user| UserSession::new(user, Utc::now().to_rfc3339(), remember_me)))
    }

    // ===== VIEWS =====

    pub fn inspections(&self) -> &[InspectionRecord] {
        &self.inspection_data
    }

    pub fn fsecs(&self) -> &[FsecRecord] {
        &self.fsec_data
    }

    pub fn inspections_with_location(&self) -> Vec<&InspectionRecord> {
        self.inspection_data.iter().filter(|r| r.has_location()).collect()
    }

    pub fn inspections_without_location(&self) -> Vec<&InspectionRecord> {
        self.inspection_data.iter().filter(|r| !r.has_location()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_client::RemoteError;

    fn form() -> InspectionForm {
        InspectionForm {
            business_name: "Acme Hardware".into(),
            barangay: "Lingion".into(),
            line: "123 Main St".into(),
            date_inspected: "2024-01-10".into(),
            ..Default::default()
        }
    }

    async fn client_with_located_record(dir: &Path) -> LogbookClient {
        let mut client = LogbookClient::new(dir, None).unwrap();
        client.init_inspection_data().await;
        client.update_device_fix(8.370, 124.865);
        client.save_inspection(None, form(), None).await.unwrap();
        client
    }

    #[tokio::test]
    async fn reduced_schema_write_keeps_coordinates_and_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = client_with_located_record(dir.path()).await;

        let outcome = client
            .complete_inspection_write(0, Ok(InspectionWrite::ReducedSchema))
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::SavedToDatabase);

        let record = &client.inspections()[0];
        assert_eq!(record.lat, Some(8.370));
        assert_eq!(record.lng, Some(124.865));
        assert_eq!(record.sync_state, SyncState::Synced);

        // The coordinates reached the cache as well.
        let persisted = client.inspection_cache.load_inspections();
        assert_eq!(persisted[0].lat, Some(8.370));
        assert_eq!(persisted[0].sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn failed_write_marks_record_sync_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = client_with_located_record(dir.path()).await;

        let err = RemoteError {
            code: Some("42501".into()),
            message: "new row violates row-level security policy".into(),
        };
        let result = client.complete_inspection_write(0, Err(err)).await;
        assert!(matches!(result, Err(LogbookError::Remote(_))));
        assert_eq!(client.inspections()[0].sync_state, SyncState::SyncFailed);
        assert_eq!(client.inspections()[0].lat, Some(8.370));
    }
}
