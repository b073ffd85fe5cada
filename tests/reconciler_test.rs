//! End-to-end tests of the reconciler over a temporary cache directory.
//! All tests run without a reachable remote store: clients are built either
//! with no database config (local-only) or with an unroutable endpoint.

use fsis_rs::{
    DatabaseConfig, FsecForm, InitOutcome, InspectionForm, LogbookClient, LogbookError,
    PhotoAttachment, SaveOutcome, SyncState,
};

fn inspection_form(business: &str) -> InspectionForm {
    InspectionForm {
        io_number: "IO-2024-001".into(),
        business_name: business.into(),
        barangay: "Lingion".into(),
        line: "123 Main St".into(),
        date_inspected: "2024-01-10".into(),
        ..Default::default()
    }
}

fn fsec_form() -> FsecForm {
    FsecForm {
        owner: "J. Dela Cruz".into(),
        proposed_project: "Two-storey warehouse".into(),
        barangay: "Damilag".into(),
        line: "Lot 4, Purok 2".into(),
        date: "2024-02-01".into(),
        contact_number: "0917 000 0000".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn offline_save_without_fix_has_no_location_or_photo() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = LogbookClient::new(dir.path(), None).unwrap();
    assert_eq!(client.init_inspection_data().await, InitOutcome::LocalOnly);

    let outcome = client
        .save_inspection(None, inspection_form("Acme Hardware"), None)
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::SavedLocally);

    let records = client.inspections();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, None);
    assert_eq!(records[0].lat, None);
    assert_eq!(records[0].lng, None);
    assert_eq!(records[0].photo_url, None);
    assert_eq!(records[0].sync_state, SyncState::Local);

    assert!(client.inspections_with_location().is_empty());
    assert_eq!(client.inspections_without_location().len(), 1);
}

#[tokio::test]
async fn device_fix_fills_coordinates_for_untagged_saves() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = LogbookClient::new(dir.path(), None).unwrap();
    client.init_inspection_data().await;

    client.update_device_fix(8.370, 124.865);
    client
        .save_inspection(None, inspection_form("Acme Hardware"), None)
        .await
        .unwrap();

    let record = &client.inspections()[0];
    assert_eq!(record.lat, Some(8.370));
    assert_eq!(record.lng, Some(124.865));
    assert_eq!(client.inspections_with_location().len(), 1);
}

#[tokio::test]
async fn offline_records_survive_a_new_session_in_order() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut client = LogbookClient::new(dir.path(), None).unwrap();
        client.init_inspection_data().await;
        client
            .save_inspection(None, inspection_form("First"), None)
            .await
            .unwrap();
        client
            .save_inspection(None, inspection_form("Second"), None)
            .await
            .unwrap();
    }

    let mut client = LogbookClient::new(dir.path(), None).unwrap();
    assert_eq!(client.init_inspection_data().await, InitOutcome::LocalOnly);
    let names: Vec<&str> = client
        .inspections()
        .iter()
        .map(|r| r.business_name.as_str())
        .collect();
    assert_eq!(names, vec!["First", "Second"]);
}

#[tokio::test]
async fn editing_preserves_identity_and_created_at() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = LogbookClient::new(dir.path(), None).unwrap();
    client.init_inspection_data().await;

    client
        .save_inspection(None, inspection_form("Old Name"), None)
        .await
        .unwrap();
    let created_at = client.inspections()[0].created_at.clone();

    client
        .save_inspection(Some(0), inspection_form("New Name"), None)
        .await
        .unwrap();
    assert_eq!(client.inspections().len(), 1);
    assert_eq!(client.inspections()[0].business_name, "New Name");
    assert_eq!(client.inspections()[0].created_at, created_at);

    let err = client
        .save_inspection(Some(5), inspection_form("Nope"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LogbookError::UnknownIndex(5)));
}

#[tokio::test]
async fn invalid_form_leaves_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = LogbookClient::new(dir.path(), None).unwrap();
    client.init_fsec_data().await;

    let mut form = fsec_form();
    form.contact_number.clear();
    let err = client.save_fsec(None, form).await.unwrap_err();
    assert!(matches!(
        err,
        LogbookError::MissingField("contact_number")
    ));
    assert!(client.fsecs().is_empty());

    // Nothing was written to the cache either.
    let mut fresh = LogbookClient::new(dir.path(), None).unwrap();
    fresh.init_fsec_data().await;
    assert!(fresh.fsecs().is_empty());
}

#[tokio::test]
async fn offline_delete_splices_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = LogbookClient::new(dir.path(), None).unwrap();
    client.init_fsec_data().await;

    client.save_fsec(None, fsec_form()).await.unwrap();
    let mut second = fsec_form();
    second.owner = "M. Santos".into();
    client.save_fsec(None, second).await.unwrap();

    client.delete_fsec(0).await.unwrap();
    assert_eq!(client.fsecs().len(), 1);
    assert_eq!(client.fsecs()[0].fsec_owner, "M. Santos");

    let err = client.delete_fsec(7).await.unwrap_err();
    assert!(matches!(err, LogbookError::UnknownIndex(7)));

    // Release the cache file lock before opening a fresh session.
    drop(client);
    let mut fresh = LogbookClient::new(dir.path(), None).unwrap();
    fresh.init_fsec_data().await;
    assert_eq!(fresh.fsecs().len(), 1);
}

#[tokio::test]
async fn unreachable_remote_serves_cached_data_and_guards_deletes() {
    let dir = tempfile::tempdir().unwrap();

    // Seed the cache in a local-only session.
    {
        let mut client = LogbookClient::new(dir.path(), None).unwrap();
        client.init_inspection_data().await;
        client
            .save_inspection(None, inspection_form("Cached Entry"), None)
            .await
            .unwrap();
    }

    // Port 1 refuses connections immediately, so the refresh fails fast.
    let config = DatabaseConfig::new("http://127.0.0.1:1", "test-key");
    let mut client = LogbookClient::new(dir.path(), Some(config)).unwrap();
    assert_eq!(
        client.init_inspection_data().await,
        InitOutcome::UsingCachedData
    );
    assert_eq!(client.inspections().len(), 1);
    assert_eq!(client.inspections()[0].business_name, "Cached Entry");

    // Never synced, so there is no remote id to delete by.
    let err = client.delete_inspection(0).await.unwrap_err();
    assert!(matches!(err, LogbookError::MissingId));
    assert_eq!(client.inspections().len(), 1);
}

#[tokio::test]
async fn failed_upload_keeps_the_local_photo_value() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::new("http://127.0.0.1:1", "test-key");
    let mut client = LogbookClient::new(dir.path(), Some(config)).unwrap();
    client.init_inspection_data().await;
    client.update_device_fix(8.370, 124.865);

    // Both the photo upload and the row write fail against the unroutable
    // endpoint; the record stays local with its inline preview intact.
    let attachment = PhotoAttachment::new("site.jpg", vec![0u8; 64]);
    let err = client
        .save_inspection(None, inspection_form("Acme Hardware"), Some(attachment))
        .await
        .unwrap_err();
    assert!(matches!(err, LogbookError::Remote(_)));

    let record = &client.inspections()[0];
    assert!(record.photo_url.as_deref().unwrap().starts_with("data:"));
    assert_eq!(record.lat, Some(8.370));
    assert_eq!(record.sync_state, SyncState::SyncFailed);

    // The inline preview never reaches the persisted cache. Release the
    // cache file lock before opening a fresh session.
    drop(client);
    let mut fresh = LogbookClient::new(dir.path(), None).unwrap();
    fresh.init_inspection_data().await;
    assert_eq!(fresh.inspections()[0].photo_url, None);
    assert_eq!(fresh.inspections()[0].lat, Some(8.370));
}

#[tokio::test]
async fn init_runs_at_most_once_per_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = LogbookClient::new(dir.path(), None).unwrap();

    assert_eq!(client.init_inspection_data().await, InitOutcome::LocalOnly);
    assert_eq!(
        client.init_inspection_data().await,
        InitOutcome::AlreadyInitialized
    );
    assert_eq!(client.init_fsec_data().await, InitOutcome::LocalOnly);
    assert_eq!(
        client.init_fsec_data().await,
        InitOutcome::AlreadyInitialized
    );
}

#[tokio::test]
async fn authenticate_requires_a_remote_store_and_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let client = LogbookClient::new(dir.path(), None).unwrap();

    let err = client.authenticate("", "pw", false).await.unwrap_err();
    assert!(matches!(err, LogbookError::MissingField("username")));

    let err = client
        .authenticate("inspector1", "", false)
        .await
        .unwrap_err();
    assert!(matches!(err, LogbookError::MissingField("password")));

    let err = client
        .authenticate("inspector1", "pw", false)
        .await
        .unwrap_err();
    assert!(matches!(err, LogbookError::Offline));
}
