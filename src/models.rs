use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::photo;
use crate::LogbookError;

// ===== CONSTANTS =====

/// Fixed locality used when composing merged addresses; the office serves a
/// single municipality.
pub const ADDR_REGION: &str = "X";
pub const ADDR_PROVINCE: &str = "Bukidnon";
pub const ADDR_MUNICIPALITY: &str = "Manolo Fortich";

/// Well-known local storage keys, one per logbook.
pub const INSPECTION_STORAGE_KEY: &str = "bfp_inspection";
pub const FSEC_STORAGE_KEY: &str = "bfp_fsec";

// ===== SYNC STATE =====

/// Per-record synchronization phase. A record starts `Local`, moves to
/// `Syncing` while a remote write is in flight, and ends `Synced` once the
/// canonical remote list has been reloaded, or `SyncFailed` when the remote
/// write was rejected and the record remains local-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Local,
    Syncing,
    Synced,
    SyncFailed,
}

// ===== RECORDS =====

/// A fire-safety inspection entry as held in memory and in the local cache.
/// `id` stays `None` until the remote insert succeeds; after that it is the
/// sole key for remote update and delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
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
    #[serde(default)]
    pub sync_state: SyncState,
}

impl InspectionRecord {
    pub fn has_location(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }

    /// No location means no photo reference is kept on the record.
    pub fn enforce_photo_invariant(&mut self) {
        if !self.has_location() {
            self.photo_url = None;
            self.photo_taken_at = None;
        }
    }

    pub fn display_address(&self) -> String {
        format_address_display(&self.addr_line, &self.addr_barangay, &self.insp_address)
    }

    /// Remote column names for the `inspection_logbook` table. With
    /// `include_geo` false the payload matches the pre-migration schema
    /// (no latitude/longitude/photo columns).
    pub fn remote_payload(&self, include_geo: bool) -> Value {
        let mut payload = json!({
            "io_number": self.io_number,
            "owner_name": self.insp_owner,
            "business_name": self.business_name,
            "address": self.insp_address,
            "date_inspected": self.date_inspected,
            "fsic_number": self.fsic_number,
            "inspected_by": if self.inspected_by.is_empty() {
                Value::Null
            } else {
                json!(self.inspected_by)
            },
        });
        if include_geo {
            payload["latitude"] = json!(self.lat);
            payload["longitude"] = json!(self.lng);
            // The inline preview is a local-only value; the remote row gets
            // a real URL or null.
            payload["photo_url"] = json!(self
                .photo_url
                .as_deref()
                .filter(|url| !photo::is_inline_data(url)));
            payload["photo_taken_at"] = json!(self.photo_taken_at);
        }
        payload
    }

    /// Translates a remote row into the local shape. Photo fields only
    /// survive when the row carries coordinates.
    pub fn from_row(row: InspectionRow) -> Self {
        let has_location = row.latitude.is_some() && row.longitude.is_some();
        Self {
            id: row.id,
            io_number: row.io_number.unwrap_or_default(),
            fsic_number: row.fsic_number.unwrap_or_default(),
            insp_owner: row.owner_name.unwrap_or_default(),
            business_name: row.business_name.unwrap_or_default(),
            insp_address: row.address.clone().unwrap_or_default(),
            addr_barangay: String::new(),
            addr_line: String::new(),
            date_inspected: row.date_inspected.unwrap_or_default(),
            inspected_by: row.inspected_by.unwrap_or_default(),
            lat: row.latitude,
            lng: row.longitude,
            photo_url: if has_location { row.photo_url } else { None },
            photo_taken_at: if has_location { row.photo_taken_at } else { None },
            created_at: row.created_at.unwrap_or_default(),
            sync_state: SyncState::Synced,
        }
    }
}

/// An FSEC building-plan application entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsecRecord {
    pub id: Option<i64>,
    pub fsec_owner: String,
    pub proposed_project: String,
    pub fsec_address: String,
    pub addr_barangay: String,
    pub addr_line: String,
    pub fsec_date: String,
    pub contact_number: String,
    pub created_at: String,
    #[serde(default)]
    pub sync_state: SyncState,
}

impl FsecRecord {
    pub fn display_address(&self) -> String {
        format_address_display(&self.addr_line, &self.addr_barangay, &self.fsec_address)
    }

    /// Remote column names for the `fsec_building_plan_logbook` table.
    pub fn remote_payload(&self) -> Value {
        json!({
            "owner_name": self.fsec_owner,
            "proposed_project": self.proposed_project,
            "address": self.fsec_address,
            "date": self.fsec_date,
            "contact_number": self.contact_number,
        })
    }

    pub fn from_row(row: FsecRow) -> Self {
        Self {
            id: row.id,
            fsec_owner: row.owner_name.unwrap_or_default(),
            proposed_project: row.proposed_project.unwrap_or_default(),
            fsec_address: row.address.unwrap_or_default(),
            addr_barangay: String::new(),
            addr_line: String::new(),
            fsec_date: row.date.unwrap_or_default(),
            contact_number: row.contact_number.unwrap_or_default(),
            created_at: row.created_at.unwrap_or_default(),
            sync_state: SyncState::Synced,
        }
    }
}

// ===== REMOTE ROWS =====

/// Raw row as returned by the inspection table select. All columns are
/// optional so the reduced (pre-migration) select list deserializes too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InspectionRow {
    pub id: Option<i64>,
    pub io_number: Option<String>,
    pub owner_name: Option<String>,
    pub business_name: Option<String>,
    pub address: Option<String>,
    pub date_inspected: Option<String>,
    pub fsic_number: Option<String>,
    pub inspected_by: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub photo_url: Option<String>,
    pub photo_taken_at: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FsecRow {
    pub id: Option<i64>,
    pub owner_name: Option<String>,
    pub proposed_project: Option<String>,
    pub address: Option<String>,
    pub date: Option<String>,
    pub contact_number: Option<String>,
    pub created_at: Option<String>,
}

// ===== FORMS =====

/// Form input for an inspection record. Region/province/municipality default
/// to the office's fixed locality when not supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionForm {
    pub io_number: String,
    pub fsic_number: String,
    pub owner: String,
    pub business_name: String,
    pub barangay: String,
    pub line: String,
    pub date_inspected: String,
    pub inspected_by: String,
    pub region: Option<String>,
    pub province: Option<String>,
    pub municipality: Option<String>,
}

impl InspectionForm {
    pub fn validate(&self) -> Result<(), LogbookError> {
        if self.business_name.trim().is_empty() {
            return Err(LogbookError::MissingField("business_name"));
        }
        if self.barangay.trim().is_empty() {
            return Err(LogbookError::MissingField("barangay"));
        }
        if self.line.trim().is_empty() {
            return Err(LogbookError::MissingField("line"));
        }
        if self.date_inspected.trim().is_empty() {
            return Err(LogbookError::MissingField("date_inspected"));
        }
        Ok(())
    }

    pub fn merged_address(&self) -> String {
        merge_address(
            self.region.as_deref(),
            self.province.as_deref(),
            self.municipality.as_deref(),
            &self.barangay,
            &self.line,
        )
    }

    /// Builds the record without coordinates or photo fields; the reconciler
    /// fills those in from the photo metadata and the live device fix.
    pub fn into_record(self, created_at: String) -> InspectionRecord {
        let insp_address = self.merged_address();
        InspectionRecord {
            id: None,
            io_number: self.io_number.trim().to_string(),
            fsic_number: self.fsic_number.trim().to_string(),
            insp_owner: self.owner.trim().to_string(),
            business_name: self.business_name.trim().to_string(),
            insp_address,
            addr_barangay: self.barangay.trim().to_string(),
            addr_line: self.line.trim().to_string(),
            date_inspected: self.date_inspected.trim().to_string(),
            inspected_by: self.inspected_by.trim().to_string(),
            lat: None,
            lng: None,
            photo_url: None,
            photo_taken_at: None,
            created_at,
            sync_state: SyncState::Local,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FsecForm {
    pub owner: String,
    pub proposed_project: String,
    pub barangay: String,
    pub line: String,
    pub date: String,
    pub contact_number: String,
    pub region: Option<String>,
    pub province: Option<String>,
    pub municipality: Option<String>,
}

impl FsecForm {
    pub fn validate(&self) -> Result<(), LogbookError> {
        if self.owner.trim().is_empty() {
            return Err(LogbookError::MissingField("owner"));
        }
        if self.proposed_project.trim().is_empty() {
            return Err(LogbookError::MissingField("proposed_project"));
        }
        if self.barangay.trim().is_empty() {
            return Err(LogbookError::MissingField("barangay"));
        }
        if self.line.trim().is_empty() {
            return Err(LogbookError::MissingField("line"));
        }
        if self.date.trim().is_empty() {
            return Err(LogbookError::MissingField("date"));
        }
        if self.contact_number.trim().is_empty() {
            return Err(LogbookError::MissingField("contact_number"));
        }
        Ok(())
    }

    pub fn into_record(self, created_at: String) -> FsecRecord {
        let fsec_address = merge_address(
            self.region.as_deref(),
            self.province.as_deref(),
            self.municipality.as_deref(),
            &self.barangay,
            &self.line,
        );
        FsecRecord {
            id: None,
            fsec_owner: self.owner.trim().to_string(),
            proposed_project: self.proposed_project.trim().to_string(),
            fsec_address,
            addr_barangay: self.barangay.trim().to_string(),
            addr_line: self.line.trim().to_string(),
            fsec_date: self.date.trim().to_string(),
            contact_number: self.contact_number.trim().to_string(),
            created_at,
            sync_state: SyncState::Local,
        }
    }
}

// ===== ADDRESSES =====

/// Five-segment merged address: region, province, municipality,
/// "Barangay X", line. Legacy records store only this combined string.
pub fn merge_address(
    region: Option<&str>,
    province: Option<&str>,
    municipality: Option<&str>,
    barangay: &str,
    line: &str,
) -> String {
    format!(
        "Region {}, {}, {}, Barangay {}, {}",
        region.unwrap_or(ADDR_REGION).trim(),
        province.unwrap_or(ADDR_PROVINCE).trim(),
        municipality.unwrap_or(ADDR_MUNICIPALITY).trim(),
        barangay.trim(),
        line.trim()
    )
}

/// Human-oriented, line-first address. Prefers the discrete barangay/line
/// fields; falls back to parsing the legacy combined string by position.
pub fn format_address_display(addr_line: &str, addr_barangay: &str, full: &str) -> String {
    if !addr_line.is_empty() || !addr_barangay.is_empty() {
        return join_nonempty(&[
            addr_line,
            addr_barangay,
            ADDR_MUNICIPALITY,
            ADDR_PROVINCE,
            "Region X",
        ]);
    }

    let full = full.trim();
    if full.is_empty() {
        return "—".to_string();
    }
    let parts: Vec<&str> = full.split(',').map(str::trim).collect();
    if parts.len() >= 5 {
        let barangay = strip_barangay_prefix(parts[3]);
        return join_nonempty(&[parts[4], barangay, parts[2], parts[1], parts[0]]);
    }
    full.to_string()
}

fn strip_barangay_prefix(segment: &str) -> &str {
    let lower = segment.to_ascii_lowercase();
    if lower.starts_with("barangay ") {
        segment[9..].trim()
    } else {
        segment
    }
}

fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

// ===== SESSION =====

/// Row returned by the `app_login` remote procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: String,
}

/// Session handed to the presentation layer after a successful login.
/// Storage and expiry of the session are the caller's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub issued_at: String,
    pub remember_me: bool,
}

impl UserSession {
    pub fn new(user: AppUser, issued_at: String, remember_me: bool) -> Self {
        let display_name = match user.display_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => user.username.clone(),
        };
        Self {
            user_id: user.id,
            username: user.username,
            display_name,
            role: user.role,
            issued_at,
            remember_me,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_form() -> InspectionForm {
        InspectionForm {
            io_number: "IO-2024-001".into(),
            fsic_number: "FSIC-44".into(),
            owner: "J. Dela Cruz".into(),
            business_name: "Acme Hardware".into(),
            barangay: "Lingion".into(),
            line: "123 Main St".into(),
            date_inspected: "2024-01-10".into(),
            inspected_by: "".into(),
            ..Default::default()
        }
    }

    #[test]
    fn merged_address_uses_fixed_locality() {
        let form = sample_form();
        assert_eq!(
            form.merged_address(),
            "Region X, Bukidnon, Manolo Fortich, Barangay Lingion, 123 Main St"
        );
    }

    #[test]
    fn display_address_prefers_discrete_fields() {
        let record = sample_form().into_record("2024-01-10T00:00:00Z".into());
        assert_eq!(
            record.display_address(),
            "123 Main St, Lingion, Manolo Fortich, Bukidnon, Region X"
        );
    }

    #[test]
    fn display_address_parses_legacy_combined_string() {
        let shown = format_address_display(
            "",
            "",
            "Region X, Bukidnon, Manolo Fortich, Barangay Damilag, Purok 2",
        );
        assert_eq!(shown, "Purok 2, Damilag, Manolo Fortich, Bukidnon, Region X");
    }

    #[test]
    fn display_address_falls_back_to_short_strings() {
        assert_eq!(format_address_display("", "", "Damilag crossing"), "Damilag crossing");
        assert_eq!(format_address_display("", "", ""), "—");
    }

    #[test]
    fn validation_reports_first_missing_field() {
        let mut form = sample_form();
        form.business_name.clear();
        assert!(matches!(
            form.validate(),
            Err(LogbookError::MissingField("business_name"))
        ));

        let fsec = FsecForm {
            owner: "A".into(),
            proposed_project: "Warehouse".into(),
            barangay: "Lingion".into(),
            line: "Lot 4".into(),
            date: "2024-02-01".into(),
            contact_number: "".into(),
            ..Default::default()
        };
        assert!(matches!(
            fsec.validate(),
            Err(LogbookError::MissingField("contact_number"))
        ));
    }

    #[test]
    fn photo_invariant_clears_photo_without_location() {
        let mut record = sample_form().into_record("2024-01-10T00:00:00Z".into());
        record.photo_url = Some("https://example.com/p.jpg".into());
        record.photo_taken_at = Some("2024:01:10 09:30:00".into());
        record.enforce_photo_invariant();
        assert_eq!(record.photo_url, None);
        assert_eq!(record.photo_taken_at, None);

        record.lat = Some(8.37);
        record.lng = Some(124.865);
        record.photo_url = Some("https://example.com/p.jpg".into());
        record.enforce_photo_invariant();
        assert!(record.photo_url.is_some());
    }

    #[test]
    fn remote_payload_nulls_empty_inspector_and_gates_geo() {
        let mut record = sample_form().into_record("2024-01-10T00:00:00Z".into());
        record.lat = Some(8.37);
        record.lng = Some(124.865);

        let with_geo = record.remote_payload(true);
        assert!(with_geo["inspected_by"].is_null());
        assert_eq!(with_geo["latitude"], json!(8.37));
        assert_eq!(with_geo["owner_name"], json!("J. Dela Cruz"));

        let without_geo = record.remote_payload(false);
        assert!(without_geo.get("latitude").is_none());
        assert!(without_geo.get("longitude").is_none());
        assert!(without_geo.get("photo_url").is_none());
        assert!(without_geo.get("photo_taken_at").is_none());
        assert_eq!(without_geo["business_name"], json!("Acme Hardware"));
    }

    #[test]
    fn remote_payload_excludes_inline_photo_previews() {
        let mut record = sample_form().into_record("2024-01-10T00:00:00Z".into());
        record.lat = Some(8.37);
        record.lng = Some(124.865);
        record.photo_url = Some("data:image/jpeg;base64,AAAA".into());
        record.photo_taken_at = Some("2024:01:10 09:30:00".into());

        let payload = record.remote_payload(true);
        assert!(payload["photo_url"].is_null());
        assert_eq!(payload["photo_taken_at"], json!("2024:01:10 09:30:00"));

        record.photo_url = Some("https://example.com/p.jpg".into());
        let payload = record.remote_payload(true);
        assert_eq!(payload["photo_url"], json!("https://example.com/p.jpg"));
    }

    #[test]
    fn from_row_gates_photo_fields_on_coordinates() {
        let row = InspectionRow {
            id: Some(7),
            business_name: Some("Acme Hardware".into()),
            photo_url: Some("https://example.com/p.jpg".into()),
            photo_taken_at: Some("2024:01:10 09:30:00".into()),
            latitude: None,
            longitude: Some(124.865),
            ..Default::default()
        };
        let record = InspectionRecord::from_row(row);
        assert_eq!(record.photo_url, None);
        assert_eq!(record.photo_taken_at, None);
        assert_eq!(record.sync_state, SyncState::Synced);
    }

    #[test]
    fn reduced_select_rows_deserialize() {
        let body = r#"[{"id":3,"io_number":"IO-1","owner_name":"J",
            "business_name":"B","address":"A","date_inspected":"2024-01-10",
            "fsic_number":"F","inspected_by":null,"created_at":"2024-01-10T01:00:00Z"}]"#;
        let rows: Vec<InspectionRow> = serde_json::from_str(body).unwrap();
        assert_eq!(rows[0].latitude, None);
        assert_eq!(rows[0].inspected_by, None);
    }

    #[test]
    fn session_display_name_falls_back_to_username() {
        let user = AppUser {
            id: 1,
            username: "inspector1".into(),
            display_name: Some("  ".into()),
            role: "staff".into(),
        };
        let session = UserSession::new(user, "2024-01-10T00:00:00Z".into(), true);
        assert_eq!(session.display_name, "inspector1");
        assert!(session.remember_me);
    }
}
