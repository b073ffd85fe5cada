//! Remote store adapter over PostgREST. Translates table operations into
//! `postgrest` builder calls and parses PostgREST error bodies into a
//! structured [`RemoteError`] the reconciler can classify.

use anyhow::{anyhow, Result};
use postgrest::Postgrest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::models::{AppUser, FsecRecord, FsecRow, InspectionRecord, InspectionRow};

pub const INSPECTION_TABLE: &str = "inspection_logbook";
pub const FSEC_TABLE: &str = "fsec_building_plan_logbook";

/// Hard cap on the inspection list fetch; the office logbook is well under
/// this for years of entries.
pub const INSPECTION_FETCH_LIMIT: usize = 2000;

const INSPECTION_SELECT: &str = "id, io_number, owner_name, business_name, address, \
     date_inspected, fsic_number, inspected_by, latitude, longitude, \
     photo_url, photo_taken_at, created_at";

/// Select list for schemas that predate the geolocation migration.
const INSPECTION_SELECT_NO_GEO: &str = "id, io_number, owner_name, business_name, address, \
     date_inspected, fsic_number, inspected_by, created_at";

const FSEC_SELECT: &str =
    "id, owner_name, proposed_project, address, date, contact_number, created_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub rest_url: String,
    pub anon_key: String,
}

impl DatabaseConfig {
    pub fn new(rest_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let mut rest_url = rest_url.into();
        // Ensure the URL has the correct PostgREST path
        if !rest_url.ends_with("/rest/v1") {
            if rest_url.ends_with('/') {
                rest_url.push_str("rest/v1");
            } else {
                rest_url.push_str("/rest/v1");
            }
        }
        Self {
            rest_url,
            anon_key: anon_key.into(),
        }
    }

    /// Reads the remote configuration from the environment. A missing URL is
    /// not an error: it means the session runs local-only.
    pub fn from_env() -> Result<Option<Self>> {
        dotenv::dotenv().ok();

        let Ok(rest_url) = std::env::var("FSIS_SUPABASE_URL") else {
            return Ok(None);
        };
        let anon_key = std::env::var("FSIS_SUPABASE_ANON_KEY").map_err(|_| {
            anyhow!("FSIS_SUPABASE_ANON_KEY is required when FSIS_SUPABASE_URL is set")
        })?;

        Ok(Some(Self::new(rest_url, anon_key)))
    }
}

/// How a remote failure should be handled upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The schema predates the geolocation migration; retry without the
    /// geo/photo columns.
    MissingGeoColumns,
    /// Row-level security rejected the write; the user needs a policy fix,
    /// not a retry.
    PolicyDenied,
    Other,
}

/// Error body returned by PostgREST, e.g.
/// `{"code":"42703","message":"column \"latitude\" does not exist",...}`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    pub fn transport(err: &reqwest::Error) -> Self {
        Self {
            code: None,
            message: format!("request failed: {err}"),
        }
    }

    /// Classifies on the SQLSTATE code when present; message sniffing is a
    /// compatibility shim for gateways that strip the code.
    pub fn kind(&self) -> RemoteErrorKind {
        match self.code.as_deref() {
            Some("42703") => return RemoteErrorKind::MissingGeoColumns,
            Some("42501") => return RemoteErrorKind::PolicyDenied,
            _ => {}
        }
        let msg = self.message.to_lowercase();
        if msg.contains("latitude") || msg.contains("longitude") {
            RemoteErrorKind::MissingGeoColumns
        } else if msg.contains("policy") || self.message.contains("RLS") {
            RemoteErrorKind::PolicyDenied
        } else {
            RemoteErrorKind::Other
        }
    }

    /// Operator-facing hint for access-control shaped failures.
    pub fn policy_hint(&self) -> Option<&'static str> {
        match self.kind() {
            RemoteErrorKind::PolicyDenied => Some(
                "The database rejected the write under row-level security. \
                 Check the table policies for the anon role.",
            ),
            _ => None,
        }
    }
}

fn error_from_body(status: reqwest::StatusCode, body: &str) -> RemoteError {
    if let Ok(parsed) = serde_json::from_str::<RemoteError>(body) {
        if !parsed.message.is_empty() || parsed.code.is_some() {
            return parsed;
        }
    }
    RemoteError {
        code: None,
        message: format!("HTTP {status}: {body}"),
    }
}

/// Which payload an inspection write landed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionWrite {
    Full,
    /// The geo/photo columns were dropped for a pre-migration schema.
    ReducedSchema,
}

pub struct LogbookDbClient {
    client: Postgrest,
}

impl std::fmt::Debug for LogbookDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogbookDbClient").finish_non_exhaustive()
    }
}

impl LogbookDbClient {
    pub fn new(config: &DatabaseConfig) -> Self {
        let client = Postgrest::new(&config.rest_url)
            .insert_header("apikey", &config.anon_key)
            .insert_header("Authorization", format!("Bearer {}", config.anon_key));
        Self { client }
    }

    /// Runs a builder expected to return rows.
    async fn rows<T>(&self, builder: postgrest::Builder) -> Result<Vec<T>, RemoteError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = builder
            .execute()
            .await
            .map_err(|err| RemoteError::transport(&err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| RemoteError::transport(&err))?;
        if !status.is_success() {
            return Err(error_from_body(status, &body));
        }
        serde_json::from_str(&body).map_err(|err| RemoteError {
            code: None,
            message: format!("unexpected response shape: {err}"),
        })
    }

    /// Runs a builder where only success matters (UPDATE, DELETE).
    async fn exec(&self, builder: postgrest::Builder) -> Result<(), RemoteError> {
        let response = builder
            .execute()
            .await
            .map_err(|err| RemoteError::transport(&err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|err| RemoteError::transport(&err))?;
            return Err(error_from_body(status, &body));
        }
        Ok(())
    }

    /// Lists inspection rows oldest-first. When the schema lacks the geo
    /// columns the select is retried without them.
    pub async fn list_inspections(&self) -> Result<Vec<InspectionRow>, RemoteError> {
        let full = self
            .rows::<InspectionRow>(
                self.client
                    .from(INSPECTION_TABLE)
                    .select(INSPECTION_SELECT)
                    .order("created_at.asc")
                    .limit(INSPECTION_FETCH_LIMIT),
            )
            .await;
        match full {
            Ok(rows) => Ok(rows),
            Err(err) if err.kind() == RemoteErrorKind::MissingGeoColumns => {
                debug!("geo columns missing; retrying with reduced select");
                self.rows(
                    self.client
                        .from(INSPECTION_TABLE)
                        .select(INSPECTION_SELECT_NO_GEO)
                        .order("created_at.asc")
                        .limit(INSPECTION_FETCH_LIMIT),
                )
                .await
            }
            Err(err) => Err(err),
        }
    }

    /// Inserts or updates an inspection row, retrying with the reduced
    /// payload when the schema lacks the geo columns. The caller needs to
    /// know which payload landed: rows written through the fallback hold no
    /// coordinates remotely, so a reload would drop the local ones.
    pub async fn upsert_inspection(
        &self,
        record: &InspectionRecord,
    ) -> Result<InspectionWrite, RemoteError> {
        match self.write_inspection(record, true).await {
            Ok(()) => Ok(InspectionWrite::Full),
            Err(err) if err.kind() == RemoteErrorKind::MissingGeoColumns => {
                debug!("geo columns missing; retrying write with reduced payload");
                self.write_inspection(record, false).await?;
                Ok(InspectionWrite::ReducedSchema)
            }
            Err(err) => Err(err),
        }
    }

    async fn write_inspection(
        &self,
        record: &InspectionRecord,
        include_geo: bool,
    ) -> Result<(), RemoteError> {
        let payload = record.remote_payload(include_geo).to_string();
        match record.id {
            Some(id) => {
                self.exec(
                    self.client
                        .from(INSPECTION_TABLE)
                        .eq("id", id.to_string())
                        .update(payload),
                )
                .await
            }
            None => self.exec(self.client.from(INSPECTION_TABLE).insert(payload)).await,
        }
    }

    pub async fn delete_inspection(&self, id: i64) -> Result<(), RemoteError> {
        self.exec(
            self.client
                .from(INSPECTION_TABLE)
                .eq("id", id.to_string())
                .delete(),
        )
        .await
    }

    pub async fn list_fsecs(&self) -> Result<Vec<FsecRow>, RemoteError> {
        self.rows(
            self.client
                .from(FSEC_TABLE)
                .select(FSEC_SELECT)
                .order("created_at.asc"),
        )
        .await
    }

    pub async fn upsert_fsec(&self, record: &FsecRecord) -> Result<(), RemoteError> {
        let payload = record.remote_payload().to_string();
        match record.id {
            Some(id) => {
                self.exec(
                    self.client
                        .from(FSEC_TABLE)
                        .eq("id", id.to_string())
                        .update(payload),
                )
                .await
            }
            None => self.exec(self.client.from(FSEC_TABLE).insert(payload)).await,
        }
    }

    pub async fn delete_fsec(&self, id: i64) -> Result<(), RemoteError> {
        self.exec(self.client.from(FSEC_TABLE).eq("id", id.to_string()).delete())
            .await
    }

    /// Verifies credentials through the `app_login` stored procedure. An
    /// empty row set means the credentials were rejected.
    pub async fn app_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AppUser>, RemoteError> {
        let params = json!({
            "p_username": username,
            "p_password": password,
        })
        .to_string();
        let mut users: Vec<AppUser> = self.rows(self.client.rpc("app_login", params)).await?;
        if users.is_empty() {
            Ok(None)
        } else {
            Ok(Some(users.remove(0)))
        }
    }

    /// Cheapest possible reachability check, used for the storage-mode
    /// badge.
    pub async fn probe(&self) -> Result<(), RemoteError> {
        self.rows::<serde_json::Value>(self.client.from(INSPECTION_TABLE).select("id").limit(1))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_normalizes_rest_path() {
        assert_eq!(
            DatabaseConfig::new("https://x.supabase.co", "k").rest_url,
            "https://x.supabase.co/rest/v1"
        );
        assert_eq!(
            DatabaseConfig::new("https://x.supabase.co/", "k").rest_url,
            "https://x.supabase.co/rest/v1"
        );
        assert_eq!(
            DatabaseConfig::new("https://x.supabase.co/rest/v1", "k").rest_url,
            "https://x.supabase.co/rest/v1"
        );
    }

    #[test]
    fn error_kind_prefers_sqlstate_code() {
        let err = RemoteError {
            code: Some("42703".into()),
            message: "column does not exist".into(),
        };
        assert_eq!(err.kind(), RemoteErrorKind::MissingGeoColumns);

        let err = RemoteError {
            code: Some("42501".into()),
            message: "permission denied".into(),
        };
        assert_eq!(err.kind(), RemoteErrorKind::PolicyDenied);
        assert!(err.policy_hint().is_some());
    }

    #[test]
    fn error_kind_falls_back_to_message_sniffing() {
        let geo = RemoteError {
            code: None,
            message: "column \"latitude\" of relation does not exist".into(),
        };
        assert_eq!(geo.kind(), RemoteErrorKind::MissingGeoColumns);

        let rls = RemoteError {
            code: None,
            message: "new row violates RLS for table".into(),
        };
        assert_eq!(rls.kind(), RemoteErrorKind::PolicyDenied);

        let other = RemoteError {
            code: None,
            message: "duplicate key value".into(),
        };
        assert_eq!(other.kind(), RemoteErrorKind::Other);
        assert!(other.policy_hint().is_none());
    }

    #[test]
    fn error_body_parses_postgrest_shape() {
        let body = r#"{"code":"42501","details":null,"hint":null,
            "message":"new row violates row-level security policy"}"#;
        let err = error_from_body(reqwest::StatusCode::FORBIDDEN, body);
        assert_eq!(err.code.as_deref(), Some("42501"));
        assert_eq!(err.kind(), RemoteErrorKind::PolicyDenied);

        let err = error_from_body(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.message.contains("502"));
        assert_eq!(err.kind(), RemoteErrorKind::Other);
    }
}
