//! Lookup and write access to the study database.

use std::sync::Arc;

use async_trait::async_trait;
use bb8_postgres::bb8::PooledConnection;
use bb8_postgres::PostgresConnectionManager;
use thiserror::Error;
use tokio_postgres::NoTls;

use crate::database::PgPool;
use crate::structs::{
    CandidateRow, Language, MediaData, MediaEdit, MediaFile, MediaRecord, SessionJoinRow, Site,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to retrieve a pooled connection: {0}")]
    Pool(String),
    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// All instrument names, alphabetically.
    async fn instrument_names(&self) -> Result<Vec<String>, StoreError>;

    /// All candidates ordered by PSCID.
    async fn candidates(&self) -> Result<Vec<CandidateRow>, StoreError>;

    async fn sites(&self) -> Result<Vec<Site>, StoreError>;

    async fn visit_labels(&self) -> Result<Vec<String>, StoreError>;

    async fn languages(&self) -> Result<Vec<Language>, StoreError>;

    /// Candidates joined to their sessions and administered instruments.
    /// Candidates without a session produce no row.
    async fn session_join_rows(&self) -> Result<Vec<SessionJoinRow>, StoreError>;

    async fn media_files(&self) -> Result<Vec<MediaFile>, StoreError>;

    async fn media_data(&self, id: i32) -> Result<Option<MediaData>, StoreError>;

    /// Session id for a candidate's visit at a site, if one exists.
    async fn resolve_session(
        &self,
        pscid: &str,
        visit_label: &str,
        center_id: i32,
    ) -> Result<Option<i32>, StoreError>;

    async fn find_media_by_file_name(&self, file_name: &str) -> Result<Option<i32>, StoreError>;

    async fn insert_media(&self, record: &MediaRecord) -> Result<i32, StoreError>;

    /// Replace every column of an existing media row.
    async fn overwrite_media(&self, id: i32, record: &MediaRecord) -> Result<(), StoreError>;

    /// Apply an edit; returns the number of rows touched.
    async fn edit_media(&self, id: i32, edit: &MediaEdit) -> Result<u64, StoreError>;
}

pub struct PgMediaStore {
    pool: Arc<PgPool>,
}

impl PgMediaStore {
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn client(
        &self,
        operation: &'static str,
    ) -> Result<PooledConnection<'_, PostgresConnectionManager<NoTls>>, StoreError> {
        match self.pool.get().await {
            Ok(client) => Ok(client),
            Err(err) => {
                sentry::capture_message(
                    &format!("store::{operation}: Failed to get pool: {err}"),
                    sentry::Level::Error,
                );
                Err(StoreError::Pool(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl MediaStore for PgMediaStore {
    async fn instrument_names(&self) -> Result<Vec<String>, StoreError> {
        let client = self.client("instrument_names").await?;
        let rows = client
            .query("SELECT test_name FROM test_names ORDER BY test_name", &[])
            .await?;
        let values = rows
            .iter()
            .map(|row| row.try_get(0))
            .collect::<Result<Vec<String>, _>>()?;
        Ok(values)
    }

    async fn candidates(&self) -> Result<Vec<CandidateRow>, StoreError> {
        let client = self.client("candidates").await?;
        let rows = client
            .query("SELECT cand_id, pscid FROM candidate ORDER BY pscid", &[])
            .await?;
        let mapped = rows
            .iter()
            .map(|row| {
                Ok(CandidateRow {
                    cand_id: row.try_get(0)?,
                    pscid: row.try_get(1)?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;
        Ok(mapped)
    }

    async fn sites(&self) -> Result<Vec<Site>, StoreError> {
        let client = self.client("sites").await?;
        let rows = client
            .query("SELECT center_id, name FROM psc ORDER BY name", &[])
            .await?;
        let mapped = rows
            .iter()
            .map(|row| {
                Ok(Site {
                    center_id: row.try_get(0)?,
                    name: row.try_get(1)?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;
        Ok(mapped)
    }

    async fn visit_labels(&self) -> Result<Vec<String>, StoreError> {
        let client = self.client("visit_labels").await?;
        let rows = client
            .query(
                "SELECT DISTINCT visit_label FROM session WHERE visit_label IS NOT NULL ORDER BY visit_label",
                &[],
            )
            .await?;
        let values = rows
            .iter()
            .map(|row| row.try_get(0))
            .collect::<Result<Vec<String>, _>>()?;
        Ok(values)
    }

    async fn languages(&self) -> Result<Vec<Language>, StoreError> {
        let client = self.client("languages").await?;
        let rows = client
            .query(
                "SELECT language_id, language_label FROM language ORDER BY language_id",
                &[],
            )
            .await?;
        let mapped = rows
            .iter()
            .map(|row| {
                Ok(Language {
                    language_id: row.try_get(0)?,
                    label: row.try_get(1)?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;
        Ok(mapped)
    }

    async fn session_join_rows(&self) -> Result<Vec<SessionJoinRow>, StoreError> {
        let client = self.client("session_join_rows").await?;
        let rows = client
            .query(
                "
                SELECT c.pscid, s.visit_label, s.center_id, f.test_name
                FROM candidate c
                JOIN session s ON s.cand_id = c.cand_id
                LEFT JOIN flag f ON f.session_id = s.id
                ORDER BY c.pscid ASC, s.id ASC
                ",
                &[],
            )
            .await?;
        let mapped = rows
            .iter()
            .map(|row| {
                Ok(SessionJoinRow {
                    pscid: row.try_get(0)?,
                    visit_label: row.try_get(1)?,
                    center_id: row.try_get(2)?,
                    test_name: row.try_get(3)?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;
        Ok(mapped)
    }

    async fn media_files(&self) -> Result<Vec<MediaFile>, StoreError> {
        let client = self.client("media_files").await?;
        let rows = client
            .query("SELECT id, file_name FROM media ORDER BY id", &[])
            .await?;
        let mapped = rows
            .iter()
            .map(|row| {
                Ok(MediaFile {
                    id: row.try_get(0)?,
                    file_name: row.try_get(1)?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;
        Ok(mapped)
    }

    async fn media_data(&self, id: i32) -> Result<Option<MediaData>, StoreError> {
        let client = self.client("media_data").await?;
        let row = client
            .query_opt(
                "
                SELECT m.id, m.session_id, c.pscid, s.visit_label, m.instrument,
                       s.center_id, m.date_taken, m.comments, m.file_name,
                       m.hide_file, m.language_id
                FROM media m
                LEFT JOIN session s ON m.session_id = s.id
                LEFT JOIN candidate c ON c.cand_id = s.cand_id
                WHERE m.id = $1
                ",
                &[&id],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(MediaData {
            id: row.try_get(0)?,
            session_id: row.try_get(1)?,
            pscid: row.try_get(2)?,
            visit_label: row.try_get(3)?,
            instrument: row.try_get(4)?,
            for_site: row.try_get(5)?,
            date_taken: row.try_get(6)?,
            comments: row.try_get(7)?,
            file_name: row.try_get(8)?,
            hide_file: row.try_get(9)?,
            language: row.try_get(10)?,
        }))
    }

    async fn resolve_session(
        &self,
        pscid: &str,
        visit_label: &str,
        center_id: i32,
    ) -> Result<Option<i32>, StoreError> {
        let client = self.client("resolve_session").await?;
        let row = client
            .query_opt(
                "
                SELECT s.id
                FROM candidate c
                JOIN session s ON s.cand_id = c.cand_id
                WHERE c.pscid = $1 AND s.visit_label = $2 AND s.center_id = $3
                ORDER BY s.id
                LIMIT 1
                ",
                &[&pscid, &visit_label, &center_id],
            )
            .await?;
        row.map(|r| r.try_get(0)).transpose().map_err(Into::into)
    }

    async fn find_media_by_file_name(&self, file_name: &str) -> Result<Option<i32>, StoreError> {
        let client = self.client("find_media_by_file_name").await?;
        let row = client
            .query_opt(
                "SELECT id FROM media WHERE file_name = $1 ORDER BY id LIMIT 1",
                &[&file_name],
            )
            .await?;
        row.map(|r| r.try_get(0)).transpose().map_err(Into::into)
    }

    async fn insert_media(&self, record: &MediaRecord) -> Result<i32, StoreError> {
        let client = self.client("insert_media").await?;
        let row = client
            .query_one(
                "
                INSERT INTO media (session_id, instrument, date_taken, comments, file_name,
                                   file_type, data_dir, uploaded_by, hide_file, date_uploaded,
                                   language_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING id
                ",
                &[
                    &record.session_id,
                    &record.instrument,
                    &record.date_taken,
                    &record.comments,
                    &record.file_name,
                    &record.file_type,
                    &record.data_dir,
                    &record.uploaded_by,
                    &record.hide_file,
                    &record.date_uploaded,
                    &record.language_id,
                ],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn overwrite_media(&self, id: i32, record: &MediaRecord) -> Result<(), StoreError> {
        let client = self.client("overwrite_media").await?;
        client
            .execute(
                "
                UPDATE media
                SET session_id = $2, instrument = $3, date_taken = $4, comments = $5,
                    file_name = $6, file_type = $7, data_dir = $8, uploaded_by = $9,
                    hide_file = $10, date_uploaded = $11, language_id = $12
                WHERE id = $1
                ",
                &[
                    &id,
                    &record.session_id,
                    &record.instrument,
                    &record.date_taken,
                    &record.comments,
                    &record.file_name,
                    &record.file_type,
                    &record.data_dir,
                    &record.uploaded_by,
                    &record.hide_file,
                    &record.date_uploaded,
                    &record.language_id,
                ],
            )
            .await?;
        Ok(())
    }

    async fn edit_media(&self, id: i32, edit: &MediaEdit) -> Result<u64, StoreError> {
        let client = self.client("edit_media").await?;
        let touched = client
            .execute(
                "UPDATE media SET date_taken = $2, comments = $3, hide_file = $4 WHERE id = $1",
                &[&id, &edit.date_taken, &edit.comments, &edit.hide_file],
            )
            .await?;
        Ok(touched)
    }
}
