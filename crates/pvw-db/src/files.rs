//! Uploaded file repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use pvw_core::{Error, FileRepository, FileStatus, NewUploadedFile, Result, UploadedFile};

const FILE_COLUMNS: &str = "id, filename, stored_path, size_bytes, mime_type, kind, uploader, \
                            status, created_at, updated_at";

/// PostgreSQL implementation of FileRepository.
#[derive(Clone)]
pub struct PgFileRepository {
    pool: Pool<Postgres>,
}

impl PgFileRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_file_row(row: PgRow) -> Result<UploadedFile> {
        Ok(UploadedFile {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            stored_path: row.try_get("stored_path")?,
            size_bytes: row.try_get("size_bytes")?,
            mime_type: row.try_get("mime_type")?,
            kind: row.try_get::<String, _>("kind")?.parse()?,
            uploader: row.try_get("uploader")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl FileRepository for PgFileRepository {
    async fn insert(&self, file: NewUploadedFile) -> Result<UploadedFile> {
        let row = sqlx::query(&format!(
            "INSERT INTO uploaded_file (id, filename, stored_path, size_bytes, mime_type, kind, uploader, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'uploaded')
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.id)
        .bind(&file.filename)
        .bind(&file.stored_path)
        .bind(file.size_bytes)
        .bind(&file.mime_type)
        .bind(file.kind.as_str())
        .bind(&file.uploader)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_file_row(row)
    }

    async fn get(&self, file_id: Uuid) -> Result<Option<UploadedFile>> {
        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM uploaded_file WHERE id = $1"
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_file_row).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<UploadedFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM uploaded_file
             WHERE status <> 'deleted'
             ORDER BY created_at DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_file_row).collect()
    }

    async fn update_status(&self, file_id: Uuid, status: FileStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE uploaded_file SET status = $1, updated_at = $2
             WHERE id = $3 AND status <> 'deleted'",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::FileNotFound(file_id));
        }
        Ok(())
    }

    async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadedFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM uploaded_file
             WHERE created_at < $1 AND status <> 'deleted'
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_file_row).collect()
    }

    async fn mark_deleted(&self, file_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE uploaded_file SET status = 'deleted', updated_at = $1
             WHERE id = $2 AND status <> 'deleted'",
        )
        .bind(Utc::now())
        .bind(file_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
