//! Upload persistence: validate, write `<upload_dir>/<id>.<ext>`, record.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use pvw_core::{
    detect_content_type, sanitize_filename, validate_upload, FileKind, FileRepository,
    NewUploadedFile, Result, UploadConfig, UploadedFile,
};

/// Where an upload with `id` and `kind` is stored.
pub fn stored_path(config: &UploadConfig, id: Uuid, kind: FileKind) -> PathBuf {
    config.upload_dir.join(format!("{}.{}", id, kind))
}

/// Write `data` to `path`, returning the number of bytes on disk.
async fn write_file(path: &Path, data: &[u8]) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(file.metadata().await?.len())
}

/// Validate and store an upload, then insert its record.
///
/// Nothing touches disk or the database when validation fails. If the
/// insert fails the written file is removed again.
pub async fn store_upload<R: FileRepository + ?Sized>(
    files: &R,
    config: &UploadConfig,
    filename: Option<&str>,
    uploader: Option<String>,
    data: &[u8],
) -> Result<UploadedFile> {
    let kind = validate_upload(filename, data, config)?;
    let filename = sanitize_filename(filename.unwrap_or_default());

    let id = pvw_core::new_v7();
    let path = stored_path(config, id, kind);
    let size_bytes = write_file(&path, data).await?;

    let record = NewUploadedFile {
        id,
        filename,
        stored_path: path.to_string_lossy().into_owned(),
        size_bytes: size_bytes as i64,
        mime_type: detect_content_type(kind, data),
        kind,
        uploader,
    };

    match files.insert(record).await {
        Ok(file) => {
            info!(
                subsystem = "api",
                component = "uploads",
                file_id = %file.id,
                filename = %file.filename,
                size_bytes = file.size_bytes,
                kind = %kind,
                "File uploaded"
            );
            Ok(file)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(error = %rm, path = %path.display(), "Failed to remove orphaned upload");
            }
            Err(e)
        }
    }
}

/// Remove a stored upload from disk; a missing file is not an error.
pub async fn remove_upload(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use pvw_core::{Error, FileStatus};

    /// In-memory file records.
    #[derive(Default)]
    struct MemoryFiles {
        files: Mutex<Vec<UploadedFile>>,
        fail_insert: bool,
    }

    #[async_trait]
    impl FileRepository for MemoryFiles {
        async fn insert(&self, file: NewUploadedFile) -> Result<UploadedFile> {
            if self.fail_insert {
                return Err(Error::Internal("insert failed".into()));
            }
            let now = Utc::now();
            let record = UploadedFile {
                id: file.id,
                filename: file.filename,
                stored_path: file.stored_path,
                size_bytes: file.size_bytes,
                mime_type: file.mime_type,
                kind: file.kind,
                uploader: file.uploader,
                status: FileStatus::Uploaded,
                created_at: now,
                updated_at: now,
            };
            self.files.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn get(&self, file_id: Uuid) -> Result<Option<UploadedFile>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .find(|f| f.id == file_id)
                .cloned())
        }

        async fn list(&self, _limit: i64, _offset: i64) -> Result<Vec<UploadedFile>> {
            Ok(self.files.lock().unwrap().clone())
        }

        async fn update_status(&self, _file_id: Uuid, _status: FileStatus) -> Result<()> {
            Ok(())
        }

        async fn list_expired(&self, _cutoff: DateTime<Utc>) -> Result<Vec<UploadedFile>> {
            Ok(Vec::new())
        }

        async fn mark_deleted(&self, _file_id: Uuid) -> Result<bool> {
            Ok(true)
        }
    }

    fn config(dir: &tempfile::TempDir) -> UploadConfig {
        UploadConfig::default().with_upload_dir(dir.path())
    }

    #[tokio::test]
    async fn test_size_matches_bytes_written() {
        let dir = tempfile::tempdir().unwrap();
        let files = MemoryFiles::default();
        let data = b"id,name\n1,orders\n2,customers\n";

        let file = store_upload(&files, &config(&dir), Some("tables.csv"), None, data)
            .await
            .unwrap();

        assert_eq!(file.size_bytes, data.len() as i64);
        assert_eq!(file.kind, FileKind::Csv);
        assert_eq!(file.filename, "tables.csv");
        let on_disk = std::fs::read(&file.stored_path).unwrap();
        assert_eq!(on_disk, data);
        assert!(file.stored_path.ends_with(&format!("{}.csv", file.id)));
    }

    #[tokio::test]
    async fn test_rejections_persist_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let files = MemoryFiles::default();
        let cfg = config(&dir).with_max_bytes(FileKind::Txt, 4);

        let cases: [(Option<&str>, &[u8]); 4] = [
            (None, b"data"),
            (Some("payload.exe"), b"data"),
            (Some("empty.csv"), b""),
            (Some("big.txt"), b"too large"),
        ];
        for (name, data) in cases {
            let err = store_upload(&files, &cfg, name, None, data)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{:?}", name);
        }

        assert!(files.files.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_insert_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = MemoryFiles {
            fail_insert: true,
            ..Default::default()
        };

        let result = store_upload(&files, &config(&dir), Some("a.json"), None, b"[]").await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_filename_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let files = MemoryFiles::default();

        let file = store_upload(
            &files,
            &config(&dir),
            Some("../../etc/report.txt"),
            Some("ana".into()),
            b"hello",
        )
        .await
        .unwrap();
        assert_eq!(file.filename, "report.txt");
        assert_eq!(file.uploader.as_deref(), Some("ana"));
    }
}
