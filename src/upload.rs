use anyhow::Context;
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::{ApiError, ServiceResult};
use crate::{log_service_error, log_service_success};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const GENERAL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "pdf", "doc", "docx"];
const MB: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Question,
    Avatar,
    General,
}

impl UploadKind {
    pub const ALL: [UploadKind; 3] = [UploadKind::Question, UploadKind::Avatar, UploadKind::General];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "question" => Some(UploadKind::Question),
            "avatar" => Some(UploadKind::Avatar),
            "general" => Some(UploadKind::General),
            _ => None,
        }
    }

    pub fn folder(&self) -> &'static str {
        match self {
            UploadKind::Question => "questions",
            UploadKind::Avatar => "avatars",
            UploadKind::General => "general",
        }
    }

    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            UploadKind::Question | UploadKind::Avatar => IMAGE_EXTENSIONS,
            UploadKind::General => GENERAL_EXTENSIONS,
        }
    }

    pub fn max_size(&self) -> usize {
        match self {
            UploadKind::Question => 5 * MB,
            UploadKind::Avatar => 2 * MB,
            UploadKind::General => 10 * MB,
        }
    }
}

/// Strips path components and keeps `[A-Za-z0-9._-]`; whitespace becomes `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Lower-cased extension of the sanitized filename, if it has one.
pub fn file_extension(filename: &str) -> Option<String> {
    let safe = sanitize_filename(filename);
    let (_, ext) = safe.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub url: String,
    pub path: PathBuf,
}

/// Writes uploads under `<root>/<folder>/<YYYY>/<MM>/<DD>/<uuid>.<ext>`.
#[derive(Clone)]
pub struct UploadStore {
    root: PathBuf,
    url_prefix: String,
}

impl UploadStore {
    /// `url_prefix` is the public path the static file service exposes `root` under.
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        for kind in UploadKind::ALL {
            let dir = self.root.join(kind.folder());
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating upload directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Returns the lower-cased extension when the file is acceptable for `kind`.
    pub fn validate(kind: UploadKind, filename: &str, size: usize) -> ServiceResult<String> {
        let ext = file_extension(filename)
            .filter(|ext| kind.allowed_extensions().contains(&ext.as_str()))
            .ok_or_else(|| {
                ApiError::ValidationError(format!(
                    "Unsupported file format, allowed: {}",
                    kind.allowed_extensions().join(", ")
                ))
            })?;

        if size > kind.max_size() {
            return Err(ApiError::ValidationError(format!(
                "File size cannot exceed {}MB",
                kind.max_size() / MB
            )));
        }
        Ok(ext)
    }

    pub async fn save(&self, kind: UploadKind, filename: &str, bytes: &[u8]) -> ServiceResult<StoredFile> {
        let ext = Self::validate(kind, filename, bytes.len())?;

        let date_path = Utc::now().format("%Y/%m/%d").to_string();
        let dir = self.root.join(kind.folder()).join(&date_path);
        let stored_name = format!("{}.{}", Uuid::new_v4().simple(), ext);
        let path = dir.join(&stored_name);

        let write = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, bytes).await
        };
        if let Err(e) = write.await {
            log_service_error!("upload", "save_file", error = e);
            return Err(ApiError::InternalError(format!("failed to store upload: {}", e)));
        }

        let url = format!("{}/{}/{}/{}", self.url_prefix, kind.folder(), date_path, stored_name);
        log_service_success!("upload", "save_file", &url);
        Ok(StoredFile { url, path })
    }
}
