//! Multipart intake: picks the `file` part, checks its type and writes it to the staging
//! directory.

use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use axum::extract::{multipart::Field, Multipart};
use tokio::{fs, io::AsyncWriteExt};

use super::error::ApiError;
use crate::ingest::StagedUpload;

pub const FILE_FIELD: &str = "file";

pub const ALLOWED_MIME_TYPES: [&str; 3] = [
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
    "text/csv",
];

static NEXT_UPLOAD: AtomicU64 = AtomicU64::new(1);

pub fn is_allowed_mime(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .map(|m| ALLOWED_MIME_TYPES.contains(&m.essence_str()))
        .unwrap_or(false)
}

fn extension_for_mime(essence: &str) -> Option<&'static str> {
    match essence {
        "text/csv" => Some("csv"),
        "application/vnd.ms-excel" => Some("xls"),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some("xlsx"),
        _ => None,
    }
}

/// `<unix-millis>-<seq><ext>`. The extension comes from the client's file name, or from the
/// MIME type when the name has none; workbook readers pick their format by it.
fn staged_file_name(original: Option<&str>, content_type: Option<&str>) -> String {
    let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let seq = NEXT_UPLOAD.fetch_add(1, Ordering::Relaxed);
    let ext = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
        .or_else(|| {
            content_type
                .and_then(|ct| ct.parse::<mime::Mime>().ok())
                .and_then(|m| extension_for_mime(m.essence_str()))
                .map(str::to_string)
        })
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!("{millis}-{seq}{ext}")
}

/// Stage the `file` part of `multipart` under `temp_dir`.
///
/// Other parts are ignored. Nothing is written unless the part's MIME type is allowed.
pub async fn stage_upload(mut multipart: Multipart, temp_dir: &Path) -> Result<StagedUpload, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        if !is_allowed_mime(field.content_type()) {
            metrics::counter!("http_uploads_rejected_total", "reason" => "mimetype").increment(1);
            tracing::warn!(content_type = ?field.content_type(), "upload rejected: mime type not allowed");
            return Err(ApiError::InvalidMimeType);
        }

        fs::create_dir_all(temp_dir).await?;
        let path = temp_dir.join(staged_file_name(field.file_name(), field.content_type()));

        return match write_field(field, &path).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), bytes, "upload staged");
                Ok(StagedUpload::temporary(path))
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path).await {
                    tracing::warn!(error = %rm, path = %path.display(), "failed to remove partial upload");
                }
                Err(e)
            }
        };
    }

    metrics::counter!("http_uploads_rejected_total", "reason" => "missing_file").increment(1);
    Err(ApiError::FileNotProvided)
}

async fn write_field(mut field: Field<'_>, path: &Path) -> Result<u64, ApiError> {
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_allow_list() {
        assert!(is_allowed_mime(Some("text/csv")));
        assert!(is_allowed_mime(Some("text/csv; charset=utf-8")));
        assert!(is_allowed_mime(Some("application/vnd.ms-excel")));
        assert!(is_allowed_mime(Some(
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        )));
        assert!(!is_allowed_mime(Some("application/json")));
        assert!(!is_allowed_mime(Some("not a mime type")));
        assert!(!is_allowed_mime(None));
    }

    #[test]
    fn staged_names_keep_the_extension_and_are_unique() {
        let a = staged_file_name(Some("depths.csv"), Some("text/csv"));
        let b = staged_file_name(Some("depths.csv"), Some("text/csv"));
        assert!(a.ends_with(".csv"));
        assert_ne!(a, b);

        let bare = staged_file_name(Some("../../etc/passwd"), None);
        assert!(!bare.contains('/'));
        assert!(!staged_file_name(None, None).contains('.'));
    }

    #[test]
    fn falls_back_to_the_mime_type_for_the_extension() {
        let name = staged_file_name(
            Some("plants"),
            Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        );
        assert!(name.ends_with(".xlsx"));
        assert!(staged_file_name(None, Some("application/vnd.ms-excel")).ends_with(".xls"));
    }
}
