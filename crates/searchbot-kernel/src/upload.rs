use std::fmt;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".txt", ".rtf", ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".mp3",
    ".wav", ".ogg", ".m4a", ".csv", ".xlsx", ".xls", ".md", ".html", ".xml", ".json",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    TooLarge { size_bytes: u64, limit_bytes: u64 },
    UnsupportedType { extension: Option<String> },
}

impl fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadRejection::TooLarge {
                size_bytes,
                limit_bytes,
            } => write!(
                f,
                "File too large ({:.1} MB). Maximum allowed size is {} MB.",
                *size_bytes as f64 / MIB as f64,
                limit_bytes / MIB
            ),
            UploadRejection::UnsupportedType { extension } => match extension {
                Some(ext) => write!(
                    f,
                    "Unsupported file type {ext}. Supported types: {}",
                    SUPPORTED_EXTENSIONS.join(" ")
                ),
                None => write!(
                    f,
                    "Files without an extension are not supported. Supported types: {}",
                    SUPPORTED_EXTENSIONS.join(" ")
                ),
            },
        }
    }
}

const MIB: u64 = 1024 * 1024;

pub fn limit_bytes(max_file_size_mb: u64) -> u64 {
    max_file_size_mb.saturating_mul(MIB)
}

/// Lowercased extension including the dot, or `None` when the name has none.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Size is checked before type so oversized files are always reported as such.
pub fn validate_upload(
    file_name: &str,
    size_bytes: u64,
    max_file_size_mb: u64,
) -> Result<(), UploadRejection> {
    let limit = limit_bytes(max_file_size_mb);
    if size_bytes > limit {
        return Err(UploadRejection::TooLarge {
            size_bytes,
            limit_bytes: limit,
        });
    }
    let extension = file_extension(file_name);
    match extension.as_deref() {
        Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext) => Ok(()),
        _ => Err(UploadRejection::UnsupportedType { extension }),
    }
}
