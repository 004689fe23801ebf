//! File attachment checks.
//!
//! Files are validated locally before any transfer: size limit, extension
//! allowlist, and one attachment at a time (the latter is enforced by the
//! session controller).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::conversation::FileAttachment;
use crate::error::{EngineError, EngineResult};

/// Default upload size limit in megabytes.
pub const DEFAULT_MAX_SIZE_MB: u64 = 10;

/// Broad file categories accepted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Text,
    Document,
    Spreadsheet,
    Image,
    Code,
}

impl FileCategory {
    pub fn all() -> &'static [FileCategory] {
        &[
            FileCategory::Text,
            FileCategory::Document,
            FileCategory::Spreadsheet,
            FileCategory::Image,
            FileCategory::Code,
        ]
    }

    /// Lowercase extensions (with the dot) in this category.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileCategory::Text => &[".txt", ".md", ".json", ".csv", ".log"],
            FileCategory::Document => &[".pdf", ".docx", ".doc"],
            FileCategory::Spreadsheet => &[".xlsx", ".xls"],
            FileCategory::Image => &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"],
            FileCategory::Code => &[
                ".py", ".js", ".html", ".css", ".java", ".cpp", ".c", ".go", ".rs",
            ],
        }
    }

    /// Classifies a file name by its extension, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        let dotted = format!(".{ext}");
        Self::all()
            .iter()
            .copied()
            .find(|category| category.extensions().contains(&dotted.as_str()))
    }
}

/// Checks a file before upload.
///
/// # Errors
/// Returns a validation error for oversize files and unsupported
/// extensions.
pub fn validate(name: &str, size: u64, max_bytes: u64) -> EngineResult<FileCategory> {
    if size >= max_bytes {
        return Err(EngineError::validation(format!(
            "{name} is {} but files must be smaller than {}",
            format_size(size),
            format_size(max_bytes)
        )));
    }
    FileCategory::from_name(name).ok_or_else(|| {
        EngineError::validation(format!("Unsupported file type: {name}"))
    })
}

/// A file accepted by the backend, with its extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub name: String,
    /// Type label reported by the backend (e.g. `pdf`, `text`)
    pub kind: String,
    pub size: u64,
    pub content: String,
}

impl FileDescriptor {
    /// Descriptor stored on the user message.
    pub fn attachment(&self) -> FileAttachment {
        FileAttachment {
            name: self.name.clone(),
            kind: self.kind.clone(),
            size: self.size,
        }
    }
}

/// Formats a byte count for display (`512 B`, `1.5 KB`, `10.0 MB`).
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KB {
        format!("{bytes} B")
    } else if value < KB * KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{:.1} MB", value / (KB * KB))
    }
}
