use serde::Serialize;
use thiserror::Error;

use crate::domain::EntrySummary;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("GPO {gpo_id} does not exist at {path}")]
    TargetNotFound { gpo_id: String, path: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{document} already exists with {} entries; use --force to append", .entries.len())]
    ExistingUnconfirmed {
        document: String,
        entries: Vec<EntrySummary>,
    },

    #[error("Malformed preference document {document}: {reason}")]
    MalformedExistingDocument { document: String, reason: String },

    #[error("Invalid extension name list: {0}")]
    InvalidExtensionNames(String),

    #[error("Directory version set to {directory_version} but version file was not updated: {reason}")]
    VersionSyncPartial { directory_version: u32, reason: String },

    #[error("Attribute {attribute} was modified concurrently; retry the operation")]
    ConcurrentModification { attribute: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Directory error: {0}")]
    DirectoryError(String),

    #[error("Share error: {0}")]
    ShareError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Windows API error: {0}")]
    WindowsError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Serializable error for command results
#[derive(Debug, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    /// Whether the process should exit non-zero
    #[serde(skip)]
    pub fatal: bool,
}

impl From<AppError> for CommandError {
    fn from(err: AppError) -> Self {
        CommandError::from(&err)
    }
}

impl From<&AppError> for CommandError {
    fn from(err: &AppError) -> Self {
        let details = match err {
            AppError::ExistingUnconfirmed { entries, .. } => {
                entries.iter().map(|e| e.to_string()).collect()
            }
            _ => Vec::new(),
        };

        CommandError {
            code: err.error_code().to_string(),
            message: err.to_string(),
            details,
            fatal: err.is_fatal(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        CommandError::from(self).serialize(serializer)
    }
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::TargetNotFound { .. } => "TARGET_NOT_FOUND",
            AppError::PermissionDenied(_) => "PERMISSION_DENIED",
            AppError::ExistingUnconfirmed { .. } => "EXISTING_UNCONFIRMED",
            AppError::MalformedExistingDocument { .. } => "MALFORMED_DOCUMENT",
            AppError::InvalidExtensionNames(_) => "INVALID_EXTENSION_NAMES",
            AppError::VersionSyncPartial { .. } => "VERSION_SYNC_PARTIAL",
            AppError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            AppError::ConnectionFailed(_) => "CONNECTION_FAILED",
            AppError::DirectoryError(_) => "DIRECTORY_ERROR",
            AppError::ShareError(_) => "SHARE_ERROR",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::WindowsError(_) => "WINDOWS_ERROR",
            AppError::IoError(_) => "IO_ERROR",
            AppError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the process should exit non-zero for this error.
    ///
    /// A declined write (existing document, no force) is reported but does not
    /// fail the process.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AppError::ExistingUnconfirmed { .. })
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_unconfirmed_renders_listing() {
        let err = AppError::ExistingUnconfirmed {
            document: "Files.xml".to_string(),
            entries: vec![EntrySummary::File {
                source: "\\\\srv\\share\\a.txt".to_string(),
                destination: "C:\\a.txt".to_string(),
            }],
        };

        let cmd = CommandError::from(&err);
        assert_eq!(cmd.code, "EXISTING_UNCONFIRMED");
        assert_eq!(cmd.details.len(), 1);
        assert!(cmd.details[0].contains("C:\\a.txt"));
        assert!(!err.is_fatal());
        assert!(!cmd.fatal);
    }

    #[test]
    fn test_error_serializes_with_code() {
        let err = AppError::ConcurrentModification {
            attribute: "versionNumber".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "CONCURRENT_MODIFICATION");
        assert!(json.get("details").is_none());
        assert!(err.is_fatal());
    }
}
