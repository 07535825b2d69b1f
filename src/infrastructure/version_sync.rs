//! Keeps the directory `versionNumber` and the share's version file in step

use serde::Serialize;

use super::session::{DirectorySession, FileShareSession, ShareHandle};
use crate::domain::{advance, read_file_version, rewrite_version_file, GpoScope, VERSION_ATTRIBUTE};
use crate::error::{AppError, AppResult};

/// Outcome of a successful commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCommit {
    pub version: u32,
    /// Value the version file held before the rewrite
    pub previous_file_version: Option<u32>,
}

/// Writes a new policy version to both stores of one GPO
pub struct VersionSynchronizer {
    version_path: String,
}

impl VersionSynchronizer {
    /// `gpo_path` is the share-relative GPO folder
    pub fn new(gpo_path: &str, version_file: &str) -> Self {
        Self {
            version_path: format!("{}/{}", gpo_path, version_file),
        }
    }

    pub fn version_path(&self) -> &str {
        &self.version_path
    }

    /// Next version for an update to `scope`
    pub fn advance(current: u32, scope: GpoScope) -> AppResult<u32> {
        advance(current, scope)
    }

    /// Write `version` to the directory, then to the version file.
    ///
    /// The directory write only happens if `versionNumber` still holds
    /// `previous`. When the file cannot be updated afterwards the directory
    /// is left ahead and `VersionSyncPartial` is returned.
    pub fn commit(
        &self,
        directory: &mut dyn DirectorySession,
        share: &mut dyn FileShareSession,
        handle: &ShareHandle,
        previous: Option<&str>,
        version: u32,
    ) -> AppResult<VersionCommit> {
        let new_value = version.to_string();
        if !directory.set_attribute(VERSION_ATTRIBUTE, &new_value, previous)? {
            return Err(AppError::ConcurrentModification {
                attribute: VERSION_ATTRIBUTE.to_string(),
            });
        }

        tracing::info!(
            attribute = VERSION_ATTRIBUTE,
            previous = ?previous,
            version = version,
            "Directory version updated"
        );

        match self.rewrite_file(share, handle, version) {
            Ok(previous_file_version) => {
                tracing::info!(
                    path = %self.version_path,
                    previous = ?previous_file_version,
                    version = version,
                    "Version file updated"
                );
                Ok(VersionCommit {
                    version,
                    previous_file_version,
                })
            }
            Err(e) => {
                tracing::error!(
                    path = %self.version_path,
                    version = version,
                    error = %e,
                    "Version file not updated after directory write"
                );
                Err(AppError::VersionSyncPartial {
                    directory_version: version,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn rewrite_file(
        &self,
        share: &mut dyn FileShareSession,
        handle: &ShareHandle,
        version: u32,
    ) -> AppResult<Option<u32>> {
        let file = share.open_file(handle, &self.version_path)?.ok_or_else(|| {
            AppError::ShareError(format!("{} does not exist", self.version_path))
        })?;

        let result = share.read_file(&file).and_then(|contents| {
            let rewritten = rewrite_version_file(&contents, version)?;
            share.write_file(&file, &rewritten)?;
            Ok(read_file_version(&contents))
        });

        share.close_file(file);
        result
    }
}
