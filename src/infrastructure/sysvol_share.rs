//! File share access through the local filesystem
//!
//! Works against a UNC root on Windows (`\\dc01`, share `SYSVOL`) or a
//! mounted copy of the share elsewhere (`/mnt/dc01`, share `SYSVOL`).

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::session::{FileHandle, FileShareSession, ShareHandle};
use crate::error::{AppError, AppResult};

/// Filesystem-backed share session
pub struct SysvolShare {
    root: PathBuf,
}

impl SysvolShare {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root for a domain controller: its UNC host on Windows
    pub fn for_server(server: &str) -> Self {
        Self::new(format!("\\\\{}", server))
    }

    fn resolve(&self, share: &str, path: &str) -> AppResult<PathBuf> {
        let mut full = self.root.join(share);
        for part in path.split(['/', '\\']).filter(|p| !p.is_empty()) {
            if !matches!(Path::new(part).components().next(), Some(Component::Normal(_))) {
                return Err(AppError::ShareError(format!(
                    "path component '{}' escapes the share",
                    part
                )));
            }
            full.push(part);
        }
        Ok(full)
    }
}

fn io_error(err: std::io::Error, action: &str, path: &Path) -> AppError {
    match err.kind() {
        ErrorKind::PermissionDenied => {
            AppError::PermissionDenied(format!("cannot {} {}: {}", action, path.display(), err))
        }
        _ => AppError::ShareError(format!("cannot {} {}: {}", action, path.display(), err)),
    }
}

impl FileShareSession for SysvolShare {
    fn connect_share(&mut self, name: &str) -> AppResult<ShareHandle> {
        let share_root = self.root.join(name);
        if !share_root.is_dir() {
            tracing::error!(share = %share_root.display(), "Share not reachable");
            return Err(AppError::ConnectionFailed(format!(
                "share {} is not reachable",
                share_root.display()
            )));
        }

        tracing::debug!(share = %share_root.display(), "Connected to share");
        Ok(ShareHandle {
            name: name.to_string(),
        })
    }

    fn path_exists(&mut self, share: &ShareHandle, path: &str) -> AppResult<bool> {
        let full = self.resolve(&share.name, path)?;
        full.try_exists().map_err(|e| io_error(e, "inspect", &full))
    }

    fn create_directory(&mut self, share: &ShareHandle, path: &str) -> AppResult<()> {
        let full = self.resolve(&share.name, path)?;
        fs::create_dir(&full).map_err(|e| io_error(e, "create directory", &full))
    }

    fn open_file(&mut self, share: &ShareHandle, path: &str) -> AppResult<Option<FileHandle>> {
        let full = self.resolve(&share.name, path)?;
        match fs::metadata(&full) {
            Ok(meta) if meta.is_file() => Ok(Some(FileHandle {
                share: share.name.clone(),
                path: path.to_string(),
            })),
            Ok(_) => Err(AppError::ShareError(format!(
                "{} is not a file",
                full.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e, "open", &full)),
        }
    }

    fn create_file(&mut self, share: &ShareHandle, path: &str) -> AppResult<FileHandle> {
        let full = self.resolve(&share.name, path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .map_err(|e| io_error(e, "create", &full))?;

        Ok(FileHandle {
            share: share.name.clone(),
            path: path.to_string(),
        })
    }

    fn read_file(&mut self, file: &FileHandle) -> AppResult<Vec<u8>> {
        let full = self.resolve(&file.share, &file.path)?;
        fs::read(&full).map_err(|e| io_error(e, "read", &full))
    }

    fn write_file(&mut self, file: &FileHandle, contents: &[u8]) -> AppResult<()> {
        let full = self.resolve(&file.share, &file.path)?;
        fs::write(&full, contents).map_err(|e| io_error(e, "write", &full))
    }

    fn close_file(&mut self, _file: FileHandle) {}
}
