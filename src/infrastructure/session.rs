//! Capabilities the sync engine needs from the directory and the file share
//!
//! Session establishment and authentication happen before these traits are
//! used; implementations surface their own failures as opaque
//! `ConnectionFailed` / `DirectoryError` / `ShareError` values.

use crate::error::AppResult;

/// Attribute access on one directory object
pub trait DirectorySession {
    /// Bind to the object at `url`. Returns false if it cannot be reached.
    fn connect(&mut self, url: &str) -> bool;

    /// Read a single-valued attribute; `None` when it is not set
    fn get_attribute(&mut self, name: &str) -> AppResult<Option<String>>;

    /// Replace an attribute only if it still holds `expected`.
    ///
    /// Returns false, without writing, when the current value differs.
    fn set_attribute(&mut self, name: &str, value: &str, expected: Option<&str>) -> AppResult<bool>;

    fn disconnect(&mut self);
}

/// Connected share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareHandle {
    pub name: String,
}

/// Open file on a share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub share: String,
    pub path: String,
}

/// Path-addressed access to a file share. Paths use `/` separators and are
/// relative to the share root.
pub trait FileShareSession {
    fn connect_share(&mut self, name: &str) -> AppResult<ShareHandle>;

    /// True for an existing file or directory
    fn path_exists(&mut self, share: &ShareHandle, path: &str) -> AppResult<bool>;

    fn create_directory(&mut self, share: &ShareHandle, path: &str) -> AppResult<()>;

    /// Open an existing file; `None` when it does not exist
    fn open_file(&mut self, share: &ShareHandle, path: &str) -> AppResult<Option<FileHandle>>;

    /// Create a new empty file
    fn create_file(&mut self, share: &ShareHandle, path: &str) -> AppResult<FileHandle>;

    fn read_file(&mut self, file: &FileHandle) -> AppResult<Vec<u8>>;

    /// Replace the file's contents
    fn write_file(&mut self, file: &FileHandle, contents: &[u8]) -> AppResult<()>;

    fn close_file(&mut self, file: FileHandle);
}
