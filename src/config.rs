//! Options accepted when opening a database handle.

use serde::Deserialize;

/// OS-level locking regime requested when opening a file-backed page
/// source. Sharc does not implement SQLite's WAL/shared-memory write
/// protocol itself; this only governs the advisory lock taken on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FileShareMode {
    Read,
    ReadWrite,
}

impl Default for FileShareMode {
    fn default() -> Self {
        FileShareMode::Read
    }
}

/// Password-based whole-file encryption options.
#[derive(Clone, Deserialize)]
pub struct EncryptionOptions {
    pub password: String,
}

impl std::fmt::Debug for EncryptionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionOptions")
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenOptions {
    /// Whether a write transaction may be opened against this handle.
    pub writable: bool,
    /// Read the whole file into memory on open and run the pager against
    /// an in-memory source from then on.
    pub preload_to_memory: bool,
    /// Bound on the number of decoded pages the pager keeps cached.
    pub page_cache_size: Option<usize>,
    /// OS-level share mode to request when opening a file-backed source.
    pub file_share_mode: Option<FileShareMode>,
    /// Per-page authenticated encryption, if the file is encrypted.
    pub encryption: Option<EncryptionOptions>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn preload_to_memory(mut self, preload: bool) -> Self {
        self.preload_to_memory = preload;
        self
    }

    pub fn page_cache_size(mut self, size: usize) -> Self {
        self.page_cache_size = Some(size);
        self
    }

    pub fn file_share_mode(mut self, mode: FileShareMode) -> Self {
        self.file_share_mode = Some(mode);
        self
    }

    pub fn encryption(mut self, password: impl Into<String>) -> Self {
        self.encryption = Some(EncryptionOptions {
            password: password.into(),
        });
        self
    }

    pub fn effective_page_cache_size(&self) -> usize {
        self.page_cache_size.unwrap_or(2000)
    }
}
