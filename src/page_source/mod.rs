//! Byte-addressable page arrays over memory or file, the lowest layer in
//! the read path (cursor -> pager -> transform -> page source).

mod file;
mod memory;
mod wal;

pub use file::FileSource;
pub use memory::MemorySource;
pub use wal::WalIndex;

use crate::error::Result;

/// A source of fixed-size pages, numbered from 1.
///
/// Implementations own the byte backing of pages; callers (the pager) hold
/// only borrowed views or owned copies they made themselves.
pub trait PageSource: std::fmt::Debug {
    fn page_size(&self) -> u32;
    fn page_count(&self) -> u32;

    /// Reads page `n` (1-based). Fails if `n` is out of `1..=page_count()`.
    fn read_page(&mut self, n: u32) -> Result<Vec<u8>>;

    /// Overwrites page `n` with `bytes`, which must be exactly `page_size()`
    /// long.
    fn write_page(&mut self, n: u32, bytes: &[u8]) -> Result<()>;

    /// Grows the source by one page, returning its (new) page number.
    fn grow(&mut self) -> Result<u32>;

    /// Shrinks the source to `n` pages, discarding any pages beyond it.
    fn truncate(&mut self, n: u32) -> Result<()>;

    /// Monotonic counter bumped by every `write_page`. File-backed sources
    /// always report 0: cross-process staleness is inferred solely from
    /// the file header's change counter instead.
    fn data_version(&self) -> u64;

    /// Flushes any buffered writes to durable storage. A no-op for the
    /// in-memory source.
    fn flush(&mut self) -> Result<()>;
}
