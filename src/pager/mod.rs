//! Caches decoded pages and mediates reads/writes between cursors and the
//! page source via the encryption transform.

pub mod cache;
pub mod freelist;
pub mod header;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, trace};

use zerocopy::AsBytes;

use crate::crypto::Transform;
use crate::error::{Error, Result};
use crate::page_source::PageSource;

use self::cache::PageCache;
pub use self::header::Header;

/// Mediates reads between cursors and the underlying (transform ->) page
/// source, and owns the decoded-page cache and the committed file header.
///
/// The cache is the one process-wide shared mutable structure; everything
/// else belongs to a single handle.
pub struct Pager {
    source: RefCell<Box<dyn PageSource>>,
    transform: Box<dyn Transform>,
    page_size: u32,
    cache: RefCell<PageCache>,
    header: RefCell<Header>,
    /// Bumped on every committed write, independent of the page source's
    /// own `data_version` (which file-backed sources always report as 0).
    local_data_version: Cell<u64>,
}

impl Pager {
    /// Opens a pager against an existing, already-populated page source
    /// whose page 1 holds a valid file header.
    ///
    /// `source.page_size()` is the physical per-slot width the source
    /// stores (wider than the logical page size when `transform` widens
    /// pages, e.g. [`crate::crypto::AesGcmTransform`]); the logical page
    /// size the rest of the pager operates on comes from the decoded
    /// header itself.
    pub fn open(mut source: Box<dyn PageSource>, transform: Box<dyn Transform>, cache_capacity: usize) -> Result<Self> {
        let page_one = source.read_page(1)?;
        let plaintext = transform.transform_read(1, &page_one)?;
        let header = Header::read(&plaintext)?;
        let page_size = header.page_size();

        if transform.storage_page_size(page_size) != source.page_size() {
            return Err(Error::corrupt("header page size disagrees with the source page size"));
        }

        let pager = Self {
            source: RefCell::new(source),
            transform,
            page_size,
            cache: RefCell::new(PageCache::new(cache_capacity)),
            header: RefCell::new(header),
            local_data_version: Cell::new(0),
        };
        pager.cache.borrow_mut().insert(1, Rc::from(plaintext));
        Ok(pager)
    }

    /// Creates a pager around a brand-new, empty page source: allocates
    /// page 1, writes a default header, and returns the pager with a
    /// single-page, still-uncommitted-to-disk database. Callers normally
    /// follow this with a transaction that creates `sqlite_schema`.
    ///
    /// `page_size` is the logical page size; the source is expected to
    /// already be set up to store `transform.storage_page_size(page_size)`
    /// bytes per page (true by construction for [`crate::crypto::NoopTransform`],
    /// where the two sizes coincide).
    pub fn create(mut source: Box<dyn PageSource>, transform: Box<dyn Transform>, page_size: u32, cache_capacity: usize) -> Result<Self> {
        let page_number = source.grow()?;
        debug_assert_eq!(page_number, 1);

        let mut header = Header::default();
        header.set_page_size(page_size);
        header.set_database_size(1);

        let mut page_one = vec![0u8; page_size as usize];
        page_one[..header::HEADER_SIZE].copy_from_slice(header.as_bytes());
        let ciphertext = transform.transform_write(1, &page_one)?;
        source.write_page(1, &ciphertext)?;

        let pager = Self {
            source: RefCell::new(source),
            transform,
            page_size,
            cache: RefCell::new(PageCache::new(cache_capacity)),
            header: RefCell::new(header),
            local_data_version: Cell::new(0),
        };
        pager.cache.borrow_mut().insert(1, Rc::from(page_one));
        Ok(pager)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.header.borrow().database_size()
    }

    pub fn header(&self) -> Header {
        *self.header.borrow()
    }

    /// Monotonic counter used by cursors to detect staleness. Strictly
    /// increases across committed writes.
    pub fn data_version(&self) -> u64 {
        self.local_data_version.get()
    }

    /// Returns a read-only, reference-counted view of page `n`, reading
    /// through the transform and page source on a cache miss.
    pub fn get(&self, n: u32) -> Result<Rc<[u8]>> {
        if !(1..=self.page_count()).contains(&n) {
            return Err(Error::invalid_argument(format!("page {n} out of bounds")));
        }

        if let Some(page) = self.cache.borrow_mut().get(n) {
            trace!(page = n, "pager cache hit");
            return Ok(page);
        }

        debug!(page = n, "pager cache miss");
        let ciphertext = self.source.borrow_mut().read_page(n)?;
        let plaintext = self.transform.transform_read(n, &ciphertext)?;
        let page: Rc<[u8]> = Rc::from(plaintext);
        self.cache.borrow_mut().insert(n, page.clone());
        Ok(page)
    }

    /// Called by the writer at commit time: flushes `dirty` pages in page
    /// order, then writes the updated header last so that the change
    /// counter advances atomically with content.
    pub(crate) fn commit_pages(
        &self,
        dirty: Vec<(u32, Vec<u8>)>,
        new_page_count: u32,
        mut header: Header,
    ) -> Result<()> {
        let mut source = self.source.borrow_mut();

        while source.page_count() < new_page_count {
            source.grow()?;
        }
        if new_page_count < source.page_count() {
            source.truncate(new_page_count)?;
        }

        for (page_number, bytes) in &dirty {
            let ciphertext = self.transform.transform_write(*page_number, bytes)?;
            source.write_page(*page_number, &ciphertext)?;
        }

        header.set_database_size(new_page_count);
        header.bump_file_change_counter();

        let mut page_one = if new_page_count >= 1 {
            match dirty.iter().find(|(n, _)| *n == 1) {
                Some((_, bytes)) => bytes.clone(),
                None => {
                    let cached = self.cache.borrow_mut().get(1);
                    match cached {
                        Some(bytes) => bytes.to_vec(),
                        None => {
                            let ciphertext = source.read_page(1)?;
                            self.transform.transform_read(1, &ciphertext)?
                        }
                    }
                }
            }
        } else {
            vec![0u8; self.page_size as usize]
        };
        page_one[..header::HEADER_SIZE].copy_from_slice(header.as_bytes());
        let ciphertext = self.transform.transform_write(1, &page_one)?;
        source.write_page(1, &ciphertext)?;
        source.flush()?;

        drop(source);

        let mut cache = self.cache.borrow_mut();
        cache.clear();
        cache.insert(1, Rc::from(page_one));
        for (page_number, bytes) in dirty {
            if page_number != 1 {
                cache.insert(page_number, Rc::from(bytes));
            }
        }

        *self.header.borrow_mut() = header;
        self.local_data_version.set(self.local_data_version.get() + 1);

        Ok(())
    }

    pub(crate) fn invalidate(&self, page_number: u32) {
        self.cache.borrow_mut().invalidate(page_number);
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count())
            .field("data_version", &self.data_version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoopTransform;
    use crate::page_source::MemorySource;

    #[test]
    fn test_create_and_reopen() {
        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 10).unwrap();
        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.page_size(), 512);
    }

    #[test]
    fn test_get_out_of_bounds() {
        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 10).unwrap();
        assert!(pager.get(2).is_err());
    }
}
