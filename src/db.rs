//! The top-level database handle: the entry point callers use to open or
//! create a file, wiring a page source, the encryption transform, the
//! pager, and the schema catalog together.
//!
//! `Pager` owns the decoded-page cache, so `Database` only has to pick the
//! right page source and transform for the requested [`OpenOptions`] and
//! hand the pager to [`Transaction`] and [`Catalog`] as needed.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use zerocopy::AsBytes;

use crate::agents::AgentRegistry;
use crate::btree::Cursor;
use crate::config::OpenOptions;
use crate::crypto::{self, AesGcmTransform, NoopTransform, Transform};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::page_source::{FileSource, MemorySource, PageSource};
use crate::pager::{Header, Pager};
use crate::record::Value;
use crate::row::Row;
use crate::schema::Catalog;
use crate::writer::{init_empty_database, Transaction};

const DEFAULT_PAGE_SIZE: u32 = 4096;

const LEDGER_TABLE: &str = "_sharc_ledger";
const AGENTS_TABLE: &str = "_sharc_agents";

/// An open Sharc database: a [`Pager`] plus the conveniences (`catalog`,
/// `cursor`, `ledger`, `agent_registry`) built on top of it.
pub struct Database {
    pager: Pager,
}

impl Database {
    /// Opens an existing database file per `options`.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let share_mode = options.file_share_mode.unwrap_or_default();
        let cache_capacity = options.effective_page_cache_size();

        let pager = match &options.encryption {
            None => {
                let page_size = read_unencrypted_page_size(path)?;
                let source: Box<dyn PageSource> = Box::new(FileSource::open(path, page_size, share_mode)?);
                let source = preload(source, &options)?;
                Pager::open(source, Box::new(NoopTransform), cache_capacity)?
            }
            Some(encryption) => {
                let mut header_bytes = vec![0u8; crypto::HEADER_SIZE];
                File::open(path)?.read_exact(&mut header_bytes)?;
                let (encryption_header, transform) = AesGcmTransform::open(&encryption.password, &header_bytes)?;
                let storage_page_size = transform.storage_page_size(encryption_header.page_size());
                let source: Box<dyn PageSource> = Box::new(FileSource::open_at(
                    path,
                    storage_page_size,
                    share_mode,
                    crypto::HEADER_SIZE as u64,
                )?);
                let source = preload(source, &options)?;
                Pager::open(source, Box::new(transform), cache_capacity)?
            }
        };

        Ok(Self { pager })
    }

    /// Creates a brand-new, empty database file, optionally encrypted.
    /// Fails if `path` already exists.
    pub fn create(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let page_size = DEFAULT_PAGE_SIZE;
        let cache_capacity = options.effective_page_cache_size();

        let pager = match &options.encryption {
            None => {
                let source: Box<dyn PageSource> = Box::new(FileSource::create(path, page_size, &[])?);
                let pager = Pager::create(source, Box::new(NoopTransform), page_size, cache_capacity)?;
                init_empty_database(&pager)?;
                pager
            }
            Some(encryption) => {
                // `page_count` in the header is write-once metadata: the
                // reopened `FileSource` always recomputes its real page
                // count from the file length, so there is nothing to keep
                // it in sync with after commits.
                let (encryption_header, transform) = AesGcmTransform::create(&encryption.password, page_size, 0)?;
                let storage_page_size = transform.storage_page_size(page_size);
                let source: Box<dyn PageSource> =
                    Box::new(FileSource::create(path, storage_page_size, encryption_header.as_bytes())?);
                let pager = Pager::create(source, Box::new(transform), page_size, cache_capacity)?;
                init_empty_database(&pager)?;
                pager
            }
        };

        Ok(Self { pager })
    }

    /// Wraps an already-constructed pager, for callers building a page
    /// source/transform pair that doesn't fit `open`/`create` (tests, or an
    /// in-memory database with a non-default page size).
    pub fn from_pager(pager: Pager) -> Self {
        Self { pager }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn page_size(&self) -> u32 {
        self.pager.page_size()
    }

    pub fn page_count(&self) -> u32 {
        self.pager.page_count()
    }

    /// Parses the current `sqlite_schema` into a fresh [`Catalog`]. Cheap
    /// enough to call whenever the schema may have changed; callers that
    /// need to react to DDL should compare [`Pager::header`]'s schema
    /// cookie between loads.
    pub fn catalog(&self) -> Result<Catalog> {
        Catalog::load(&self.pager)
    }

    /// Opens a write transaction against this database. Only one may be
    /// open at a time; the borrow checker enforces this.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::begin(&self.pager)
    }

    /// Opens a read-only cursor over the table rooted at `root_page`.
    pub fn cursor(&self, root_page: u32) -> Result<Cursor<'_>> {
        Cursor::table(&self.pager, root_page)
    }

    /// Opens a read-only cursor over a named table, refusing `WITHOUT
    /// ROWID` tables (their index-organized btree isn't one this engine
    /// walks) rather than failing the catalog lookup that found them.
    pub fn cursor_for_table(&self, table_name: &str) -> Result<Cursor<'_>> {
        let catalog = self.catalog()?;
        let table = catalog.table(table_name).ok_or(Error::NotFound)?;
        table.require_rowid_table()?;
        self.cursor(table.root_page)
    }

    /// Opens a cursor over a named table filtered by an equality predicate
    /// on `column`. If an index covers `column` as its leading column, the
    /// cursor performs an index-seek and only visits matching rows;
    /// otherwise it falls back to a full scan and leaves applying the
    /// predicate to the caller.
    pub fn cursor_with_predicate(&self, table_name: &str, column: &str, value: &Value) -> Result<Cursor<'_>> {
        let catalog = self.catalog()?;
        let table = catalog.table(table_name).ok_or(Error::NotFound)?;
        table.require_rowid_table()?;

        let usable_index = catalog
            .indexes_on(table_name)
            .find(|index| index.columns.first().map(String::as_str) == Some(column));

        match usable_index {
            Some(index) => Cursor::index_seek(&self.pager, table.root_page, index.root_page, value),
            None => self.cursor(table.root_page),
        }
    }

    /// Decodes one row by rowid from the named table, collapsing
    /// merged-GUID columns per its [`TableDef`](crate::schema::TableDef).
    pub fn row(&self, table_name: &str, row_id: i64) -> Result<Option<Row>> {
        let catalog = self.catalog()?;
        let table = catalog.table(table_name).ok_or(Error::NotFound)?;
        table.require_rowid_table()?;
        let txn = self.begin();
        match txn.get_row(table.root_page, row_id)? {
            Some(bytes) => Ok(Some(Row::decode(table, row_id, &bytes, &self.pager)?)),
            None => Ok(None),
        }
    }

    /// Creates the reserved `_sharc_ledger` and `_sharc_agents` tables if
    /// they are not already present, returning their root pages. Callers
    /// run this once before using [`Self::ledger`]/[`Self::agent_registry`]
    /// on a fresh database.
    pub fn ensure_ledger_tables(&self) -> Result<(u32, u32)> {
        let catalog = self.catalog()?;
        if let (Some(ledger), Some(agents)) = (catalog.table(LEDGER_TABLE), catalog.table(AGENTS_TABLE)) {
            return Ok((ledger.root_page, agents.root_page));
        }

        let mut txn = self.begin();
        let ledger_root = txn.create_table(
            LEDGER_TABLE,
            "CREATE TABLE _sharc_ledger (SequenceNumber INTEGER PRIMARY KEY, Timestamp INTEGER, AgentId TEXT, Payload BLOB, PayloadHash BLOB, PreviousHash BLOB, Signature BLOB)",
        )?;
        let agents_root = txn.create_table(
            AGENTS_TABLE,
            "CREATE TABLE _sharc_agents (AgentId TEXT PRIMARY KEY, Class INTEGER, PublicKey BLOB, AuthorityCeiling INTEGER, WriteScope TEXT, ReadScope TEXT, ValidityStart INTEGER, ValidityEnd INTEGER, ParentAgent TEXT, CoSignRequired INTEGER, Signature BLOB, Algorithm INTEGER)",
        )?;
        txn.commit()?;
        Ok((ledger_root, agents_root))
    }

    /// Builds a [`Ledger`] handle from the catalog's current root pages.
    /// Fails with [`Error::NotFound`] until [`Self::ensure_ledger_tables`]
    /// has run once.
    pub fn ledger(&self) -> Result<Ledger> {
        let catalog = self.catalog()?;
        let ledger_root = catalog.table(LEDGER_TABLE).ok_or(Error::NotFound)?.root_page;
        let agents_root = catalog.table(AGENTS_TABLE).ok_or(Error::NotFound)?.root_page;
        Ok(Ledger::new(ledger_root, agents_root))
    }

    /// Builds an [`AgentRegistry`] handle from the catalog's current root
    /// page. Fails with [`Error::NotFound`] until
    /// [`Self::ensure_ledger_tables`] has run once.
    pub fn agent_registry(&self) -> Result<AgentRegistry> {
        let catalog = self.catalog()?;
        let agents_root = catalog.table(AGENTS_TABLE).ok_or(Error::NotFound)?.root_page;
        Ok(AgentRegistry::new(agents_root))
    }
}

/// Reads just enough of an unencrypted file to learn its declared page
/// size, before a [`FileSource`] (which needs the page size up front) can
/// be constructed.
fn read_unencrypted_page_size(path: &Path) -> Result<u32> {
    let mut bytes = vec![0u8; crate::pager::header::HEADER_SIZE];
    let mut file = File::open(path)?;
    file.read_exact(&mut bytes)?;
    let header = Header::read(&bytes)?;
    Ok(header.page_size())
}

fn preload(mut source: Box<dyn PageSource>, options: &OpenOptions) -> Result<Box<dyn PageSource>> {
    if !options.preload_to_memory {
        return Ok(source);
    }

    let mut memory = MemorySource::new(source.page_size());
    for n in 1..=source.page_count() {
        memory.grow()?;
        memory.write_page(n, &source.read_page(n)?)?;
    }
    Ok(Box::new(memory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{canonical_buffer, AgentInfo};
    use crate::ledger::signer::{Algorithm, HmacSigner, Signer};
    use crate::record::{self, Value};

    #[test]
    fn test_create_then_open_round_trips_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let db = Database::create(&path, OpenOptions::new()).unwrap();
            let mut txn = db.begin();
            let root = txn.create_table("widgets", "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
            txn.insert_row(root, 1, &record::encode(&[Value::Int64(1), Value::Text("sprocket".to_owned())])).unwrap();
            txn.commit().unwrap();
        }

        let db = Database::open(&path, OpenOptions::new()).unwrap();
        let row = db.row("widgets", 1).unwrap().unwrap();
        assert_eq!(row.get_text(1).unwrap(), Some("sprocket"));
    }

    #[test]
    fn test_encrypted_round_trip_then_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let options = OpenOptions::new().encryption("correct-horse-battery-staple");
        {
            let db = Database::create(&path, options.clone()).unwrap();
            let mut txn = db.begin();
            let root = txn
                .create_table("widgets", "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT, price REAL, tag BLOB)")
                .unwrap();
            txn.insert_row(
                root,
                1,
                &record::encode(&[
                    Value::Int64(1),
                    Value::Text("Widget".to_owned()),
                    Value::Double(9.99),
                    Value::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF]),
                ]),
            )
            .unwrap();
            txn.commit().unwrap();
        }

        let db = Database::open(&path, options).unwrap();
        let row = db.row("widgets", 1).unwrap().unwrap();
        assert_eq!(row.get_text(1).unwrap(), Some("Widget"));
        assert_eq!(row.get_double(2).unwrap(), Some(9.99));
        assert_eq!(row.get_blob(3).unwrap(), Some([0xDEu8, 0xAD, 0xBE, 0xEF].as_slice()));

        let wrong = OpenOptions::new().encryption("wrong-password");
        assert!(matches!(Database::open(&path, wrong), Err(Error::BadCredentials)));
    }

    #[test]
    fn test_ledger_round_trip_through_database_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let db = Database::create(&path, OpenOptions::new()).unwrap();
        db.ensure_ledger_tables().unwrap();

        let signer = HmacSigner::new(b"agent-secret".to_vec());
        let mut info = AgentInfo {
            agent_id: "agent-1".to_owned(),
            class: 1,
            public_key: signer.public_key(),
            authority_ceiling: 10,
            write_scope: "*".to_owned(),
            read_scope: "*".to_owned(),
            validity_start: 0,
            validity_end: i64::MAX,
            parent_agent: None,
            co_sign_required: false,
            signature: Vec::new(),
            algorithm: Algorithm::Hmac,
        };
        info.signature = signer.sign(&canonical_buffer(&info));

        {
            let mut txn = db.begin();
            db.agent_registry().unwrap().register_agent(&mut txn, info).unwrap();
            let ledger = db.ledger().unwrap();
            ledger.append(&mut txn, "agent-1", 1000, b"first entry", &signer).unwrap();
            txn.commit().unwrap();
        }

        let txn = db.begin();
        assert!(db.ledger().unwrap().verify_integrity(&txn).unwrap());
    }

    #[test]
    fn test_preload_to_memory_still_reads_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let db = Database::create(&path, OpenOptions::new()).unwrap();
            let mut txn = db.begin();
            let root = txn.create_table("t", "CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
            txn.insert_row(root, 1, &record::encode(&[Value::Int64(1)])).unwrap();
            txn.commit().unwrap();
        }

        let db = Database::open(&path, OpenOptions::new().preload_to_memory(true)).unwrap();
        assert!(db.row("t", 1).unwrap().is_some());
    }
}
