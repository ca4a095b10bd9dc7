//! The write-path transaction: B-tree mutation, page allocation, and
//! commit/rollback.
//!
//! A `Transaction` holds mutated pages in a `BTreeMap<u32, Box<[u8]>>` and
//! only touches the page source at `commit`.
//!
//! Because nothing reaches the page source until `commit` calls
//! `Pager::commit_pages`, the dirty-page map doubles as the journal: a
//! dropped or explicitly rolled-back transaction has made no change
//! anywhere the pager or its page source can observe, so there is no
//! journal to replay. This is recorded as a simplification in
//! `DESIGN.md`.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, trace};
use zerocopy::big_endian::U32;
use zerocopy::FromBytes;

use crate::btree::build::{self, CellBytes};
use crate::btree::{local_limits, Page, PageType, Payload};
use crate::error::{Error, Result};
use crate::pager::freelist;
use crate::pager::{Header, Pager};
use crate::record::{self, Record, Value};
use crate::schema::SQLITE_SCHEMA_ROOT_PAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Open,
    Committed,
    RolledBack,
}

/// One interior-page frame visited while descending to a leaf: the page
/// number, and the index (0..=cell_count) of the child pointer followed to
/// get here. An index equal to the page's cell count means the child was
/// reached via the right-most pointer, not a keyed cell.
struct Frame {
    page_number: u32,
    child_index: u16,
}

/// A single write transaction against a [`Pager`]. Only one may be open
/// per pager at a time; the borrow checker enforces this since
/// `Transaction` holds `&'p Pager` and nothing else may mutate it.
pub struct Transaction<'p> {
    pager: &'p Pager,
    header: Header,
    dirty: BTreeMap<u32, Vec<u8>>,
    state: TxnState,
}

impl<'p> Transaction<'p> {
    pub fn begin(pager: &'p Pager) -> Self {
        Self {
            pager,
            header: pager.header(),
            dirty: BTreeMap::new(),
            state: TxnState::Open,
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            TxnState::Open => Ok(()),
            _ => Err(Error::invalid_operation("transaction is no longer open")),
        }
    }

    /// Current schema cookie, including any bump made earlier in this
    /// still-open transaction.
    pub fn schema_cookie(&self) -> u32 {
        self.header.schema_cookie()
    }

    fn page(&self, page_number: u32) -> Result<Rc<[u8]>> {
        self.check_open()?;
        if let Some(bytes) = self.dirty.get(&page_number) {
            return Ok(Rc::from(bytes.clone()));
        }
        self.pager.get(page_number)
    }

    fn page_mut(&mut self, page_number: u32) -> Result<&mut Vec<u8>> {
        self.check_open()?;
        if !self.dirty.contains_key(&page_number) {
            let existing = self.pager.get(page_number)?;
            self.dirty.insert(page_number, existing.to_vec());
        }
        Ok(self.dirty.get_mut(&page_number).expect("just inserted"))
    }

    fn parse_page(&self, page_number: u32) -> Result<Page> {
        Page::parse(page_number, self.page(page_number)?)
    }

    fn usable_size(&self) -> u32 {
        self.pager.header().usable_size()
    }

    // -- allocation --------------------------------------------------

    fn new_page(&mut self) -> Result<u32> {
        self.check_open()?;
        if let Some(n) = self.pop_freelist()? {
            let size = self.pager.page_size() as usize;
            self.dirty.insert(n, vec![0u8; size]);
            return Ok(n);
        }
        let n = self.header.database_size() + 1;
        self.header.set_database_size(n);
        let size = self.pager.page_size() as usize;
        self.dirty.insert(n, vec![0u8; size]);
        Ok(n)
    }

    fn pop_freelist(&mut self) -> Result<Option<u32>> {
        let head = self.header.freelist_head();
        if head == 0 {
            return Ok(None);
        }
        let trunk = self.page_mut(head)?;
        let count = freelist::leaf_count(trunk);
        if count > 0 {
            let leaf = freelist::leaf_at(trunk, (count - 1) as usize);
            freelist::set_leaf_count(trunk, count - 1);
            self.header.set_freelist_count(self.header.freelist_count() - 1);
            return Ok(Some(leaf));
        }
        let next = freelist::next_trunk(trunk);
        self.header.set_freelist_head(next);
        self.header.set_freelist_count(self.header.freelist_count() - 1);
        Ok(Some(head))
    }

    fn free_page(&mut self, page_number: u32) -> Result<()> {
        let usable = self.usable_size();
        let max_leaves = freelist::max_leaves_per_trunk(usable);
        let head = self.header.freelist_head();

        if head != 0 {
            let trunk = self.page_mut(head)?;
            let count = freelist::leaf_count(trunk) as usize;
            if count < max_leaves {
                freelist::set_leaf_at(trunk, count, page_number);
                freelist::set_leaf_count(trunk, (count + 1) as u32);
                self.header.set_freelist_count(self.header.freelist_count() + 1);
                return Ok(());
            }
        }

        let new_trunk = self.page_mut(page_number)?;
        freelist::init_trunk(new_trunk, head);
        self.header.set_freelist_head(page_number);
        self.header.set_freelist_count(self.header.freelist_count() + 1);
        Ok(())
    }

    fn free_overflow_chain(&mut self, mut page_number: u32) -> Result<()> {
        while page_number != 0 {
            let data = self.page(page_number)?;
            let next = U32::read_from_prefix(&data[..4])
                .ok_or_else(|| Error::corrupt("overflow page header truncated"))?
                .get();
            self.free_page(page_number)?;
            page_number = next;
        }
        Ok(())
    }

    /// Follows an overflow chain through this transaction's own dirty
    /// pages first, falling back to the pager — unlike [`Payload::assemble`],
    /// which only sees committed pages.
    fn assemble_payload(&self, payload: &Payload) -> Result<Vec<u8>> {
        let Some(mut page_number) = payload.overflow_page else {
            return Ok(payload.local.clone());
        };

        let mut out = payload.local.clone();
        let mut remaining = payload.total_len - payload.local.len();
        let per_page = self.usable_size() as usize - 4;

        while remaining > 0 {
            if page_number == 0 {
                return Err(Error::corrupt("overflow chain ended early"));
            }
            let data = self.page(page_number)?;
            let next = U32::read_from_prefix(&data[..4])
                .ok_or_else(|| Error::corrupt("overflow page header truncated"))?
                .get();
            let take = remaining.min(per_page);
            out.extend_from_slice(&data[4..4 + take]);
            remaining -= take;
            page_number = next;
        }
        Ok(out)
    }

    /// Spills `record` into a local prefix plus an overflow chain if it
    /// exceeds `max_local`, using the same spill formula the reader uses to
    /// find the boundary.
    fn spill_payload(&mut self, record: &[u8]) -> Result<(Vec<u8>, usize, Option<u32>)> {
        let usable = self.usable_size();
        let (max_local, min_local) = local_limits(usable);
        let total_len = record.len();
        if total_len <= max_local {
            return Ok((record.to_vec(), total_len, None));
        }

        let surplus = min_local + (total_len - min_local) % (usable as usize - 4);
        let local_len = if surplus <= max_local { surplus } else { min_local };
        let (local, tail) = record.split_at(local_len);
        let head = self.allocate_overflow_chain(tail, usable)?;
        Ok((local.to_vec(), total_len, Some(head)))
    }

    fn allocate_overflow_chain(&mut self, mut tail: &[u8], usable: u32) -> Result<u32> {
        let per_page = usable as usize - 4;
        let mut chunks = Vec::new();
        while !tail.is_empty() {
            let take = tail.len().min(per_page);
            let (chunk, rest) = tail.split_at(take);
            chunks.push(chunk.to_vec());
            tail = rest;
        }

        let mut next_page_number = 0u32;
        for chunk in chunks.into_iter().rev() {
            let page_number = self.new_page()?;
            let buf = self.page_mut(page_number)?;
            buf[..4].copy_from_slice(&next_page_number.to_be_bytes());
            buf[4..4 + chunk.len()].copy_from_slice(&chunk);
            next_page_number = page_number;
        }
        Ok(next_page_number)
    }

    // -- descent -------------------------------------------------------

    /// Descends from `root` to the leaf that should contain `row_id`,
    /// returning the interior frames visited and the leaf page number.
    fn descend(&self, root: u32, row_id: i64) -> Result<(Vec<Frame>, u32)> {
        let mut frames = Vec::new();
        let mut page_number = root;
        loop {
            let page = self.parse_page(page_number)?;
            match page.page_type() {
                PageType::LeafTable => return Ok((frames, page_number)),
                PageType::InteriorTable => {
                    let mut idx = page.cell_count();
                    for i in 0..page.cell_count() {
                        let (_child, key) = page.interior_table_cell(i)?;
                        if row_id <= key {
                            idx = i;
                            break;
                        }
                    }
                    let child = if idx == page.cell_count() {
                        page.right_most_pointer()
                    } else {
                        page.interior_table_cell(idx)?.0
                    };
                    frames.push(Frame { page_number, child_index: idx });
                    page_number = child;
                }
                other => return Err(Error::unsupported(format!("writer does not support {other:?} roots"))),
            }
        }
    }

    fn read_leaf_entries(&self, page_number: u32) -> Result<Vec<(i64, Payload)>> {
        let page = self.parse_page(page_number)?;
        let usable = self.usable_size();
        (0..page.cell_count()).map(|i| page.leaf_table_cell(i, usable)).collect()
    }

    fn read_interior_entries(&self, page_number: u32) -> Result<(Vec<(u32, i64)>, u32)> {
        let page = self.parse_page(page_number)?;
        let mut entries = Vec::with_capacity(page.cell_count() as usize);
        for i in 0..page.cell_count() {
            entries.push(page.interior_table_cell(i)?);
        }
        Ok((entries, page.right_most_pointer()))
    }

    // -- leaf / interior layout -----------------------------------------

    /// Builds a scratch buffer to lay a page out into: a copy of the
    /// page's current bytes, so that anything before `header_offset` (the
    /// 100-byte file header on page 1) survives untouched. The layout
    /// functions only ever zero and rewrite the region from `header_offset`
    /// onward.
    fn layout_scratch(&self, page_number: u32) -> Result<Vec<u8>> {
        Ok(self.page(page_number)?.to_vec())
    }

    fn write_leaf_layout(&mut self, page_number: u32, header_offset: usize, cells: &[CellBytes]) -> Result<()> {
        let mut scratch = self.layout_scratch(page_number)?;
        match build::layout_leaf_table(&mut scratch, header_offset, cells)? {
            None => {
                *self.page_mut(page_number)? = scratch;
                Ok(())
            }
            Some(_) => Err(Error::corrupt(
                "page split cascaded beyond one level; record set too large for a single split",
            )),
        }
    }

    fn write_interior_layout(
        &mut self,
        page_number: u32,
        header_offset: usize,
        entries: &[(u32, i64)],
        right_most: u32,
    ) -> Result<()> {
        let mut scratch = self.layout_scratch(page_number)?;
        match build::layout_interior_table(&mut scratch, header_offset, entries, right_most)? {
            None => {
                *self.page_mut(page_number)? = scratch;
                Ok(())
            }
            Some(_) => Err(Error::corrupt("interior page split cascaded beyond one level")),
        }
    }

    fn write_new_root(&mut self, root_page: u32, left_child: u32, right_child: u32, separator_key: i64) -> Result<()> {
        let header_offset = Header::page_header_offset(root_page);
        self.write_interior_layout(root_page, header_offset, &[(left_child, separator_key)], right_child)
    }

    fn write_leaf_and_propagate(&mut self, leaf_page: u32, frames: Vec<Frame>, cells: Vec<CellBytes>) -> Result<()> {
        let is_root = frames.is_empty();
        let header_offset = Header::page_header_offset(leaf_page);

        let mut scratch = self.layout_scratch(leaf_page)?;
        let split = build::layout_leaf_table(&mut scratch, header_offset, &cells)?;
        let Some((right_indices, separator_key)) = split else {
            *self.page_mut(leaf_page)? = scratch;
            return Ok(());
        };

        let left_cells: Vec<CellBytes> = (0..cells.len())
            .filter(|i| !right_indices.contains(i))
            .map(|i| cells[i].clone())
            .collect();
        let right_cells: Vec<CellBytes> = right_indices.iter().map(|&i| cells[i].clone()).collect();

        if is_root {
            debug!(page = leaf_page, "leaf root split");
            let new_left = self.new_page()?;
            self.write_leaf_layout(new_left, 0, &left_cells)?;
            let new_right = self.new_page()?;
            self.write_leaf_layout(new_right, 0, &right_cells)?;
            self.write_new_root(leaf_page, new_left, new_right, separator_key)
        } else {
            self.write_leaf_layout(leaf_page, header_offset, &left_cells)?;
            let right_page = self.new_page()?;
            self.write_leaf_layout(right_page, 0, &right_cells)?;
            self.propagate_split(frames, leaf_page, right_page, separator_key)
        }
    }

    fn write_interior_and_propagate(
        &mut self,
        page_number: u32,
        frames: Vec<Frame>,
        entries: Vec<(u32, i64)>,
        right_most: u32,
    ) -> Result<()> {
        let is_root = frames.is_empty();
        let header_offset = Header::page_header_offset(page_number);

        let mut scratch = self.layout_scratch(page_number)?;
        let split = build::layout_interior_table(&mut scratch, header_offset, &entries, right_most)?;
        let Some((right_entries, right_most_for_right, separator_key)) = split else {
            *self.page_mut(page_number)? = scratch;
            return Ok(());
        };

        let pivot = entries.len() / 2;
        let left_entries = entries[..pivot].to_vec();
        let left_right_most = entries[pivot].0;

        if is_root {
            debug!(page = page_number, "interior root split");
            let new_left = self.new_page()?;
            self.write_interior_layout(new_left, 0, &left_entries, left_right_most)?;
            let new_right = self.new_page()?;
            self.write_interior_layout(new_right, 0, &right_entries, right_most_for_right)?;
            self.write_new_root(page_number, new_left, new_right, separator_key)
        } else {
            self.write_interior_layout(page_number, header_offset, &left_entries, left_right_most)?;
            let right_page = self.new_page()?;
            self.write_interior_layout(right_page, 0, &right_entries, right_most_for_right)?;
            self.propagate_split(frames, page_number, right_page, separator_key)
        }
    }

    fn propagate_split(&mut self, mut frames: Vec<Frame>, left_child: u32, right_child: u32, separator_key: i64) -> Result<()> {
        let frame = frames
            .pop()
            .ok_or_else(|| Error::corrupt("split propagation lost its parent frame"))?;
        let (mut entries, mut right_most) = self.read_interior_entries(frame.page_number)?;

        if frame.child_index as usize == entries.len() {
            entries.push((left_child, separator_key));
            right_most = right_child;
        } else {
            let idx = frame.child_index as usize;
            let old_key = entries[idx].1;
            entries[idx] = (left_child, separator_key);
            entries.insert(idx + 1, (right_child, old_key));
        }

        self.write_interior_and_propagate(frame.page_number, frames, entries, right_most)
    }

    fn leaf_cell_bytes(entries: &[(i64, Payload)]) -> Vec<CellBytes> {
        entries
            .iter()
            .map(|(row_id, payload)| CellBytes {
                bytes: build::encode_leaf_table_cell_spilled(*row_id, payload.total_len, &payload.local, payload.overflow_page),
                key: *row_id,
            })
            .collect()
    }

    fn insert_cell(&mut self, root: u32, row_id: i64, cell: Vec<u8>) -> Result<()> {
        let (frames, leaf_page) = self.descend(root, row_id)?;
        let entries = self.read_leaf_entries(leaf_page)?;
        let mut cells = Self::leaf_cell_bytes(&entries);

        let pos = cells.partition_point(|c| c.key < row_id);
        if pos < cells.len() && cells[pos].key == row_id {
            return Err(Error::invalid_argument(format!("row id {row_id} already exists")));
        }
        cells.insert(pos, CellBytes { bytes: cell, key: row_id });
        self.write_leaf_and_propagate(leaf_page, frames, cells)
    }

    // -- public row operations ------------------------------------------

    /// Inserts a new row at `row_id` into the table rooted at `root`.
    pub fn insert_row(&mut self, root: u32, row_id: i64, record: &[u8]) -> Result<()> {
        self.check_open()?;
        let (local, total_len, overflow_head) = self.spill_payload(record)?;
        let cell = build::encode_leaf_table_cell_spilled(row_id, total_len, &local, overflow_head);
        trace!(root, row_id, len = record.len(), "insert_row");
        self.insert_cell(root, row_id, cell)
    }

    /// Amortizes nothing beyond calling [`Self::insert_row`] per row; kept
    /// as a distinct entry point so in-order batch appends read as one
    /// operation at call sites.
    pub fn insert_batch(&mut self, root: u32, rows: impl IntoIterator<Item = (i64, Vec<u8>)>) -> Result<()> {
        for (row_id, record) in rows {
            self.insert_row(root, row_id, &record)?;
        }
        Ok(())
    }

    /// Deletes the row `row_id` from the table rooted at `root`, freeing
    /// any overflow chain it owned. A leaf left empty by the deletion is
    /// kept as an empty leaf rather than merged with a sibling — a valid
    /// but simplified rebalance, per the decision recorded in
    /// `DESIGN.md`.
    pub fn delete_row(&mut self, root: u32, row_id: i64) -> Result<()> {
        self.check_open()?;
        let (frames, leaf_page) = self.descend(root, row_id)?;
        let mut entries = self.read_leaf_entries(leaf_page)?;
        let pos = entries.iter().position(|(id, _)| *id == row_id).ok_or(Error::NotFound)?;
        let (_, removed) = entries.remove(pos);
        if let Some(head) = removed.overflow_page {
            self.free_overflow_chain(head)?;
        }
        let cells = Self::leaf_cell_bytes(&entries);
        self.write_leaf_and_propagate(leaf_page, frames, cells)
    }

    /// Updates the row `row_id`, preserving its rowid. Implemented
    /// uniformly as delete-then-insert: the leaf
    /// layout policy already rebuilds the whole page on any mutation, so
    /// an in-place fast path would not save the rewrite it is meant to
    /// avoid.
    pub fn update_row(&mut self, root: u32, row_id: i64, record: &[u8]) -> Result<()> {
        self.check_open()?;
        self.delete_row(root, row_id)?;
        self.insert_row(root, row_id, record)
    }

    /// Updates `row_id` if present, otherwise inserts it. Used by the
    /// trust ledger's agent registry, which upserts by primary key.
    pub fn upsert_row(&mut self, root: u32, row_id: i64, record: &[u8]) -> Result<()> {
        match self.update_row(root, row_id, record) {
            Err(Error::NotFound) => self.insert_row(root, row_id, record),
            other => other,
        }
    }

    // -- whole-table helpers, used by schema DDL and the ledger ----------

    /// Walks the table rooted at `root` in key order, collecting every
    /// `(row_id, assembled payload)` pair. Used internally for DDL lookups
    /// and by the ledger/agent registry modules.
    pub(crate) fn scan_table(&self, root: u32) -> Result<Vec<(i64, Vec<u8>)>> {
        let mut out = Vec::new();
        self.scan_into(root, &mut out)?;
        Ok(out)
    }

    fn scan_into(&self, page_number: u32, out: &mut Vec<(i64, Vec<u8>)>) -> Result<()> {
        let page = self.parse_page(page_number)?;
        let usable = self.usable_size();
        match page.page_type() {
            PageType::LeafTable => {
                for i in 0..page.cell_count() {
                    let (row_id, payload) = page.leaf_table_cell(i, usable)?;
                    out.push((row_id, self.assemble_payload(&payload)?));
                }
            }
            PageType::InteriorTable => {
                for i in 0..page.cell_count() {
                    let (child, _) = page.interior_table_cell(i)?;
                    self.scan_into(child, out)?;
                }
                self.scan_into(page.right_most_pointer(), out)?;
            }
            other => return Err(Error::unsupported(format!("scan does not support {other:?} pages"))),
        }
        Ok(())
    }

    /// Looks up a single row by its rowid without scanning the whole table,
    /// used by the agent registry and trust ledger for point lookups keyed
    /// off a deterministic rowid.
    pub(crate) fn get_row(&self, root: u32, row_id: i64) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let (_, leaf_page) = self.descend(root, row_id)?;
        for (id, payload) in self.read_leaf_entries(leaf_page)? {
            if id == row_id {
                return Ok(Some(self.assemble_payload(&payload)?));
            }
        }
        Ok(None)
    }

    fn max_row_id(&self, root: u32) -> Result<i64> {
        let mut page_number = root;
        loop {
            let page = self.parse_page(page_number)?;
            match page.page_type() {
                PageType::LeafTable => {
                    if page.cell_count() == 0 {
                        return Ok(0);
                    }
                    let (row_id, _) = page.leaf_table_cell(page.cell_count() - 1, self.usable_size())?;
                    return Ok(row_id);
                }
                PageType::InteriorTable => page_number = page.right_most_pointer(),
                other => return Err(Error::unsupported(format!("{other:?} not supported"))),
            }
        }
    }

    fn find_schema_row(&self, object_type: &str, name: &str) -> Result<(i64, Vec<Value>)> {
        for (row_id, bytes) in self.scan_table(SQLITE_SCHEMA_ROOT_PAGE)? {
            let values: Vec<Value> = Record::from(bytes.as_slice()).values().collect();
            if values.len() >= 5 && values[0].as_text() == Some(object_type) && values[1].as_text() == Some(name) {
                return Ok((row_id, values));
            }
        }
        Err(Error::NotFound)
    }

    // -- DDL -------------------------------------------------------------

    /// Allocates a root page, inserts the `sqlite_schema` row, and bumps
    /// the schema cookie.
    pub fn create_table(&mut self, name: &str, sql: &str) -> Result<u32> {
        self.check_open()?;
        let root_page = self.new_page()?;
        self.write_leaf_layout(root_page, 0, &[])?;

        let row_id = self.max_row_id(SQLITE_SCHEMA_ROOT_PAGE)? + 1;
        let record = record::encode(&[
            Value::Text("table".to_owned()),
            Value::Text(name.to_owned()),
            Value::Text(name.to_owned()),
            Value::Int64(root_page as i64),
            Value::Text(sql.to_owned()),
        ]);
        self.insert_row(SQLITE_SCHEMA_ROOT_PAGE, row_id, &record)?;
        self.header.bump_schema_cookie();
        Ok(root_page)
    }

    /// Allocates an (empty) index root page and inserts its `sqlite_schema`
    /// row. Populating the index's own cells as rows change is the
    /// executor's job, outside this crate's scope.
    pub fn create_index(&mut self, name: &str, table_name: &str, sql: &str) -> Result<u32> {
        self.check_open()?;
        let root_page = self.new_page()?;
        self.write_leaf_layout(root_page, 0, &[])?;

        let row_id = self.max_row_id(SQLITE_SCHEMA_ROOT_PAGE)? + 1;
        let record = record::encode(&[
            Value::Text("index".to_owned()),
            Value::Text(name.to_owned()),
            Value::Text(table_name.to_owned()),
            Value::Int64(root_page as i64),
            Value::Text(sql.to_owned()),
        ]);
        self.insert_row(SQLITE_SCHEMA_ROOT_PAGE, row_id, &record)?;
        self.header.bump_schema_cookie();
        Ok(root_page)
    }

    /// Appends a column definition to an existing table's stored SQL
    /// without rewriting any rows; pre-existing rows read the new column
    /// as NULL because the record codec treats a short record as padded
    /// with trailing NULLs.
    pub fn alter_table_add_column(&mut self, table_name: &str, column_sql: &str) -> Result<()> {
        self.check_open()?;
        let (row_id, mut values) = self.find_schema_row("table", table_name)?;
        let old_sql = values[4].as_text().unwrap_or_default().to_owned();
        let close = old_sql.rfind(')').ok_or_else(|| Error::corrupt("malformed CREATE TABLE sql"))?;
        let new_sql = format!("{}, {}{}", &old_sql[..close], column_sql, &old_sql[close..]);
        values[4] = Value::Text(new_sql);

        let record = record::encode(&values);
        self.update_row(SQLITE_SCHEMA_ROOT_PAGE, row_id, &record)?;
        self.header.bump_schema_cookie();
        Ok(())
    }

    // -- commit / rollback ------------------------------------------------

    /// Flushes dirty pages to the pager in page order, then the updated
    /// header, and discards this transaction.
    pub fn commit(mut self) -> Result<()> {
        self.check_open()?;
        let dirty: Vec<(u32, Vec<u8>)> = std::mem::take(&mut self.dirty).into_iter().collect();
        let new_count = self.header.database_size();
        debug!(pages = dirty.len(), new_count, "committing transaction");
        self.pager.commit_pages(dirty, new_count, self.header)?;
        self.state = TxnState::Committed;
        Ok(())
    }

    /// Discards every mutation made in this transaction. Since nothing
    /// reached the pager or page source before `commit`, this only needs
    /// to drop the dirty-page map.
    pub fn rollback(mut self) -> Result<()> {
        self.check_open()?;
        debug!(pages = self.dirty.len(), "rolling back transaction");
        self.dirty.clear();
        self.state = TxnState::RolledBack;
        Ok(())
    }
}

/// Lays an empty `sqlite_schema` leaf table into page 1 and commits.
/// `Pager::create` leaves page 1's cell area zeroed (not a valid b-tree
/// page), so every fresh database needs this once before any other
/// transaction runs against it.
pub(crate) fn init_empty_database(pager: &Pager) -> Result<()> {
    let mut txn = Transaction::begin(pager);
    txn.write_leaf_layout(SQLITE_SCHEMA_ROOT_PAGE, Header::page_header_offset(SQLITE_SCHEMA_ROOT_PAGE), &[])?;
    txn.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoopTransform;
    use crate::page_source::MemorySource;
    use crate::schema::Catalog;

    fn new_pager() -> Pager {
        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 50).unwrap();
        init_empty_database(&pager).unwrap();
        pager
    }

    #[test]
    fn test_create_table_then_insert_and_scan() {
        let pager = new_pager();
        let root_page;
        {
            let mut txn = Transaction::begin(&pager);
            root_page = txn.create_table("widgets", "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
            for i in 1..=10i64 {
                let record = record::encode(&[Value::Int64(i), Value::Text(format!("widget-{i}"))]);
                txn.insert_row(root_page, i, &record).unwrap();
            }
            txn.commit().unwrap();
        }

        let catalog = Catalog::load(&pager).unwrap();
        let table = catalog.table("widgets").unwrap();
        assert_eq!(table.root_page, root_page);

        let txn = Transaction::begin(&pager);
        let rows = txn.scan_table(root_page).unwrap();
        assert_eq!(rows.len(), 10);
        for (i, (row_id, bytes)) in rows.iter().enumerate() {
            assert_eq!(*row_id, i as i64 + 1);
            let values: Vec<Value> = Record::from(bytes.as_slice()).values().collect();
            assert_eq!(values[1], Value::Text(format!("widget-{}", i + 1)));
        }
    }

    #[test]
    fn test_many_inserts_cause_page_split() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let root_page = txn.create_table("t", "CREATE TABLE t (id INTEGER PRIMARY KEY, payload TEXT)").unwrap();

        for i in 1..=200i64 {
            let record = record::encode(&[Value::Int64(i), Value::Text("x".repeat(20))]);
            txn.insert_row(root_page, i, &record).unwrap();
        }
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        let rows = txn.scan_table(root_page).unwrap();
        assert_eq!(rows.len(), 200);
        for (i, (row_id, _)) in rows.iter().enumerate() {
            assert_eq!(*row_id, i as i64 + 1);
        }
    }

    #[test]
    fn test_delete_then_reinsert() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let root_page = txn.create_table("t", "CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        for i in 1..=5i64 {
            txn.insert_row(root_page, i, &record::encode(&[Value::Int64(i)])).unwrap();
        }
        txn.delete_row(root_page, 3).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        let rows = txn.scan_table(root_page).unwrap();
        let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_overflow_round_trip() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let root_page = txn.create_table("t", "CREATE TABLE t (id INTEGER PRIMARY KEY, body TEXT)").unwrap();
        let text = "y".repeat(2000);
        txn.insert_row(root_page, 1, &record::encode(&[Value::Int64(1), Value::Text(text.clone())])).unwrap();
        txn.commit().unwrap();

        let txn = Transaction::begin(&pager);
        let rows = txn.scan_table(root_page).unwrap();
        let values: Vec<Value> = Record::from(rows[0].1.as_slice()).values().collect();
        assert_eq!(values[1], Value::Text(text));
    }

    #[test]
    fn test_rollback_leaves_no_trace() {
        let pager = new_pager();
        let before = pager.page_count();

        let mut txn = Transaction::begin(&pager);
        let _root_page = txn.create_table("t", "CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        txn.rollback().unwrap();

        assert_eq!(pager.page_count(), before);
        let catalog = Catalog::load(&pager).unwrap();
        assert!(catalog.table("t").is_none());
    }

    #[test]
    fn test_free_then_allocate_returns_same_page() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let page_number = txn.new_page().unwrap();
        txn.free_page(page_number).unwrap();
        let reallocated = txn.new_page().unwrap();
        assert_eq!(reallocated, page_number);
    }
}
