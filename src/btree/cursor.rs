//! Stack-based b-tree cursors.
//!
//! A cursor holds a path of (page, next-child-index) frames from the root
//! down to the current leaf: a reusable `seek`/`first`/`last`/`next`/`prev`
//! cursor rather than a one-shot `Iterator`.

use std::cmp::Ordering;
use std::vec::IntoIter;

use crate::error::{Error, Result};
use crate::pager::Pager;
use crate::record::{Record, Value};

use super::{Page, PageType};

/// A (row id, assembled payload) pair read off a table b-tree leaf.
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub row_id: i64,
    pub payload: Vec<u8>,
}

enum Direction {
    Forward,
    Backward,
}

/// Walks a rowid (table) b-tree in key order.
pub struct Cursor<'p> {
    pager: &'p Pager,
    root: u32,
    /// (page, index of the next cell/child to visit) from root to leaf.
    stack: Vec<(Page, u16)>,
    current: Option<Page>,
    current_index: u16,
    /// Snapshot of `pager.data_version()` at cursor creation time; every
    /// positioning method re-checks this and returns `Error::InvalidOperation`
    /// if a commit has happened underneath the cursor, since the stack of
    /// pages it holds may no longer describe the tree's current shape.
    data_version: u64,
    exhausted: bool,
    /// Set by `index_seek`: the row ids an index lookup matched, fetched
    /// from the table one at a time as the cursor advances. `None` for an
    /// ordinary full-scan cursor.
    index_seek_rowids: Option<IntoIter<i64>>,
}

impl<'p> Cursor<'p> {
    /// Opens a cursor positioned at the first entry of the table rooted at
    /// `root`. Iterating it (`for entry in cursor`) walks the whole tree in
    /// row id order.
    pub fn table(pager: &'p Pager, root: u32) -> Result<Self> {
        let mut cursor = Self {
            pager,
            root,
            stack: Vec::new(),
            current: None,
            current_index: 0,
            data_version: pager.data_version(),
            exhausted: true,
            index_seek_rowids: None,
        };
        cursor.first()?;
        Ok(cursor)
    }

    /// Looks up `key` in the index rooted at `index_root` and positions the
    /// cursor on the first matching row of the table rooted at
    /// `table_root`, fetching further matches one rowid at a time as the
    /// cursor advances. Used when a predicate's leading column has a usable
    /// index; a predicate with no such index falls back to a full
    /// `Cursor::table` scan filtered by the caller.
    pub fn index_seek(pager: &'p Pager, table_root: u32, index_root: u32, key: &Value) -> Result<Self> {
        let usable_size = pager.header().usable_size();
        let mut rowids = Vec::new();
        Self::walk_index(pager, index_root, key, usable_size, &mut rowids)?;

        let mut cursor = Self {
            pager,
            root: table_root,
            stack: Vec::new(),
            current: None,
            current_index: 0,
            data_version: pager.data_version(),
            exhausted: true,
            index_seek_rowids: Some(rowids.into_iter()),
        };
        cursor.advance_index_seek()?;
        Ok(cursor)
    }

    /// Recursively collects the row ids of every index entry whose leading
    /// column equals `key`, pruning subtrees the sort order rules out.
    fn walk_index(pager: &'p Pager, page_number: u32, key: &Value, usable_size: u32, out: &mut Vec<i64>) -> Result<()> {
        let page = Page::parse(page_number, pager.get(page_number)?)?;
        match page.page_type() {
            PageType::LeafIndex => {
                for i in 0..page.cell_count() {
                    let payload = page.leaf_index_cell(i, usable_size)?;
                    let bytes = payload.assemble(pager)?;
                    if let Some(row_id) = leading_column_match(&bytes, key) {
                        out.push(row_id);
                    }
                }
                Ok(())
            }
            PageType::InteriorIndex => {
                for i in 0..page.cell_count() {
                    let (child, payload) = page.interior_index_cell(i, usable_size)?;
                    let bytes = payload.assemble(pager)?;
                    let cmp = leading_column_cmp(&bytes, key);
                    if cmp != Ordering::Less {
                        Self::walk_index(pager, child, key, usable_size, out)?;
                    }
                    if let Some(row_id) = leading_column_match(&bytes, key) {
                        out.push(row_id);
                    }
                    if cmp == Ordering::Greater {
                        return Ok(());
                    }
                }
                Self::walk_index(pager, page.right_most_pointer(), key, usable_size, out)
            }
            other => Err(Error::unsupported(format!("index_seek does not support {other:?} pages"))),
        }
    }

    /// Advances an index-seek cursor to its next matched rowid, fetching
    /// that row from the table. Leaves the cursor exhausted once the match
    /// list is empty.
    fn advance_index_seek(&mut self) -> Result<()> {
        let Some(iter) = self.index_seek_rowids.as_mut() else {
            return Ok(());
        };
        match iter.next() {
            Some(row_id) => self.seek(row_id),
            None => {
                self.current = None;
                self.exhausted = true;
                Ok(())
            }
        }
    }

    fn check_fresh(&self) -> Result<()> {
        if self.pager.data_version() != self.data_version {
            return Err(Error::invalid_operation(
                "cursor used after a commit invalidated its snapshot",
            ));
        }
        Ok(())
    }

    fn load(&self, page_number: u32) -> Result<Page> {
        let data = self.pager.get(page_number)?;
        Page::parse(page_number, data)
    }

    /// Positions the cursor at the leftmost entry of the tree.
    pub fn first(&mut self) -> Result<()> {
        self.check_fresh()?;
        self.stack.clear();
        let mut page = self.load(self.root)?;

        loop {
            match page.page_type() {
                PageType::InteriorTable => {
                    if page.cell_count() == 0 {
                        let child = page.right_most_pointer();
                        self.stack.push((page, 0));
                        page = self.load(child)?;
                        continue;
                    }
                    let (child, _row_id) = page.interior_table_cell(0)?;
                    self.stack.push((page, 1));
                    page = self.load(child)?;
                }
                PageType::LeafTable => {
                    self.current_index = 0;
                    self.exhausted = page.cell_count() == 0;
                    self.current = Some(page);
                    return Ok(());
                }
                other => return Err(Error::unsupported(format!("cursor does not support {other:?} roots"))),
            }
        }
    }

    /// Positions the cursor at the rightmost entry of the tree.
    pub fn last(&mut self) -> Result<()> {
        self.check_fresh()?;
        self.stack.clear();
        self.descend_last(self.root)
    }

    /// Positions the cursor at the smallest row id `>= row_id`, or past the
    /// end if none exists.
    pub fn seek(&mut self, row_id: i64) -> Result<()> {
        self.check_fresh()?;
        self.stack.clear();
        let mut page = self.load(self.root)?;

        loop {
            match page.page_type() {
                PageType::InteriorTable => {
                    let mut child_index = page.cell_count();
                    for i in 0..page.cell_count() {
                        let (_child, key) = page.interior_table_cell(i)?;
                        if key >= row_id {
                            child_index = i;
                            break;
                        }
                    }
                    let child = if child_index == page.cell_count() {
                        page.right_most_pointer()
                    } else {
                        page.interior_table_cell(child_index)?.0
                    };
                    self.stack.push((page, child_index + 1));
                    page = self.load(child)?;
                }
                PageType::LeafTable => {
                    let mut leaf_index = page.cell_count();
                    for i in 0..page.cell_count() {
                        let (key, _payload) = page.leaf_table_cell(i, self.usable_size())?;
                        if key >= row_id {
                            leaf_index = i;
                            break;
                        }
                    }
                    self.current_index = leaf_index;
                    self.exhausted = leaf_index >= page.cell_count();
                    self.current = Some(page);
                    return Ok(());
                }
                other => return Err(Error::unsupported(format!("cursor does not support {other:?} roots"))),
            }
        }
    }

    fn usable_size(&self) -> u32 {
        self.pager.header().usable_size()
    }

    /// Returns the entry the cursor currently points to, if any.
    pub fn current(&self) -> Result<Option<TableEntry>> {
        self.check_fresh()?;
        let Some(page) = &self.current else { return Ok(None) };
        if self.exhausted || self.current_index >= page.cell_count() {
            return Ok(None);
        }

        let (row_id, payload) = page.leaf_table_cell(self.current_index, self.usable_size())?;
        Ok(Some(TableEntry {
            row_id,
            payload: payload.assemble(self.pager)?,
        }))
    }

    pub fn advance(&mut self) -> Result<()> {
        if self.index_seek_rowids.is_some() {
            return self.advance_index_seek();
        }
        self.step(Direction::Forward)
    }

    pub fn retreat(&mut self) -> Result<()> {
        if self.index_seek_rowids.is_some() {
            return Err(Error::unsupported("retreat is not supported on an index-seek cursor"));
        }
        self.step(Direction::Backward)
    }

    fn step(&mut self, direction: Direction) -> Result<()> {
        self.check_fresh()?;
        let Some(page) = self.current.clone() else {
            self.exhausted = true;
            return Ok(());
        };

        match direction {
            Direction::Forward => {
                if self.current_index + 1 < page.cell_count() {
                    self.current_index += 1;
                    return Ok(());
                }
            }
            Direction::Backward => {
                if self.current_index > 0 {
                    self.current_index -= 1;
                    return Ok(());
                }
            }
        }

        // Leaf exhausted in this direction: pop up the stack to find the
        // next sibling subtree, descending back down to a leaf.
        loop {
            let Some((parent, next_child_index)) = self.stack.pop() else {
                self.exhausted = true;
                self.current = None;
                return Ok(());
            };

            match direction {
                Direction::Forward => {
                    let total_children = parent.cell_count() + 1;
                    if next_child_index >= total_children {
                        continue;
                    }
                    let child = if next_child_index == parent.cell_count() {
                        parent.right_most_pointer()
                    } else {
                        parent.interior_table_cell(next_child_index)?.0
                    };
                    self.stack.push((parent, next_child_index + 1));
                    self.descend_first(child)?;
                    return Ok(());
                }
                Direction::Backward => {
                    if next_child_index == 0 {
                        continue;
                    }
                    let prev_child_index = next_child_index - 1;
                    let child = if prev_child_index == parent.cell_count() {
                        parent.right_most_pointer()
                    } else {
                        parent.interior_table_cell(prev_child_index)?.0
                    };
                    self.stack.push((parent, prev_child_index));
                    self.descend_last(child)?;
                    return Ok(());
                }
            }
        }
    }

    fn descend_first(&mut self, mut page_number: u32) -> Result<()> {
        loop {
            let page = self.load(page_number)?;
            match page.page_type() {
                PageType::InteriorTable => {
                    if page.cell_count() == 0 {
                        let child = page.right_most_pointer();
                        self.stack.push((page, 0));
                        page_number = child;
                        continue;
                    }
                    let (child, _) = page.interior_table_cell(0)?;
                    self.stack.push((page, 1));
                    page_number = child;
                }
                PageType::LeafTable => {
                    self.current_index = 0;
                    self.exhausted = page.cell_count() == 0;
                    self.current = Some(page);
                    return Ok(());
                }
                other => return Err(Error::unsupported(format!("cursor does not support {other:?} roots"))),
            }
        }
    }

    fn descend_last(&mut self, mut page_number: u32) -> Result<()> {
        loop {
            let page = self.load(page_number)?;
            match page.page_type() {
                PageType::InteriorTable => {
                    let child = page.right_most_pointer();
                    self.stack.push((page, page.cell_count()));
                    page_number = child;
                }
                PageType::LeafTable => {
                    self.current_index = page.cell_count().saturating_sub(1);
                    self.exhausted = page.cell_count() == 0;
                    self.current = Some(page);
                    return Ok(());
                }
                other => return Err(Error::unsupported(format!("cursor does not support {other:?} roots"))),
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl<'p> Iterator for Cursor<'p> {
    type Item = Result<TableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current() {
            Ok(Some(entry)) => {
                if let Err(e) = self.advance() {
                    return Some(Err(e));
                }
                Some(Ok(entry))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Decodes an index cell's leading column and compares it to `key`. SQLite
/// index records store the indexed column(s) followed by the rowid as the
/// final value, so only the first value here is the search key.
fn leading_column_cmp(index_record_bytes: &[u8], key: &Value) -> Ordering {
    let leading = Record::from(index_record_bytes).values().next().unwrap_or(Value::Null);
    compare_values(&leading, key)
}

/// Returns the cell's rowid (the record's last value) if its leading
/// column equals `key`.
fn leading_column_match(index_record_bytes: &[u8], key: &Value) -> Option<i64> {
    let mut values = Record::from(index_record_bytes).values();
    let leading = values.next()?;
    if compare_values(&leading, key) != Ordering::Equal {
        return None;
    }
    values.last().and_then(|v| v.as_int64())
}

/// Orders two column values the way SQLite's type affinity rules do:
/// `NULL < (INTEGER, REAL) < TEXT < BLOB`, with numeric and byte-string
/// comparisons within a type.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Int64(x), Value::Double(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Double(x), Value::Int64(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        (Value::Guid(x), Value::Guid(y)) => x.cmp(y),
        (Value::Blob(x), Value::Guid(y)) => x.as_slice().cmp(y.as_slice()),
        (Value::Guid(x), Value::Blob(y)) => x.as_slice().cmp(y.as_slice()),
        (Value::Text(_), _) => Ordering::Greater,
        (_, Value::Text(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::build::{encode_leaf_index_cell, encode_leaf_table_cell, layout_leaf_index, layout_leaf_table, CellBytes};
    use crate::crypto::NoopTransform;
    use crate::page_source::MemorySource;
    use crate::pager::Pager;
    use crate::record;

    const NAMES: [&str; 5] = ["apple", "banana", "cherry", "date", "fig"];

    /// A pager with page 1's default header plus two hand-built pages: a
    /// leaf table (page 2, rows 1..=5 keyed by `NAMES` in order) and a leaf
    /// index over the name column (page 3, sorted the same way, each entry
    /// ending in the matching row id).
    fn pager_with_table_and_index() -> Pager {
        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 50).unwrap();

        let table_cells: Vec<CellBytes> = NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let row_id = i as i64 + 1;
                let record = record::encode(&[Value::Int64(row_id), Value::Text((*name).to_owned())]);
                CellBytes {
                    bytes: encode_leaf_table_cell(row_id, &record),
                    key: row_id,
                }
            })
            .collect();
        let mut table_page = vec![0u8; 512];
        assert!(layout_leaf_table(&mut table_page, 0, &table_cells).unwrap().is_none());

        let index_cells: Vec<CellBytes> = NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let row_id = i as i64 + 1;
                let record = record::encode(&[Value::Text((*name).to_owned()), Value::Int64(row_id)]);
                CellBytes {
                    bytes: encode_leaf_index_cell(&record),
                    key: row_id,
                }
            })
            .collect();
        let mut index_page = vec![0u8; 512];
        assert!(layout_leaf_index(&mut index_page, 0, &index_cells).unwrap().is_none());

        let mut header = pager.header();
        header.set_database_size(3);
        pager.commit_pages(vec![(2, table_page), (3, index_page)], 3, header).unwrap();
        pager
    }

    #[test]
    fn test_first_and_last() {
        let pager = pager_with_table_and_index();
        let mut cursor = Cursor::table(&pager, 2).unwrap();
        assert_eq!(cursor.current().unwrap().unwrap().row_id, 1);

        cursor.last().unwrap();
        let entry = cursor.current().unwrap().unwrap();
        assert_eq!(entry.row_id, 5);
        let values: Vec<Value> = Record::from(entry.payload.as_slice()).values().collect();
        assert_eq!(values[1], Value::Text("fig".to_owned()));

        cursor.first().unwrap();
        assert_eq!(cursor.current().unwrap().unwrap().row_id, 1);
    }

    #[test]
    fn test_index_seek_finds_matching_row() {
        let pager = pager_with_table_and_index();
        let mut cursor = Cursor::index_seek(&pager, 2, 3, &Value::Text("cherry".to_owned())).unwrap();

        let entry = cursor.current().unwrap().unwrap();
        assert_eq!(entry.row_id, 3);
        let values: Vec<Value> = Record::from(entry.payload.as_slice()).values().collect();
        assert_eq!(values[1], Value::Text("cherry".to_owned()));

        cursor.advance().unwrap();
        assert!(cursor.current().unwrap().is_none());
    }

    #[test]
    fn test_index_seek_no_match_is_immediately_exhausted() {
        let pager = pager_with_table_and_index();
        let cursor = Cursor::index_seek(&pager, 2, 3, &Value::Text("grape".to_owned())).unwrap();
        assert!(cursor.is_exhausted());
    }
}
