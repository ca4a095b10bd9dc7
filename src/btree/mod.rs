//! B-tree pages: decoding cells of every page type, and the minimal
//! mutation operations the writer needs.
//!
//! Overflow-chain assembly and page splits are simplified relative to
//! SQLite's own allocator (see `DESIGN.md`, "B-tree page-split policy"):
//! this engine does not need to produce byte-identical trees, only valid
//! ones a stock SQLite reader can open.

pub mod build;
pub mod cursor;

use std::rc::Rc;

use zerocopy::big_endian::{U16, U32};
use zerocopy::FromBytes;

use crate::buf::Buf;
use crate::error::{Error, Result};
use crate::pager::header::Header;
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    InteriorIndex,
    InteriorTable,
    LeafIndex,
    LeafTable,
}

impl PageType {
    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::LeafIndex | PageType::LeafTable)
    }

    pub fn is_table(self) -> bool {
        matches!(self, PageType::InteriorTable | PageType::LeafTable)
    }

    fn header_size(self) -> u16 {
        if self.is_leaf() {
            8
        } else {
            12
        }
    }
}

impl TryFrom<u8> for PageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x02 => Ok(PageType::InteriorIndex),
            0x05 => Ok(PageType::InteriorTable),
            0x0a => Ok(PageType::LeafIndex),
            0x0d => Ok(PageType::LeafTable),
            other => Err(Error::corrupt(format!("invalid b-tree page type byte {other:#04x}"))),
        }
    }
}

impl From<PageType> for u8 {
    fn from(value: PageType) -> Self {
        match value {
            PageType::InteriorIndex => 0x02,
            PageType::InteriorTable => 0x05,
            PageType::LeafIndex => 0x0a,
            PageType::LeafTable => 0x0d,
        }
    }
}

/// The 8 bytes common to every b-tree page header. Interior pages carry a
/// further 4-byte right-most-child pointer immediately after these, which
/// is read separately since it isn't present on leaf pages at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, zerocopy::FromZeroes, zerocopy::FromBytes, zerocopy::AsBytes, zerocopy::Unaligned,
)]
#[repr(C)]
pub(crate) struct PageHeaderCommon {
    flags: u8,
    first_freeblock: U16,
    cell_count: U16,
    cell_content_start: U16,
    fragmented_free_bytes: u8,
}

impl PageHeaderCommon {
    pub(crate) fn new(flags: u8, first_freeblock: u16, cell_count: u16, cell_content_start: u16, fragmented_free_bytes: u8) -> Self {
        Self {
            flags,
            first_freeblock: first_freeblock.into(),
            cell_count: cell_count.into(),
            cell_content_start: cell_content_start.into(),
            fragmented_free_bytes,
        }
    }

    pub(crate) fn write_into(&self, buf: &mut [u8]) {
        use zerocopy::AsBytes;
        buf.copy_from_slice(self.as_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    common: PageHeaderCommon,
    right_most_pointer: u32,
}

impl PageHeader {
    fn page_type(&self) -> Result<PageType> {
        PageType::try_from(self.common.flags)
    }

    fn size(&self) -> u16 {
        // `try_from` already validated `flags` when the header was read.
        self.page_type().map(PageType::header_size).unwrap_or(12)
    }
}

/// A read-only view of one b-tree page's cells.
#[derive(Debug, Clone)]
pub struct Page {
    page_number: u32,
    header: PageHeader,
    header_offset: usize,
    data: Rc<[u8]>,
}

impl Page {
    pub fn parse(page_number: u32, data: Rc<[u8]>) -> Result<Self> {
        let header_offset = Header::page_header_offset(page_number);
        let region = &data[header_offset..];
        let common = PageHeaderCommon::read_from_prefix(region)
            .ok_or_else(|| Error::corrupt("b-tree page header truncated"))?;
        let page_type = PageType::try_from(common.flags)?;

        let right_most_pointer = if page_type.is_leaf() {
            0
        } else {
            U32::read_from_prefix(&region[8..])
                .ok_or_else(|| Error::corrupt("interior page header truncated"))?
                .get()
        };

        Ok(Self {
            page_number,
            header: PageHeader { common, right_most_pointer },
            header_offset,
            data,
        })
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type().expect("validated in parse")
    }

    pub fn cell_count(&self) -> u16 {
        self.header.common.cell_count.get()
    }

    pub fn right_most_pointer(&self) -> u32 {
        self.header.right_most_pointer
    }

    fn cell_pointer(&self, cell_index: u16) -> Result<u16> {
        if cell_index >= self.cell_count() {
            return Err(Error::corrupt("b-tree cell index out of range"));
        }
        let start = self.header_offset + self.header.size() as usize + cell_index as usize * 2;
        let ptr = U16::read_from_prefix(&self.data[start..])
            .ok_or_else(|| Error::corrupt("b-tree cell pointer array truncated"))?;
        Ok(ptr.get())
    }

    fn cell_bytes(&self, cell_index: u16) -> Result<&[u8]> {
        let ptr = self.cell_pointer(cell_index)?;
        let mut data = &self.data[..];
        data.consume_bytes(ptr as usize);
        Ok(data)
    }

    /// Returns `(row_id, payload)` for a leaf-table cell.
    pub fn leaf_table_cell(&self, cell_index: u16, usable_size: u32) -> Result<(i64, Payload)> {
        if self.page_type() != PageType::LeafTable {
            return Err(Error::corrupt("leaf_table_cell called on non-leaf-table page"));
        }
        let mut cell = self.cell_bytes(cell_index)?;
        let payload_size = cell.consume_varint();
        let row_id = cell.consume_varint();
        let payload = assemble_payload(cell, payload_size as usize, usable_size)?;
        Ok((row_id, payload))
    }

    pub fn interior_table_cell(&self, cell_index: u16) -> Result<(u32, i64)> {
        if self.page_type() != PageType::InteriorTable {
            return Err(Error::corrupt("interior_table_cell called on non-interior-table page"));
        }
        let cell = self.cell_bytes(cell_index)?;
        let left_child = U32::read_from_prefix(cell)
            .ok_or_else(|| Error::corrupt("interior table cell truncated"))?
            .get();
        let (row_id, _) = varint::read(&cell[4..]);
        Ok((left_child, row_id))
    }

    pub fn leaf_index_cell(&self, cell_index: u16, usable_size: u32) -> Result<Payload> {
        if self.page_type() != PageType::LeafIndex {
            return Err(Error::corrupt("leaf_index_cell called on non-leaf-index page"));
        }
        let mut cell = self.cell_bytes(cell_index)?;
        let payload_size = cell.consume_varint();
        assemble_payload(cell, payload_size as usize, usable_size)
    }

    pub fn interior_index_cell(&self, cell_index: u16, usable_size: u32) -> Result<(u32, Payload)> {
        if self.page_type() != PageType::InteriorIndex {
            return Err(Error::corrupt("interior_index_cell called on non-interior-index page"));
        }
        let mut cell = self.cell_bytes(cell_index)?;
        let left_child = U32::read_from_prefix(cell)
            .ok_or_else(|| Error::corrupt("interior index cell truncated"))?
            .get();
        cell.consume_bytes(4);
        let payload_size = cell.consume_varint();
        let payload = assemble_payload(cell, payload_size as usize, usable_size)?;
        Ok((left_child, payload))
    }
}

/// A cell's payload: the bytes stored directly in the cell, the declared
/// total length, and (if the payload spilled) the head overflow page.
#[derive(Debug, Clone)]
pub struct Payload {
    pub local: Vec<u8>,
    pub total_len: usize,
    pub overflow_page: Option<u32>,
}

impl Payload {
    /// Assembles the full payload bytes, following the overflow chain
    /// through `pager` if the payload spilled off this page.
    pub fn assemble(&self, pager: &crate::pager::Pager) -> Result<Vec<u8>> {
        match self.overflow_page {
            None => Ok(self.local.clone()),
            Some(head) => {
                let mut out = self.local.clone();
                read_overflow_chain(pager, head, self.total_len - self.local.len(), &mut out)?;
                Ok(out)
            }
        }
    }
}

/// Reads the local portion of a payload off `cell` and, if it spilled,
/// returns the head overflow page number so the caller's pager can chase
/// the chain.
fn assemble_payload(mut cell: &[u8], payload_size: usize, usable_size: u32) -> Result<Payload> {
    let (max_local, min_local) = local_limits(usable_size);
    if payload_size <= max_local {
        let bytes = cell.consume_bytes(payload_size).to_vec();
        return Ok(Payload {
            local: bytes,
            total_len: payload_size,
            overflow_page: None,
        });
    }

    let surplus = min_local + (payload_size - min_local) % (usable_size as usize - 4);
    let local = if surplus <= max_local { surplus } else { min_local };
    let local_bytes = cell.consume_bytes(local).to_vec();
    let overflow_page = U32::read_from_prefix(cell)
        .ok_or_else(|| Error::corrupt("cell missing overflow page pointer"))?
        .get();
    Ok(Payload {
        local: local_bytes,
        total_len: payload_size,
        overflow_page: Some(overflow_page),
    })
}

/// `max_local`/`min_local` payload thresholds for table leaf cells, per
/// the SQLite file format (`usable_size - 35` and `(usable_size-12)*32/255 - 23`).
pub fn local_limits(usable_size: u32) -> (usize, usize) {
    let max_local = usable_size as usize - 35;
    let min_local = (usable_size as usize - 12) * 32 / 255 - 23;
    (max_local, min_local)
}

/// Follows an overflow chain, appending every page's payload bytes after
/// the local prefix already read from the cell, until `remaining` bytes
/// have been collected.
pub fn read_overflow_chain(
    pager: &crate::pager::Pager,
    mut page_number: u32,
    mut remaining: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let per_page = pager.header().usable_size() as usize - 4;

    while remaining > 0 {
        if page_number == 0 {
            return Err(Error::corrupt("overflow chain ended early"));
        }
        let page = pager.get(page_number)?;
        let next = U32::read_from_prefix(&page[..4])
            .ok_or_else(|| Error::corrupt("overflow page header truncated"))?
            .get();
        let take = remaining.min(per_page);
        out.extend_from_slice(&page[4..4 + take]);
        remaining -= take;
        page_number = next;
    }
    Ok(())
}

pub use cursor::{Cursor, TableEntry};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_limits_4096_page() {
        let (max_local, min_local) = local_limits(4096);
        assert_eq!(max_local, 4061);
        assert_eq!(min_local, 513);
    }

    #[test]
    fn test_page_type_round_trip() {
        for ty in [
            PageType::InteriorIndex,
            PageType::InteriorTable,
            PageType::LeafIndex,
            PageType::LeafTable,
        ] {
            assert_eq!(PageType::try_from(u8::from(ty)).unwrap(), ty);
        }
    }

    #[test]
    fn test_rejects_invalid_page_type_byte() {
        assert!(PageType::try_from(0x01).is_err());
    }
}
