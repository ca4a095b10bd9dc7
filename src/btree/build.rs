//! Serializes a list of cells back into a b-tree page, splitting into two
//! pages when they don't fit.
//!
//! Unlike SQLite's own allocator, this rebuilds a page's cell area from
//! scratch on every mutation instead of reusing freed space in place
//! (see `DESIGN.md`, "B-tree page-split policy"). That costs some write
//! amplification but keeps the layout logic small and easy to get right.

use crate::error::{Error, Result};

use super::{local_limits, PageHeaderCommon, PageType};

/// One not-yet-placed cell: its fully assembled bytes (header + local
/// payload, already including any leading child pointer / row id / payload
/// length varints) plus, for table pages, the row id used to order it.
#[derive(Clone)]
pub struct CellBytes {
    pub bytes: Vec<u8>,
    pub key: i64,
}

/// Builds a leaf-table page containing `cells` (already sorted by key,
/// serialized via [`encode_leaf_table_cell`]). If they don't fit in one
/// page, splits roughly in half and returns `Some(right_cells)` holding
/// the cells that must go on a new page, along with the greatest row id
/// remaining on the left (the separator key the parent needs).
pub fn layout_leaf_table(
    page_bytes: &mut [u8],
    header_offset: usize,
    cells: &[CellBytes],
) -> Result<Option<(Vec<usize>, i64)>> {
    layout_leaf(page_bytes, header_offset, cells, PageType::LeafTable)
}

pub fn layout_leaf_index(
    page_bytes: &mut [u8],
    header_offset: usize,
    cells: &[CellBytes],
) -> Result<Option<(Vec<usize>, i64)>> {
    layout_leaf(page_bytes, header_offset, cells, PageType::LeafIndex)
}

fn layout_leaf(
    page_bytes: &mut [u8],
    header_offset: usize,
    cells: &[CellBytes],
    page_type: PageType,
) -> Result<Option<(Vec<usize>, i64)>> {
    let page_size = page_bytes.len();
    let header_size = page_type.header_size() as usize;
    let cell_pointer_area_end = header_offset + header_size + cells.len() * 2;

    let total_cell_bytes: usize = cells.iter().map(|c| c.bytes.len()).sum();
    if cell_pointer_area_end + total_cell_bytes <= page_size {
        write_leaf_page(page_bytes, header_offset, cells, page_type)?;
        return Ok(None);
    }

    if cells.len() < 2 {
        return Err(Error::corrupt("single cell does not fit on a page; payload too large for this page size"));
    }

    // Split roughly in half by cell count; good enough since cells are
    // usually similarly sized, and exact balance isn't required
    // (`DESIGN.md`, "B-tree page-split policy").
    let split_at = cells.len() / 2;
    let left_indices: Vec<usize> = (0..split_at).collect();
    let right_indices: Vec<usize> = (split_at..cells.len()).collect();

    let left_cells: Vec<&CellBytes> = left_indices.iter().map(|&i| &cells[i]).collect();
    write_leaf_page_refs(page_bytes, header_offset, &left_cells, page_type)?;

    let separator_key = cells[split_at - 1].key;
    Ok(Some((right_indices, separator_key)))
}

fn write_leaf_page(page_bytes: &mut [u8], header_offset: usize, cells: &[CellBytes], page_type: PageType) -> Result<()> {
    let refs: Vec<&CellBytes> = cells.iter().collect();
    write_leaf_page_refs(page_bytes, header_offset, &refs, page_type)
}

fn write_leaf_page_refs(page_bytes: &mut [u8], header_offset: usize, cells: &[&CellBytes], page_type: PageType) -> Result<()> {
    let header_size = page_type.header_size() as usize;
    let page_size = page_bytes.len();

    page_bytes[header_offset..].fill(0);

    let mut cell_content_start = page_size;
    let pointer_array_start = header_offset + header_size;

    for (i, cell) in cells.iter().enumerate() {
        cell_content_start -= cell.bytes.len();
        if cell_content_start < pointer_array_start + cells.len() * 2 {
            return Err(Error::corrupt("cells do not fit after layout (internal split-size error)"));
        }
        page_bytes[cell_content_start..cell_content_start + cell.bytes.len()].copy_from_slice(&cell.bytes);

        let ptr_offset = pointer_array_start + i * 2;
        page_bytes[ptr_offset..ptr_offset + 2].copy_from_slice(&(cell_content_start as u16).to_be_bytes());
    }

    let common = PageHeaderCommon::new(
        page_type.into(),
        0,
        cells.len() as u16,
        cell_content_start as u16,
        0,
    );
    common.write_into(&mut page_bytes[header_offset..header_offset + 8]);

    Ok(())
}

/// Builds an interior-table page from `(child_page, key)` pairs plus the
/// trailing right-most child (which carries no key). Splits the same way
/// leaf pages do when the cells don't fit.
pub fn layout_interior_table(
    page_bytes: &mut [u8],
    header_offset: usize,
    entries: &[(u32, i64)],
    right_most_child: u32,
) -> Result<Option<(Vec<(u32, i64)>, u32, i64)>> {
    let cells: Vec<CellBytes> = entries
        .iter()
        .map(|&(child, key)| CellBytes {
            bytes: encode_interior_table_cell(child, key),
            key,
        })
        .collect();

    let page_size = page_bytes.len();
    let header_size = PageType::InteriorTable.header_size() as usize;
    let pointer_area_end = header_offset + header_size + cells.len() * 2;
    let total: usize = cells.iter().map(|c| c.bytes.len()).sum();

    if pointer_area_end + total <= page_size {
        write_interior_page(page_bytes, header_offset, &cells, right_most_child)?;
        return Ok(None);
    }

    if entries.len() < 2 {
        return Err(Error::corrupt("interior page overflow with fewer than two entries"));
    }

    // The entry at `pivot` is promoted into the parent rather than kept on
    // either side: its key becomes the separator, and its child page
    // becomes the left page's right-most pointer.
    let pivot = entries.len() / 2;
    let left = &cells[..pivot];
    let separator_key = entries[pivot].1;
    let right_entries: Vec<(u32, i64)> = entries[pivot + 1..].to_vec();

    write_interior_page(page_bytes, header_offset, left, entries[pivot].0)?;

    Ok(Some((right_entries, right_most_child, separator_key)))
}

fn write_interior_page(page_bytes: &mut [u8], header_offset: usize, cells: &[CellBytes], right_most_child: u32) -> Result<()> {
    let header_size = PageType::InteriorTable.header_size() as usize;
    let page_size = page_bytes.len();

    page_bytes[header_offset..].fill(0);

    let mut cell_content_start = page_size;
    let pointer_array_start = header_offset + header_size;

    for (i, cell) in cells.iter().enumerate() {
        cell_content_start -= cell.bytes.len();
        page_bytes[cell_content_start..cell_content_start + cell.bytes.len()].copy_from_slice(&cell.bytes);
        let ptr_offset = pointer_array_start + i * 2;
        page_bytes[ptr_offset..ptr_offset + 2].copy_from_slice(&(cell_content_start as u16).to_be_bytes());
    }

    let common = PageHeaderCommon::new(
        PageType::InteriorTable.into(),
        0,
        cells.len() as u16,
        cell_content_start as u16,
        0,
    );
    common.write_into(&mut page_bytes[header_offset..header_offset + 8]);
    page_bytes[header_offset + 8..header_offset + 12].copy_from_slice(&right_most_child.to_be_bytes());

    Ok(())
}

pub fn encode_interior_table_cell(child_page: u32, key: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 9);
    out.extend_from_slice(&child_page.to_be_bytes());
    let mut buf = [0u8; 9];
    let n = crate::varint::write(key, &mut buf);
    out.extend_from_slice(&buf[..n]);
    out
}

/// Encodes a leaf-table cell whose payload is already guaranteed to be
/// local (no overflow). Callers needing overflow spill build the cell
/// bytes themselves via [`crate::btree::local_limits`] and
/// `crate::pager::Pager`-driven overflow page allocation.
pub fn encode_leaf_table_cell(row_id: i64, record: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(record.len() + 18);
    let mut buf = [0u8; 9];
    let n = crate::varint::write(record.len() as i64, &mut buf);
    out.extend_from_slice(&buf[..n]);
    let n = crate::varint::write(row_id, &mut buf);
    out.extend_from_slice(&buf[..n]);
    out.extend_from_slice(record);
    out
}

/// Encodes a leaf-index cell whose payload is already guaranteed to be
/// local (no overflow): a payload-length varint followed by the record
/// bytes. Unlike a table cell, there is no separate row id field — the
/// indexed record's own last column carries it.
pub fn encode_leaf_index_cell(record: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(record.len() + 9);
    let mut buf = [0u8; 9];
    let n = crate::varint::write(record.len() as i64, &mut buf);
    out.extend_from_slice(&buf[..n]);
    out.extend_from_slice(record);
    out
}

/// Encodes a leaf-table cell whose payload may have spilled to an overflow
/// chain: `local` is the in-page prefix already computed by the writer's
/// spill formula, `total_len` the full payload length, and `overflow_page`
/// the head of the chain carrying the rest.
pub fn encode_leaf_table_cell_spilled(row_id: i64, total_len: usize, local: &[u8], overflow_page: Option<u32>) -> Vec<u8> {
    let mut out = Vec::with_capacity(local.len() + 22);
    let mut buf = [0u8; 9];
    let n = crate::varint::write(total_len as i64, &mut buf);
    out.extend_from_slice(&buf[..n]);
    let n = crate::varint::write(row_id, &mut buf);
    out.extend_from_slice(&buf[..n]);
    out.extend_from_slice(local);
    if let Some(page) = overflow_page {
        out.extend_from_slice(&page.to_be_bytes());
    }
    out
}

pub use local_limits as cell_local_limits;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_cell_fits() {
        let mut page = vec![0u8; 512];
        let cell = CellBytes {
            bytes: encode_leaf_table_cell(1, b"hello"),
            key: 1,
        };
        let overflow = layout_leaf_table(&mut page, 0, &[cell]).unwrap();
        assert!(overflow.is_none());
    }

    #[test]
    fn test_many_cells_split() {
        let mut page = vec![0u8; 512];
        let cells: Vec<CellBytes> = (0..100)
            .map(|i| CellBytes {
                bytes: encode_leaf_table_cell(i, &vec![b'x'; 20]),
                key: i,
            })
            .collect();
        let overflow = layout_leaf_table(&mut page, 0, &cells).unwrap();
        assert!(overflow.is_some());
    }
}
