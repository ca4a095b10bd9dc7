//! Read-only support for overlaying a SQLite `-wal` file atop the main
//! database file. Sharc never writes WAL frames itself; it only reads WAL
//! files left behind by third-party SQLite processes.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use zerocopy::big_endian::U32;
use zerocopy::FromBytes;

use crate::error::{Error, Result};

const WAL_HEADER_SIZE: usize = 32;
const WAL_FRAME_HEADER_SIZE: usize = 24;
const WAL_MAGIC_LE: u32 = 0x377f_0682;
const WAL_MAGIC_BE: u32 = 0x377f_0683;

#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::Unaligned)]
#[repr(C)]
struct WalHeader {
    magic: U32,
    file_format: U32,
    page_size: U32,
    checkpoint_seq: U32,
    salt1: U32,
    salt2: U32,
    checksum1: U32,
    checksum2: U32,
}

#[derive(Debug, Clone, Copy, zerocopy::FromBytes, zerocopy::Unaligned)]
#[repr(C)]
struct WalFrameHeader {
    page_number: U32,
    db_size_after_commit: U32,
    salt1: U32,
    salt2: U32,
    checksum1: U32,
    checksum2: U32,
}

/// An index of the most recent *committed* WAL frame for each page number.
#[derive(Debug, Clone, Default)]
pub struct WalIndex {
    page_size: u32,
    /// Page number -> raw page bytes from the newest committed frame.
    frames: HashMap<u32, Vec<u8>>,
}

impl WalIndex {
    /// Opens and indexes the `-wal` file beside `db_path`, if it exists and
    /// is non-empty. Returns `None` when there is nothing to overlay.
    pub fn open_for(db_path: &Path) -> Result<Option<Self>> {
        let wal_path = wal_path_for(db_path);
        let bytes = match fs::read(&wal_path) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Self::from_bytes(&bytes).map(Some)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAL_HEADER_SIZE {
            return Err(Error::corrupt("WAL file shorter than its header"));
        }

        let header = WalHeader::read_from_prefix(bytes)
            .ok_or_else(|| Error::corrupt("malformed WAL header"))?;
        if header.magic.get() != WAL_MAGIC_LE && header.magic.get() != WAL_MAGIC_BE {
            return Err(Error::corrupt("bad WAL magic"));
        }
        let page_size = header.page_size.get();

        let mut frames: HashMap<u32, Vec<u8>> = HashMap::new();
        // Frames belonging to an in-progress (uncommitted) transaction are
        // buffered here and only merged into `frames` once we see the
        // commit frame (db_size_after_commit != 0) that ends the group.
        let mut pending: HashMap<u32, Vec<u8>> = HashMap::new();

        let frame_size = WAL_FRAME_HEADER_SIZE + page_size as usize;
        let mut offset = WAL_HEADER_SIZE;
        while offset + frame_size <= bytes.len() {
            let frame_bytes = &bytes[offset..offset + frame_size];
            let frame_header = WalFrameHeader::read_from_prefix(frame_bytes)
                .ok_or_else(|| Error::corrupt("malformed WAL frame header"))?;
            let page_number = frame_header.page_number.get();
            let page_data = frame_bytes[WAL_FRAME_HEADER_SIZE..].to_vec();

            pending.insert(page_number, page_data);

            if frame_header.db_size_after_commit.get() != 0 {
                // Commit boundary: everything buffered so far becomes
                // visible, most recent frame per page winning.
                for (page_number, data) in pending.drain() {
                    frames.insert(page_number, data);
                }
            }

            offset += frame_size;
        }

        Ok(Self { page_size, frames })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn read_page(&self, n: u32) -> Option<&[u8]> {
        self.frames.get(&n).map(|v| v.as_slice())
    }
}

fn wal_path_for(db_path: &Path) -> std::path::PathBuf {
    let mut os = db_path.as_os_str().to_owned();
    os.push("-wal");
    std::path::PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn build_wal(page_size: u32, frames: &[(u32, u8, u32)]) -> Vec<u8> {
        // frames: (page_number, fill_byte, db_size_after_commit)
        let mut buf = Vec::new();
        push_u32(&mut buf, WAL_MAGIC_BE);
        push_u32(&mut buf, 3007000);
        push_u32(&mut buf, page_size);
        push_u32(&mut buf, 0);
        push_u32(&mut buf, 1);
        push_u32(&mut buf, 2);
        push_u32(&mut buf, 0);
        push_u32(&mut buf, 0);

        for &(page_number, fill, commit) in frames {
            push_u32(&mut buf, page_number);
            push_u32(&mut buf, commit);
            push_u32(&mut buf, 1);
            push_u32(&mut buf, 2);
            push_u32(&mut buf, 0);
            push_u32(&mut buf, 0);
            buf.extend(std::iter::repeat(fill).take(page_size as usize));
        }

        buf
    }

    #[test]
    fn test_uncommitted_frame_not_visible() {
        let wal = build_wal(512, &[(1, 0xAA, 0)]);
        let index = WalIndex::from_bytes(&wal).unwrap();
        assert!(index.read_page(1).is_none());
    }

    #[test]
    fn test_committed_frame_visible_and_latest_wins() {
        let wal = build_wal(
            512,
            &[(1, 0xAA, 0), (1, 0xBB, 3), (1, 0xCC, 0) /* uncommitted */],
        );
        let index = WalIndex::from_bytes(&wal).unwrap();
        let page = index.read_page(1).unwrap();
        assert!(page.iter().all(|&b| b == 0xBB));
    }
}
