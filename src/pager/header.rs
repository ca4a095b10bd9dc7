//! The 100-byte file header, stored at the start of page 1, bit-exact with
//! the SQLite 3 file format.

use zerocopy::big_endian::{I32, U16, U32};
use zerocopy::{AsBytes, FromBytes};

const HEADER_STRING: [u8; 16] = *b"SQLite format 3\0";
const SHARC_VERSION_NUMBER: u32 = 3_045_000;
pub const HEADER_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    zerocopy::FromZeroes,
    zerocopy::FromBytes,
    zerocopy::AsBytes,
    zerocopy::Unaligned,
)]
#[repr(C)]
pub struct Header {
    header_string: [u8; 16],
    page_size: U16,
    write_version: u8,
    read_version: u8,
    reserved_space: u8,
    max_payload_fraction: u8,
    min_payload_fraction: u8,
    leaf_payload_fraction: u8,
    file_change_counter: U32,
    database_size: U32,
    freelist_head: U32,
    freelist_count: U32,
    schema_cookie: U32,
    schema_format: U32,
    page_cache_size: I32,
    largest_root_btree_page_number: U32,
    database_text_encoding: U32,
    user_version: U32,
    incremental_vacuum_mode: U32,
    application_id: U32,
    reserved: [u8; 20],
    version_valid_for: U32,
    sqlite_version_number: U32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            header_string: HEADER_STRING,
            page_size: 16.into(), // 16 * 256 = 4096
            write_version: 1,
            read_version: 1,
            reserved_space: 0,
            max_payload_fraction: 64,
            min_payload_fraction: 32,
            leaf_payload_fraction: 32,
            file_change_counter: 1.into(),
            database_size: 1.into(),
            freelist_head: 0.into(),
            freelist_count: 0.into(),
            schema_cookie: 0.into(),
            schema_format: 4.into(),
            page_cache_size: 0.into(),
            largest_root_btree_page_number: 0.into(),
            database_text_encoding: 1.into(),
            user_version: 0.into(),
            incremental_vacuum_mode: 0.into(),
            application_id: 0.into(),
            reserved: [0; 20],
            version_valid_for: 0.into(),
            sqlite_version_number: SHARC_VERSION_NUMBER.into(),
        }
    }
}

impl Header {
    pub fn read(bytes: &[u8]) -> crate::error::Result<Self> {
        let header = Self::read_from_prefix(bytes)
            .ok_or_else(|| crate::error::Error::corrupt("file shorter than the header"))?;
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;

        if self.header_string != HEADER_STRING {
            return Err(Error::corrupt("bad SQLite header magic"));
        }

        let page_size = self.page_size();
        if !page_size.is_power_of_two() || !(512..=65536).contains(&page_size) {
            return Err(Error::corrupt("invalid page size"));
        }
        if self.write_version > 2 || self.read_version > 2 {
            return Err(Error::unsupported("unsupported file format version"));
        }
        if self.max_payload_fraction != 64 || self.min_payload_fraction != 32
            || self.leaf_payload_fraction != 32
        {
            return Err(Error::corrupt("invalid payload fraction constants"));
        }
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        // A stored value of 1 represents the maximum page size, 65536.
        let raw = self.page_size.get() as u32;
        if raw == 1 {
            65536
        } else {
            raw * 256
        }
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        let encoded = if page_size == 65536 { 1 } else { (page_size / 256) as u16 };
        self.page_size = encoded.into();
    }

    pub fn file_change_counter(&self) -> u32 {
        self.file_change_counter.get()
    }

    pub fn bump_file_change_counter(&mut self) {
        self.file_change_counter = (self.file_change_counter.get() + 1).into();
        self.version_valid_for = self.file_change_counter;
    }

    pub fn database_size(&self) -> u32 {
        self.database_size.get()
    }

    pub fn set_database_size(&mut self, n: u32) {
        self.database_size = n.into();
    }

    pub fn freelist_head(&self) -> u32 {
        self.freelist_head.get()
    }

    pub fn set_freelist_head(&mut self, n: u32) {
        self.freelist_head = n.into();
    }

    pub fn freelist_count(&self) -> u32 {
        self.freelist_count.get()
    }

    pub fn set_freelist_count(&mut self, n: u32) {
        self.freelist_count = n.into();
    }

    pub fn schema_cookie(&self) -> u32 {
        self.schema_cookie.get()
    }

    pub fn bump_schema_cookie(&mut self) {
        self.schema_cookie = (self.schema_cookie.get() + 1).into();
    }

    pub fn largest_root_page(&self) -> u32 {
        self.largest_root_btree_page_number.get()
    }

    pub fn text_encoding(&self) -> TextEncoding {
        match self.database_text_encoding.get() {
            1 => TextEncoding::Utf8,
            2 => TextEncoding::Utf16Le,
            3 => TextEncoding::Utf16Be,
            _ => TextEncoding::Utf8,
        }
    }

    pub fn reserved_space(&self) -> u8 {
        self.reserved_space
    }

    pub fn usable_size(&self) -> u32 {
        self.page_size() - self.reserved_space() as u32
    }

    /// Byte offset of the first cell-relevant content on a page after its
    /// reserved-space trailer is excluded; the header page (page 1) also
    /// reserves the first 100 bytes for this struct.
    pub fn page_header_offset(page_number: u32) -> usize {
        if page_number == 1 {
            HEADER_SIZE
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trip() {
        let header = Header::default();
        let bytes = header.as_bytes().to_vec();
        let parsed = Header::read(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.page_size(), 4096);
    }

    #[test]
    fn test_max_page_size_encoding() {
        let mut header = Header::default();
        header.set_page_size(65536);
        assert_eq!(header.page_size(), 65536);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = Header::default().as_bytes().to_vec();
        bytes[0] = 0;
        assert!(Header::read(&bytes).is_err());
    }
}
