//! Byte-level layout helpers for freelist trunk pages: a 4-byte next-trunk
//! pointer, a 4-byte leaf count, then that many 4-byte leaf-page pointers.

use zerocopy::big_endian::U32;
use zerocopy::{AsBytes, FromBytes};

pub const TRUNK_HEADER_SIZE: usize = 8;

pub fn max_leaves_per_trunk(usable_size: u32) -> usize {
    (usable_size as usize - TRUNK_HEADER_SIZE) / 4
}

pub fn next_trunk(page: &[u8]) -> u32 {
    U32::read_from_prefix(page).expect("trunk page at least 8 bytes").get()
}

pub fn set_next_trunk(page: &mut [u8], n: u32) {
    U32::from(n).write_to_prefix(page).unwrap();
}

pub fn leaf_count(page: &[u8]) -> u32 {
    U32::read_from_prefix(&page[4..]).expect("trunk page at least 8 bytes").get()
}

pub fn set_leaf_count(page: &mut [u8], n: u32) {
    U32::from(n).write_to_prefix(&mut page[4..]).unwrap();
}

pub fn leaf_at(page: &[u8], index: usize) -> u32 {
    let offset = TRUNK_HEADER_SIZE + index * 4;
    U32::read_from_prefix(&page[offset..]).expect("leaf pointer in bounds").get()
}

pub fn set_leaf_at(page: &mut [u8], index: usize, value: u32) {
    let offset = TRUNK_HEADER_SIZE + index * 4;
    U32::from(value).write_to_prefix(&mut page[offset..]).unwrap();
}

pub fn init_trunk(page: &mut [u8], next_trunk_page: u32) {
    set_next_trunk(page, next_trunk_page);
    set_leaf_count(page, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trunk_round_trip() {
        let mut page = vec![0u8; 512];
        init_trunk(&mut page, 7);
        set_leaf_count(&mut page, 2);
        set_leaf_at(&mut page, 0, 10);
        set_leaf_at(&mut page, 1, 11);

        assert_eq!(next_trunk(&page), 7);
        assert_eq!(leaf_count(&page), 2);
        assert_eq!(leaf_at(&page, 0), 10);
        assert_eq!(leaf_at(&page, 1), 11);
    }
}
