//! Small cursor-like helpers for consuming bytes out of page and record
//! slices without copying, and for building up cell/record bytes when
//! writing.

use std::mem;
use std::ops::{Deref, DerefMut};

use zerocopy::{AsBytes, FromBytes};

use crate::varint;

pub trait Buf: Deref<Target = [u8]> {
    fn consume_bytes(&mut self, count: usize) -> &[u8];
    fn truncate(&mut self, new_len: usize);

    fn consume_varint(&mut self) -> i64 {
        let (result, len) = varint::read(self);
        self.consume_bytes(len);
        result
    }

    fn consume<T: FromBytes>(&mut self) -> T {
        let bytes = self.consume_bytes(mem::size_of::<T>());
        T::read_from(bytes).expect("slice length matches T")
    }
}

pub trait BufMut: DerefMut<Target = [u8]> + Extend<u8> {
    fn write_varint(&mut self, value: i64) {
        let mut buf = [0; 9];
        let len = varint::write(value, &mut buf);
        self.extend(buf[..len].iter().copied());
    }

    fn write<T: AsBytes>(&mut self, value: T) {
        self.extend(value.as_bytes().iter().copied());
    }
}

impl<'a> Buf for &'a [u8] {
    fn consume_bytes(&mut self, count: usize) -> &[u8] {
        let (result, rest) = self.split_at(count);
        *self = rest;
        result
    }

    fn truncate(&mut self, new_len: usize) {
        *self = &self[..new_len];
    }
}

impl BufMut for Vec<u8> {}
