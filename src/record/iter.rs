use crate::buf::Buf;
use crate::pager::header::TextEncoding;
use crate::varint;

use super::{SerialType, Value};

pub struct SerialTypeIterator<'a> {
    header_len: u64,
    data: &'a [u8],
}

pub struct ValueIterator<'a> {
    types: SerialTypeIterator<'a>,
    data: &'a [u8],
    encoding: TextEncoding,
}

impl<'a> SerialTypeIterator<'a> {
    pub(super) fn new(mut data: &'a [u8]) -> Self {
        let (header_len, len) = varint::read(data);
        data.truncate(header_len as usize);
        data.consume_bytes(len);
        Self {
            header_len: header_len as u64,
            data,
        }
    }
}

impl<'a> ValueIterator<'a> {
    pub(super) fn new(mut data: &'a [u8], encoding: TextEncoding) -> Self {
        let types = SerialTypeIterator::new(data);
        data.consume_bytes(types.header_len as usize);
        Self { types, data, encoding }
    }
}

impl<'a> Iterator for SerialTypeIterator<'a> {
    type Item = SerialType;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.data.is_empty() {
            let ty = self.data.consume_varint();
            Some(SerialType::from(ty as u64))
        } else {
            None
        }
    }
}

impl<'a> Iterator for ValueIterator<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Self::Item> {
        let ty = self.types.next()?;
        Some(Value::consume(ty, &mut self.data, self.encoding))
    }
}
