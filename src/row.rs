//! The row-level interface exposed to external callers: typed column
//! readers, field count, rowid, and a staleness flag.

use crate::error::{Error, Result};
use crate::pager::Pager;
use crate::record::{self, Record, Value};
use crate::schema::{ColumnKind, TableDef};

/// One decoded row, with merged-GUID columns already collapsed per the
/// owning table's [`TableDef`].
#[derive(Debug, Clone)]
pub struct Row {
    row_id: i64,
    values: Vec<Value>,
    data_version: u64,
}

impl Row {
    /// Decodes `payload` against `table`'s logical column list, collapsing
    /// any `__hi`/`__lo` pairs, and stamps the row with the pager's current
    /// `data_version` for later staleness checks.
    pub(crate) fn decode(table: &TableDef, row_id: i64, payload: &[u8], pager: &Pager) -> Result<Self> {
        let encoding = pager.header().text_encoding();
        let physical: Vec<Value> = Record::from(payload).values_with_encoding(encoding).collect();

        let mut values = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let value = match column.kind {
                ColumnKind::Plain => physical
                    .get(column.physical_columns[0])
                    .cloned()
                    .unwrap_or(Value::Null),
                ColumnKind::Guid => {
                    let hi_idx = column.physical_columns[0];
                    let lo_idx = column.physical_columns[1];
                    let hi = physical.get(hi_idx).and_then(Value::as_int64).unwrap_or(0);
                    let lo = physical.get(lo_idx).and_then(Value::as_int64).unwrap_or(0);
                    Value::Guid(record::hi_lo_to_guid(hi, lo))
                }
            };
            values.push(value);
        }

        Ok(Self {
            row_id,
            values,
            data_version: pager.data_version(),
        })
    }

    pub fn row_id(&self) -> i64 {
        self.row_id
    }

    pub fn field_count(&self) -> usize {
        self.values.len()
    }

    /// True once the pager has committed a write since this row was
    /// materialized.
    pub fn is_stale(&self, pager: &Pager) -> bool {
        pager.data_version() != self.data_version
    }

    fn value(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or_else(|| Error::invalid_argument(format!("column index {index} out of range")))
    }

    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.value(index)?.is_null())
    }

    pub fn get_int64(&self, index: usize) -> Result<Option<i64>> {
        Ok(self.value(index)?.as_int64())
    }

    pub fn get_double(&self, index: usize) -> Result<Option<f64>> {
        Ok(self.value(index)?.as_double())
    }

    pub fn get_text(&self, index: usize) -> Result<Option<&str>> {
        Ok(self.value(index)?.as_text())
    }

    pub fn get_blob(&self, index: usize) -> Result<Option<&[u8]>> {
        Ok(self.value(index)?.as_blob())
    }

    pub fn get_guid(&self, index: usize) -> Result<Option<[u8; 16]>> {
        Ok(self.value(index)?.as_guid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoopTransform;
    use crate::page_source::MemorySource;
    use crate::schema::Catalog;
    use crate::writer::{init_empty_database, Transaction};

    fn new_pager() -> Pager {
        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 50).unwrap();
        init_empty_database(&pager).unwrap();
        pager
    }

    #[test]
    fn test_decode_plain_columns() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let root = txn
            .create_table("widgets", "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let record = record::encode(&[Value::Int64(1), Value::Text("sprocket".to_owned())]);
        txn.insert_row(root, 1, &record).unwrap();
        txn.commit().unwrap();

        let catalog = Catalog::load(&pager).unwrap();
        let table = catalog.table("widgets").unwrap();
        let txn = Transaction::begin(&pager);
        let bytes = txn.get_row(root, 1).unwrap().unwrap();
        let row = Row::decode(table, 1, &bytes, &pager).unwrap();

        assert_eq!(row.row_id(), 1);
        assert_eq!(row.field_count(), 2);
        assert_eq!(row.get_int64(0).unwrap(), Some(1));
        assert_eq!(row.get_text(1).unwrap(), Some("sprocket"));
        assert!(!row.is_stale(&pager));
    }

    #[test]
    fn test_collapses_guid_column_on_read() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let root = txn
            .create_table(
                "widgets",
                "CREATE TABLE widgets (id INTEGER PRIMARY KEY, external_id__hi INTEGER, external_id__lo INTEGER)",
            )
            .unwrap();
        let guid = [0xABu8; 16];
        let (hi, lo) = record::guid_to_hi_lo(guid);
        let record = record::encode(&[Value::Int64(1), Value::Int64(hi), Value::Int64(lo)]);
        txn.insert_row(root, 1, &record).unwrap();
        txn.commit().unwrap();

        let catalog = Catalog::load(&pager).unwrap();
        let table = catalog.table("widgets").unwrap();
        assert_eq!(table.columns.len(), 2); // id, external_id (merged)

        let txn = Transaction::begin(&pager);
        let bytes = txn.get_row(root, 1).unwrap().unwrap();
        let row = Row::decode(table, 1, &bytes, &pager).unwrap();
        assert_eq!(row.get_guid(1).unwrap(), Some(guid));
    }

    #[test]
    fn test_is_stale_after_commit() {
        let pager = new_pager();
        let mut txn = Transaction::begin(&pager);
        let root = txn.create_table("t", "CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        txn.insert_row(root, 1, &record::encode(&[Value::Int64(1)])).unwrap();
        txn.commit().unwrap();

        let catalog = Catalog::load(&pager).unwrap();
        let table = catalog.table("t").unwrap();
        let txn = Transaction::begin(&pager);
        let bytes = txn.get_row(root, 1).unwrap().unwrap();
        let row = Row::decode(table, 1, &bytes, &pager).unwrap();

        let mut txn2 = Transaction::begin(&pager);
        txn2.insert_row(root, 2, &record::encode(&[Value::Int64(2)])).unwrap();
        txn2.commit().unwrap();

        assert!(row.is_stale(&pager));
    }
}
