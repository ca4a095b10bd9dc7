//! The schema catalog: parses `sqlite_schema` into typed table/index
//! definitions, collapsing merged-GUID column pairs.

pub mod sql;

use std::collections::HashMap;

use tracing::debug;

use crate::btree::Cursor;
use crate::error::{Error, Result};
use crate::pager::Pager;
use crate::record::Record;

use self::sql::{parse_create_index, parse_create_table};

pub const SQLITE_SCHEMA_ROOT_PAGE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Table,
    Index,
    View,
    Trigger,
}

impl ObjectType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(Self::Table),
            "index" => Some(Self::Index),
            "view" => Some(Self::View),
            "trigger" => Some(Self::Trigger),
            _ => None,
        }
    }
}

/// One logical column, after collapsing a `__hi`/`__lo` integer pair (if
/// any) into a single GUID column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Plain,
    /// The index of the matching `__lo` column in `TableDef::columns` is
    /// not stored here; both halves are collapsed into one `ColumnDef`
    /// whose `physical_columns` names the hi/lo pair.
    Guid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub kind: ColumnKind,
    /// Physical column index/indices backing this logical column: one
    /// entry for a plain column, two (`hi`, `lo`) for a merged GUID.
    pub physical_columns: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub root_page: u32,
    pub sql: String,
    pub without_rowid: bool,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rowid_column(&self) -> Option<&ColumnDef> {
        if self.without_rowid {
            return None;
        }
        self.columns
            .iter()
            .find(|c| c.primary_key && c.declared_type.eq_ignore_ascii_case("integer"))
    }

    /// Fails with `UnsupportedFeature` for a `WITHOUT ROWID` table. Called
    /// wherever a caller is about to open a cursor or look up a row by
    /// rowid, since this engine only walks rowid-keyed btrees.
    pub fn require_rowid_table(&self) -> Result<()> {
        if self.without_rowid {
            return Err(Error::unsupported(format!("{} is a WITHOUT ROWID table", self.name)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub table_name: String,
    pub root_page: u32,
    pub sql: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
    indexes: HashMap<String, IndexDef>,
}

impl Catalog {
    /// Loads the catalog by walking `sqlite_schema`.
    pub fn load(pager: &Pager) -> Result<Self> {
        let mut catalog = Self::default();
        let cursor = Cursor::table(pager, SQLITE_SCHEMA_ROOT_PAGE)?;

        for entry in cursor {
            let entry = entry?;
            let record = Record::from(entry.payload.as_slice());
            let values: Vec<_> = record.values().collect();
            if values.len() < 5 {
                return Err(Error::corrupt("sqlite_schema row has fewer than 5 columns"));
            }

            let type_str = values[0].as_text().unwrap_or_default();
            let name = values[1].as_text().unwrap_or_default().to_owned();
            let table_name = values[2].as_text().unwrap_or_default().to_owned();
            let root_page = values[3].as_int64().unwrap_or(0) as u32;
            let sql = values[4].as_text().unwrap_or_default().to_owned();

            let Some(object_type) = ObjectType::parse(type_str) else {
                debug!(object_type = type_str, "skipping unrecognized sqlite_schema object type");
                continue;
            };

            match object_type {
                ObjectType::Table => {
                    if sql.is_empty() {
                        continue; // internal objects (e.g. sequence tables) with no SQL text
                    }
                    let parsed = parse_create_table(&sql)?;
                    // A WITHOUT ROWID table is still recorded so it shows up
                    // in the catalog; it just carries no queryable column
                    // list, since nothing here walks its index-organized
                    // btree. Opening a cursor on it is refused later, at the
                    // point a caller resolves this `TableDef` into a root
                    // page (see `require_rowid_table`).
                    let columns = if parsed.without_rowid {
                        Vec::new()
                    } else {
                        collapse_guid_columns(parsed.columns)
                    };
                    catalog.tables.insert(
                        name.clone(),
                        TableDef {
                            name,
                            root_page,
                            sql,
                            without_rowid: parsed.without_rowid,
                            columns,
                        },
                    );
                }
                ObjectType::Index => {
                    if sql.is_empty() {
                        continue; // auto-indexes backing inline UNIQUE/PRIMARY KEY constraints
                    }
                    let parsed = parse_create_index(&sql)?;
                    catalog.indexes.insert(
                        name.clone(),
                        IndexDef {
                            name,
                            table_name: parsed.table_name,
                            root_page,
                            sql,
                            columns: parsed.columns,
                        },
                    );
                }
                ObjectType::View | ObjectType::Trigger => {
                    let _ = table_name;
                }
            }
        }

        Ok(catalog)
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.get(name)
    }

    pub fn indexes_on(&self, table_name: &str) -> impl Iterator<Item = &IndexDef> {
        self.indexes.values().filter(move |i| i.table_name == table_name)
    }
}

/// Collapses adjacent `<base>__hi`/`<base>__lo` integer column pairs into
/// one logical GUID column.
fn collapse_guid_columns(parsed: Vec<sql::ParsedColumn>) -> Vec<ColumnDef> {
    let mut out = Vec::with_capacity(parsed.len());
    let mut i = 0;
    while i < parsed.len() {
        let col = &parsed[i];
        if let Some(base) = col.name.strip_suffix("__hi") {
            if let Some(next) = parsed.get(i + 1) {
                if next.name == format!("{base}__lo")
                    && col.declared_type.eq_ignore_ascii_case("integer")
                    && next.declared_type.eq_ignore_ascii_case("integer")
                {
                    out.push(ColumnDef {
                        name: base.to_owned(),
                        declared_type: "guid".to_owned(),
                        not_null: col.not_null || next.not_null,
                        primary_key: col.primary_key || next.primary_key,
                        kind: ColumnKind::Guid,
                        physical_columns: vec![i, i + 1],
                    });
                    i += 2;
                    continue;
                }
            }
        }

        out.push(ColumnDef {
            name: col.name.clone(),
            declared_type: col.declared_type.clone(),
            not_null: col.not_null,
            primary_key: col.primary_key,
            kind: ColumnKind::Plain,
            physical_columns: vec![i],
        });
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::sql::ParsedColumn;

    fn col(name: &str, ty: &str) -> ParsedColumn {
        ParsedColumn {
            name: name.to_owned(),
            declared_type: ty.to_owned(),
            not_null: false,
            primary_key: false,
        }
    }

    #[test]
    fn test_collapses_hi_lo_pair() {
        let columns = collapse_guid_columns(vec![
            col("id", "integer"),
            col("external_id__hi", "integer"),
            col("external_id__lo", "integer"),
            col("label", "text"),
        ]);

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[1].name, "external_id");
        assert_eq!(columns[1].kind, ColumnKind::Guid);
        assert_eq!(columns[1].physical_columns, vec![1, 2]);
    }

    #[test]
    fn test_does_not_collapse_mismatched_types() {
        let columns = collapse_guid_columns(vec![col("a__hi", "integer"), col("a__lo", "text")]);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].kind, ColumnKind::Plain);
    }

    #[test]
    fn test_load_tolerates_without_rowid_table_alongside_ordinary_one() {
        use crate::crypto::NoopTransform;
        use crate::page_source::MemorySource;
        use crate::writer::{init_empty_database, Transaction};

        let source = Box::new(MemorySource::new(512));
        let pager = Pager::create(source, Box::new(NoopTransform), 512, 50).unwrap();
        init_empty_database(&pager).unwrap();

        let mut txn = Transaction::begin(&pager);
        txn.create_table("widgets", "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        txn.create_table("kv", "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID").unwrap();
        txn.commit().unwrap();

        let catalog = Catalog::load(&pager).unwrap();

        let widgets = catalog.table("widgets").unwrap();
        assert!(!widgets.without_rowid);
        assert!(widgets.require_rowid_table().is_ok());

        let kv = catalog.table("kv").unwrap();
        assert!(kv.without_rowid);
        assert!(kv.columns.is_empty());
        assert!(kv.require_rowid_table().is_err());
    }
}
