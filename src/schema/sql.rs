//! A small recursive-descent parser over the column list of a `CREATE
//! TABLE`/`CREATE INDEX` statement.
//!
//! This only needs to extract column names, declared types, and a handful
//! of constraint keywords out of `sqlite_schema.sql` text; it is not a
//! general SQL parser, so a hand-written scanner over the paren-delimited
//! column list reads more clearly here than pulling in a parser-combinator
//! crate for a single, narrow grammar.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedColumn {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedCreateTable {
    pub columns: Vec<ParsedColumn>,
    pub without_rowid: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedCreateIndex {
    pub table_name: String,
    pub columns: Vec<String>,
}

struct Scanner<'a> {
    chars: std::str::Chars<'a>,
    peeked: Option<char>,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars(),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Option<char> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn bump(&mut self) -> Option<char> {
        if let Some(c) = self.peeked.take() {
            return Some(c);
        }
        self.chars.next()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    /// Reads a bare identifier or a `"quoted"`/`` `backtick` ``/`[bracketed]` one.
    fn identifier(&mut self) -> Option<String> {
        self.skip_whitespace();
        match self.peek() {
            Some('"') | Some('`') => {
                let quote = self.bump().unwrap();
                let mut s = String::new();
                while let Some(c) = self.bump() {
                    if c == quote {
                        break;
                    }
                    s.push(c);
                }
                Some(s)
            }
            Some('[') => {
                self.bump();
                let mut s = String::new();
                while let Some(c) = self.bump() {
                    if c == ']' {
                        break;
                    }
                    s.push(c);
                }
                Some(s)
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
                    s.push(self.bump().unwrap());
                }
                Some(s)
            }
            _ => None,
        }
    }

    /// Skips a balanced parenthesized group, e.g. a `CHECK(...)` clause or
    /// a type's `(10, 2)` precision arguments.
    fn skip_parens(&mut self) {
        self.skip_whitespace();
        if self.peek() != Some('(') {
            return;
        }
        self.bump();
        let mut depth = 1;
        while depth > 0 {
            match self.bump() {
                Some('(') => depth += 1,
                Some(')') => depth -= 1,
                Some(_) => {}
                None => break,
            }
        }
    }

    /// Consumes up to (not including) the next top-level comma or the
    /// closing paren of the enclosing column list, returning the raw text.
    fn rest_of_clause(&mut self) -> String {
        let mut out = String::new();
        let mut depth = 0;
        loop {
            match self.peek() {
                Some('(') => {
                    depth += 1;
                    out.push(self.bump().unwrap());
                }
                Some(')') if depth > 0 => {
                    depth -= 1;
                    out.push(self.bump().unwrap());
                }
                Some(')') | Some(',') | None => break,
                Some(_) => out.push(self.bump().unwrap()),
            }
        }
        out
    }
}

/// Parses the column list out of a `CREATE TABLE name (...)` statement.
/// Table-level constraints (`PRIMARY KEY (...)`, `FOREIGN KEY`, `CHECK`,
/// `UNIQUE`) are recognized and skipped rather than interpreted.
pub fn parse_create_table(sql: &str) -> Result<ParsedCreateTable> {
    let lower = sql.to_ascii_lowercase();
    let open = sql.find('(').ok_or_else(|| Error::corrupt("CREATE TABLE missing column list"))?;
    let close = sql.rfind(')').ok_or_else(|| Error::corrupt("CREATE TABLE missing closing paren"))?;
    if close <= open {
        return Err(Error::corrupt("CREATE TABLE has unbalanced parens"));
    }
    let body = &sql[open + 1..close];
    let without_rowid = lower[close..].contains("without rowid");

    let mut columns = Vec::new();
    let mut scanner = Scanner::new(body);
    loop {
        scanner.skip_whitespace();
        let Some(name) = scanner.identifier() else { break };

        let lower_name = name.to_ascii_lowercase();
        if matches!(
            lower_name.as_str(),
            "primary" | "unique" | "check" | "foreign" | "constraint"
        ) {
            // A table-level constraint, not a column definition.
            scanner.skip_parens();
            let _ = scanner.rest_of_clause();
        } else {
            let declared_type = scanner.identifier().unwrap_or_default();
            scanner.skip_parens();
            let clause = scanner.rest_of_clause();
            let clause_lower = clause.to_ascii_lowercase();
            columns.push(ParsedColumn {
                name,
                declared_type,
                not_null: clause_lower.contains("not null"),
                primary_key: clause_lower.contains("primary key"),
            });
        }

        scanner.skip_whitespace();
        match scanner.peek() {
            Some(',') => {
                scanner.bump();
            }
            _ => break,
        }
    }

    if columns.is_empty() && !without_rowid_has_explicit_columns(body) {
        return Err(Error::corrupt("CREATE TABLE declares no columns"));
    }

    Ok(ParsedCreateTable { columns, without_rowid })
}

fn without_rowid_has_explicit_columns(body: &str) -> bool {
    !body.trim().is_empty()
}

/// Parses `CREATE INDEX name ON table (col, col, ...)`.
pub fn parse_create_index(sql: &str) -> Result<ParsedCreateIndex> {
    let lower = sql.to_ascii_lowercase();
    let on = lower.find(" on ").ok_or_else(|| Error::corrupt("CREATE INDEX missing ON clause"))?;
    let rest = &sql[on + 4..];

    let mut scanner = Scanner::new(rest);
    let table_name = scanner
        .identifier()
        .ok_or_else(|| Error::corrupt("CREATE INDEX missing table name"))?;

    scanner.skip_whitespace();
    if scanner.peek() != Some('(') {
        return Err(Error::corrupt("CREATE INDEX missing column list"));
    }
    scanner.bump();

    let mut columns = Vec::new();
    loop {
        scanner.skip_whitespace();
        let Some(name) = scanner.identifier() else { break };
        columns.push(name);
        let _ = scanner.rest_of_clause(); // skip COLLATE/ASC/DESC modifiers
        scanner.skip_whitespace();
        match scanner.peek() {
            Some(',') => {
                scanner.bump();
            }
            _ => break,
        }
    }

    Ok(ParsedCreateIndex { table_name, columns })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_table() {
        let parsed = parse_create_table("CREATE TABLE empty (id integer not null primary key)").unwrap();
        assert_eq!(parsed.columns.len(), 1);
        assert_eq!(parsed.columns[0].name, "id");
        assert_eq!(parsed.columns[0].declared_type, "integer");
        assert!(parsed.columns[0].not_null);
        assert!(parsed.columns[0].primary_key);
        assert!(!parsed.without_rowid);
    }

    #[test]
    fn test_parse_multi_column_with_quoted_names() {
        let parsed = parse_create_table(
            r#"CREATE TABLE "strings" ("string" TEXT NOT NULL, created_at__hi INTEGER, created_at__lo INTEGER)"#,
        )
        .unwrap();
        assert_eq!(parsed.columns.len(), 3);
        assert_eq!(parsed.columns[0].name, "string");
        assert_eq!(parsed.columns[1].name, "created_at__hi");
        assert_eq!(parsed.columns[2].name, "created_at__lo");
    }

    #[test]
    fn test_parse_without_rowid() {
        let parsed = parse_create_table("CREATE TABLE t (a TEXT PRIMARY KEY) WITHOUT ROWID").unwrap();
        assert!(parsed.without_rowid);
    }

    #[test]
    fn test_skips_table_level_constraints() {
        let parsed = parse_create_table(
            "CREATE TABLE t (a INTEGER, b INTEGER, PRIMARY KEY (a, b), CHECK (a > 0))",
        )
        .unwrap();
        assert_eq!(parsed.columns.len(), 2);
    }

    #[test]
    fn test_parse_create_index() {
        let parsed = parse_create_index("CREATE INDEX idx_strings ON strings (string)").unwrap();
        assert_eq!(parsed.table_name, "strings");
        assert_eq!(parsed.columns, vec!["string".to_owned()]);
    }
}
