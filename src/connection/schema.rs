//! Schema introspection: primary keys and their caches.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// The primary key of a table, as declared in its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    /// No explicit primary key; SQLite's implicit rowid backs the table.
    None,
    /// A single column declared with SQL type exactly `INTEGER`
    /// (case-insensitive): an alias for the rowid.
    RowidAlias { column: String },
    /// One or more regular primary key columns.
    Regular { columns: Vec<String> },
}

impl PrimaryKey {
    /// Declared primary key columns, in key order. Empty for [`Self::None`].
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            Self::None => &[],
            Self::RowidAlias { column } => std::slice::from_ref(column),
            Self::Regular { columns } => columns,
        }
    }

    /// The rowid-aliasing column, when the key is one.
    #[must_use]
    pub fn rowid_column(&self) -> Option<&str> {
        match self {
            Self::RowidAlias { column } => Some(column),
            _ => None,
        }
    }
}

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone)]
pub(crate) struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    /// 1-based position within the primary key; 0 when not part of it.
    pub primary_key_position: i64,
}

/// Derive the primary key from a table's column list.
pub(crate) fn primary_key_from_columns(columns: &[ColumnInfo]) -> PrimaryKey {
    let mut key_columns: Vec<&ColumnInfo> = columns
        .iter()
        .filter(|column| column.primary_key_position > 0)
        .collect();
    key_columns.sort_by_key(|column| column.primary_key_position);

    match key_columns.as_slice() {
        [] => PrimaryKey::None,
        [single] if single.sql_type.trim().eq_ignore_ascii_case("INTEGER") => {
            PrimaryKey::RowidAlias {
                column: single.name.clone(),
            }
        }
        keys => PrimaryKey::Regular {
            columns: keys.iter().map(|column| column.name.clone()).collect(),
        },
    }
}

/// Per-connection schema cache. Accessed only on the connection's worker.
#[derive(Debug, Default)]
pub(crate) struct SchemaCache {
    primary_keys: HashMap<String, Arc<PrimaryKey>>,
}

impl SchemaCache {
    pub(crate) fn primary_key(&self, table: &str) -> Option<Arc<PrimaryKey>> {
        self.primary_keys.get(&table.to_ascii_lowercase()).cloned()
    }

    pub(crate) fn store_primary_key(&mut self, table: &str, key: Arc<PrimaryKey>) {
        self.primary_keys.insert(table.to_ascii_lowercase(), key);
    }

    pub(crate) fn clear(&mut self) {
        self.primary_keys.clear();
    }
}

/// Pool-wide schema cache shared by the writer and every reader.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedSchemaCache {
    primary_keys: Arc<RwLock<HashMap<String, Arc<PrimaryKey>>>>,
}

impl SharedSchemaCache {
    pub(crate) fn primary_key(&self, table: &str) -> Option<Arc<PrimaryKey>> {
        self.primary_keys
            .read()
            .get(&table.to_ascii_lowercase())
            .cloned()
    }

    pub(crate) fn store_primary_key(&self, table: &str, key: Arc<PrimaryKey>) {
        self.primary_keys
            .write()
            .insert(table.to_ascii_lowercase(), key);
    }

    pub(crate) fn clear(&self) {
        self.primary_keys.write().clear();
    }
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, sql_type: &str, pk: i64) -> ColumnInfo {
        ColumnInfo {
            name: name.to_owned(),
            sql_type: sql_type.to_owned(),
            primary_key_position: pk,
        }
    }

    #[test]
    fn integer_single_column_key_is_rowid_alias() {
        let key = primary_key_from_columns(&[column("id", "integer", 1), column("name", "TEXT", 0)]);
        assert_eq!(
            key,
            PrimaryKey::RowidAlias {
                column: "id".to_owned()
            }
        );
    }

    #[test]
    fn non_integer_single_column_key_is_regular() {
        let key = primary_key_from_columns(&[column("uuid", "TEXT", 1)]);
        assert_eq!(
            key,
            PrimaryKey::Regular {
                columns: vec!["uuid".to_owned()]
            }
        );
        // INT is not INTEGER: no rowid alias.
        let key = primary_key_from_columns(&[column("id", "INT", 1)]);
        assert!(matches!(key, PrimaryKey::Regular { .. }));
    }

    #[test]
    fn composite_keys_keep_declaration_order() {
        let key = primary_key_from_columns(&[
            column("b", "INTEGER", 2),
            column("a", "INTEGER", 1),
        ]);
        assert_eq!(
            key,
            PrimaryKey::Regular {
                columns: vec!["a".to_owned(), "b".to_owned()]
            }
        );
    }

    #[test]
    fn no_declared_key_means_implicit_rowid() {
        let key = primary_key_from_columns(&[column("x", "TEXT", 0)]);
        assert_eq!(key, PrimaryKey::None);
    }

    #[test]
    fn identifier_quoting_escapes_embedded_quotes() {
        assert_eq!(quote_identifier("readers"), "\"readers\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
