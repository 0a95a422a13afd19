use crate::app::ports::TypedSink;
use crate::error::{Result, SyncError};
use crate::sanitize::{CellValue, TypedTable};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::PathBuf;
use tracing::{info, instrument};

/// Typed warehouse backed by a SQLite file. Every load drops and recreates
/// the table inside one transaction.
pub struct SqliteWarehouse {
    path: PathBuf,
    table: String,
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_value(cell: &CellValue) -> SqlValue {
    match cell {
        CellValue::Null => SqlValue::Null,
        CellValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        CellValue::Integer(i) => SqlValue::Integer(*i),
        CellValue::Number(n) => SqlValue::Real(*n),
        CellValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

impl SqliteWarehouse {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
        }
    }

    fn load(path: PathBuf, table_name: String, table: TypedTable) -> Result<usize> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(&path)?;
        let quoted = quote_identifier(&table_name);
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.sql_name()))
            .collect();
        let placeholders: Vec<String> = (1..=table.columns.len()).map(|i| format!("?{}", i)).collect();

        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {quoted}; CREATE TABLE {quoted} ({});",
            columns.join(", ")
        ))?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({})",
                quoted,
                placeholders.join(", ")
            ))?;
            for row in &table.rows {
                insert.execute(params_from_iter(row.iter().map(sql_value)))?;
            }
        }
        tx.commit()?;
        Ok(table.rows.len())
    }
}

#[async_trait]
impl TypedSink for SqliteWarehouse {
    fn name(&self) -> &str {
        &self.table
    }

    #[instrument(skip(self, table), fields(table = %self.table))]
    async fn replace_table(&self, table: &TypedTable) -> Result<()> {
        if table.columns.is_empty() {
            return Err(SyncError::sink(&self.table, "table has no columns"));
        }
        let (path, name, table) = (self.path.clone(), self.table.clone(), table.clone());
        let rows = tokio::task::spawn_blocking(move || Self::load(path, name, table))
            .await
            .map_err(|e| SyncError::sink(&self.table, e))??;
        info!("Loaded {} rows into {}", rows, self.table);
        Ok(())
    }
}
