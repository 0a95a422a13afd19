pub mod csv_sheet;
pub mod google_sheet;
pub mod in_memory;
pub mod kobo;
pub mod sqlite_warehouse;

pub use csv_sheet::CsvSheet;
pub use google_sheet::GoogleSheet;
pub use in_memory::{InMemorySheet, InMemorySource, InMemoryWarehouse};
pub use kobo::KoboClient;
pub use sqlite_warehouse::SqliteWarehouse;

use crate::app::ports::{TextSink, TypedSink};
use crate::config::{SheetConfig, WarehouseConfig};
use crate::error::Result;
use std::sync::Arc;

/// Builds the configured text sink.
pub fn text_sink(config: &SheetConfig) -> Result<Arc<dyn TextSink>> {
    let sink: Arc<dyn TextSink> = match config {
        SheetConfig::Google {
            spreadsheet_id,
            worksheet,
            token_env,
            timeout_secs,
        } => Arc::new(GoogleSheet::from_env(
            spreadsheet_id,
            worksheet,
            token_env,
            *timeout_secs,
        )?),
        SheetConfig::Csv { path } => Arc::new(CsvSheet::new(path.clone())),
    };
    Ok(sink)
}

pub fn typed_sink(config: Option<&WarehouseConfig>) -> Option<Arc<dyn TypedSink>> {
    config.map(|c| -> Arc<dyn TypedSink> {
        match c {
            WarehouseConfig::Sqlite { path, table } => {
                Arc::new(SqliteWarehouse::new(path.clone(), table.clone()))
            }
        }
    })
}
