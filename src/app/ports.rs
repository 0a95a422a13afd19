use crate::error::Result;
use crate::sanitize::{CellValue, TypedTable};
use crate::types::RawRecord;
use async_trait::async_trait;

// Source port
#[async_trait]
pub trait SurveySource: Send + Sync {
    /// Every record currently held by the collection service.
    async fn fetch_all(&self) -> Result<Vec<RawRecord>>;
}

/// Destination A: a text-only, row-oriented sheet. It is the authoritative
/// record of what has been synced.
#[async_trait]
pub trait TextSink: Send + Sync {
    fn name(&self) -> &str;

    /// Every non-empty row; row 0 is the header.
    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>>;

    async fn clear(&self) -> Result<()>;

    /// Replaces the sink's contents with `header` followed by `rows`.
    async fn write_all(&self, header: &[String], rows: &[Vec<CellValue>]) -> Result<()>;

    async fn append_rows(&self, rows: &[Vec<CellValue>]) -> Result<()>;
}

/// Destination B: a typed table that is replaced wholesale.
#[async_trait]
pub trait TypedSink: Send + Sync {
    fn name(&self) -> &str;

    async fn replace_table(&self, table: &TypedTable) -> Result<()>;
}
