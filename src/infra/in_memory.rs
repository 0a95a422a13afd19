use crate::app::ports::{SurveySource, TextSink, TypedSink};
use crate::error::{Result, SyncError};
use crate::sanitize::{CellValue, TypedTable};
use crate::types::RawRecord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

fn lock<'a, T>(mutex: &'a Mutex<T>, sink: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| SyncError::sink(sink, "lock poisoned"))
}

/// In-memory survey source for development/testing
#[derive(Clone, Default)]
pub struct InMemorySource {
    records: Arc<Mutex<Vec<RawRecord>>>,
    fail: Arc<AtomicBool>,
}

impl InMemorySource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_records(&self, records: Vec<RawRecord>) -> Result<()> {
        *lock(&self.records, "source")? = records;
        Ok(())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SurveySource for InMemorySource {
    async fn fetch_all(&self) -> Result<Vec<RawRecord>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Source {
                message: "source unavailable".to_string(),
            });
        }
        Ok(lock(&self.records, "source")?.clone())
    }
}

/// In-memory text sink. Cells are stored as text, the way a spreadsheet
/// hands them back.
#[derive(Clone, Default)]
pub struct InMemorySheet {
    rows: Arc<Mutex<Vec<Vec<String>>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl InMemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        let sheet = Self::default();
        if let Ok(mut guard) = sheet.rows.lock() {
            *guard = rows;
        }
        sheet
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn set_failing_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_failing_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of mutating calls that succeeded.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::sink("memory", "write rejected"));
        }
        Ok(())
    }

    fn text_row(row: &[CellValue]) -> Vec<String> {
        row.iter().map(CellValue::to_text).collect()
    }
}

#[async_trait]
impl TextSink for InMemorySheet {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SyncError::sink("memory", "read rejected"));
        }
        Ok(lock(&self.rows, "memory")?.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        lock(&self.rows, "memory")?.clear();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_all(&self, header: &[String], rows: &[Vec<CellValue>]) -> Result<()> {
        self.check_writable()?;
        let mut guard = lock(&self.rows, "memory")?;
        guard.clear();
        guard.push(header.to_vec());
        guard.extend(rows.iter().map(|r| Self::text_row(r)));
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!("Replaced sheet with {} rows", rows.len());
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<CellValue>]) -> Result<()> {
        self.check_writable()?;
        lock(&self.rows, "memory")?.extend(rows.iter().map(|r| Self::text_row(r)));
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!("Appended {} rows", rows.len());
        Ok(())
    }
}

/// In-memory typed sink keeping the last loaded table.
#[derive(Clone, Default)]
pub struct InMemoryWarehouse {
    table: Arc<Mutex<Option<TypedTable>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> Option<TypedTable> {
        self.table.lock().ok().and_then(|t| t.clone())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TypedSink for InMemoryWarehouse {
    fn name(&self) -> &str {
        "memory-warehouse"
    }

    async fn replace_table(&self, table: &TypedTable) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::sink(self.name(), "warehouse unreachable"));
        }
        *lock(&self.table, self.name())? = Some(table.clone());
        Ok(())
    }
}
