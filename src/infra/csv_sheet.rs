use crate::app::ports::TextSink;
use crate::error::{Result, SyncError};
use crate::sanitize::CellValue;
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A local CSV file standing in for the spreadsheet. A missing file reads as
/// an empty sheet.
pub struct CsvSheet {
    path: PathBuf,
    name: String,
}

impl CsvSheet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn write_rows<W: std::io::Write>(
        writer: &mut csv::Writer<W>,
        rows: &[Vec<CellValue>],
    ) -> Result<()> {
        for row in rows {
            writer.write_record(row.iter().map(CellValue::to_text))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TextSink for CsvSheet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_all_rows(&self) -> Result<Vec<Vec<String>>> {
        let mut reader = match csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
        {
            Ok(reader) => reader,
            Err(e) => match e.kind() {
                csv::ErrorKind::Io(io) if io.kind() == ErrorKind::NotFound => {
                    debug!("{} does not exist yet", self.path.display());
                    return Ok(Vec::new());
                }
                _ => return Err(e.into()),
            },
        };

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, header: &[String], rows: &[Vec<CellValue>]) -> Result<()> {
        self.ensure_parent()?;
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        writer.write_record(header)?;
        Self::write_rows(&mut writer, rows)?;
        writer
            .flush()
            .map_err(|e| SyncError::sink(&self.name, e))?;
        info!("Wrote header and {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<CellValue>]) -> Result<()> {
        self.ensure_parent()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        Self::write_rows(&mut writer, rows)?;
        writer
            .flush()
            .map_err(|e| SyncError::sink(&self.name, e))?;
        info!("Appended {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let sheet = CsvSheet::new(dir.path().join("sheet.csv"));
        assert!(sheet.read_all_rows().await.unwrap().is_empty());
        sheet.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_then_append() {
        let dir = TempDir::new().unwrap();
        let sheet = CsvSheet::new(dir.path().join("nested").join("sheet.csv"));
        sheet
            .write_all(
                &["_uuid".to_string(), "zone".to_string()],
                &[vec![CellValue::Text("a".into()), CellValue::Number(14.5)]],
            )
            .await
            .unwrap();
        sheet
            .append_rows(&[vec![CellValue::Text("b, c".into()), CellValue::Null]])
            .await
            .unwrap();

        let rows = sheet.read_all_rows().await.unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["_uuid".to_string(), "zone".to_string()],
                vec!["a".to_string(), "14.5".to_string()],
                vec!["b, c".to_string(), "".to_string()],
            ]
        );

        sheet.clear().await.unwrap();
        assert!(sheet.read_all_rows().await.unwrap().is_empty());
    }
}
