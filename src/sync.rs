use crate::types::{RawRecord, SurveyRecord};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

/// Contents of the text sink as read at run start. Row 0 of the sink is the
/// header; short rows are padded with empty cells on access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetSnapshot {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetSnapshot {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let mut rows = rows.into_iter();
        let header: Vec<String> = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        // Fully blank rows carry no record
        let rows = rows
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();
        Self { header, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.header.iter().all(|h| h.is_empty()) && self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
    }

    /// Rows as field maps; empty cells become null.
    pub fn records(&self) -> Vec<RawRecord> {
        self.rows
            .iter()
            .map(|row| {
                self.header
                    .iter()
                    .enumerate()
                    .filter(|(_, name)| !name.is_empty())
                    .map(|(i, name)| {
                        let value = match row.get(i).map(|c| c.as_str()) {
                            Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                            _ => Value::Null,
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Identifiers already present in the destination as of run start.
/// Rebuilt from the sink on every run and never refreshed mid-run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    ids: HashSet<String>,
}

impl SyncState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Reads the identifier column. A sheet without that column yields an
    /// empty state.
    pub fn from_snapshot(snapshot: &SheetSnapshot, id_column: &str) -> Self {
        let Some(column) = snapshot.column(id_column) else {
            if !snapshot.is_empty() {
                warn!(
                    "Destination has no '{}' column; every record is treated as new",
                    id_column
                );
            }
            return Self::empty();
        };
        Self::from_ids(
            (0..snapshot.rows.len())
                .filter_map(|row| snapshot.cell(row, column))
                .map(str::trim)
                .filter(|id| !id.is_empty()),
        )
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub new_records: Vec<SurveyRecord>,
    pub already_synced: usize,
    pub duplicates_in_batch: usize,
}

/// Keeps records whose identifier is not in `state`. A repeated identifier
/// within the batch keeps its first occurrence only.
pub fn filter_new(records: Vec<SurveyRecord>, state: &SyncState) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    let mut seen = HashSet::new();

    for record in records {
        if state.contains(&record.id) {
            outcome.already_synced += 1;
        } else if !seen.insert(record.id.clone()) {
            outcome.duplicates_in_batch += 1;
        } else {
            outcome.new_records.push(record);
        }
    }

    if outcome.duplicates_in_batch > 0 {
        warn!("{} duplicate identifiers within the fetched batch", outcome.duplicates_in_batch);
    }
    info!(
        "{} new records, {} already synced",
        outcome.new_records.len(),
        outcome.already_synced
    );
    outcome
}
