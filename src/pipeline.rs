use crate::app::ports::{SurveySource, TextSink, TypedSink};
use crate::classify::{classify_records, CorridorTagger, ZoneClassifier, ZoneStats};
use crate::config::{AppConfig, SourceConfig};
use crate::error::{Result, SyncError};
use crate::extract::{extract_records, parse_coordinates};
use crate::metrics::{
    RECORDS_ALREADY_SYNCED, RECORDS_DROPPED, RECORDS_FETCHED, RECORDS_WRITTEN, RUN_DURATION,
    WAREHOUSE_FAILURES,
};
use crate::sanitize::{plan_sheet_write, CellValue, OutputSchema, SheetWrite, Table, TypedTable};
use crate::sync::{filter_new, SheetSnapshot, SyncState};
use crate::types::RawRecord;
use chrono::Utc;
use geo::Point;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// How a sync run ended. All three are successful runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// The source returned no records.
    NothingFetched,
    /// Every fetched record is already in the destination.
    UpToDate,
    /// New records were written.
    Synced,
}

/// Result of the warehouse refresh, which never fails a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WarehouseStatus {
    NotConfigured,
    /// Not attempted: nothing was written or the destination snapshot is unknown.
    Skipped,
    Loaded { rows: usize },
    Failed { message: String },
}

/// Result of a complete sync run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub fetched: usize,
    pub dropped_without_coordinates: usize,
    pub dropped_without_identifier: usize,
    pub unparseable_timestamps: usize,
    pub unresolved_zone_codes: usize,
    pub zones: ZoneStats,
    pub already_synced: usize,
    pub duplicates_in_batch: usize,
    pub written: usize,
    pub warehouse: WarehouseStatus,
    pub duration_secs: f64,
}

impl RunSummary {
    fn empty(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            fetched: 0,
            dropped_without_coordinates: 0,
            dropped_without_identifier: 0,
            unparseable_timestamps: 0,
            unresolved_zone_codes: 0,
            zones: ZoneStats::default(),
            already_synced: 0,
            duplicates_in_batch: 0,
            written: 0,
            warehouse: WarehouseStatus::Skipped,
            duration_secs: 0.0,
        }
    }
}

/// Result of a full reclassification of the destination
#[derive(Debug, Clone, Serialize)]
pub struct ReclassifySummary {
    pub rows: usize,
    pub without_coordinates: usize,
    pub changed: usize,
    pub zones: ZoneStats,
    pub backup: Option<PathBuf>,
    pub warehouse: WarehouseStatus,
}

/// One run of fetch, classify, filter and write. Layers are loaded before
/// construction so a bad layer aborts before any sink is touched.
pub struct SyncPipeline {
    source_config: SourceConfig,
    schema: OutputSchema,
    zones: ZoneClassifier,
    corridors: CorridorTagger,
    source: Option<Arc<dyn SurveySource>>,
    sheet: Arc<dyn TextSink>,
    warehouse: Option<Arc<dyn TypedSink>>,
}

impl SyncPipeline {
    pub fn new(
        config: &AppConfig,
        zones: ZoneClassifier,
        sheet: Arc<dyn TextSink>,
        warehouse: Option<Arc<dyn TypedSink>>,
    ) -> Self {
        Self {
            source_config: config.source.clone(),
            schema: OutputSchema::from_config(config),
            zones,
            corridors: CorridorTagger::from_config(&config.corridors),
            source: None,
            sheet,
            warehouse,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn SurveySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn zones(&self) -> &ZoneClassifier {
        &self.zones
    }

    /// Reads the destination once. `None` means it could not be read.
    async fn read_snapshot(&self) -> Option<SheetSnapshot> {
        match self.sheet.read_all_rows().await {
            Ok(rows) => Some(SheetSnapshot::from_rows(rows)),
            Err(e) => {
                warn!(
                    "Could not read destination '{}', treating it as empty and appending only: {}",
                    self.sheet.name(),
                    e
                );
                None
            }
        }
    }

    /// Loads `table` into the warehouse. Errors are logged and returned as
    /// a status, never propagated.
    async fn refresh_warehouse(&self, table: &Table) -> WarehouseStatus {
        let Some(warehouse) = &self.warehouse else {
            return WarehouseStatus::NotConfigured;
        };
        let result = match TypedTable::from_table(table) {
            Ok(typed) => warehouse.replace_table(&typed).await.map(|_| typed.rows.len()),
            Err(e) => Err(e),
        };
        match result {
            Ok(rows) => {
                info!("Warehouse '{}' refreshed with {} rows", warehouse.name(), rows);
                WarehouseStatus::Loaded { rows }
            }
            Err(e @ SyncError::ColumnCollision { .. }) => {
                error!("Warehouse '{}' not refreshed: {}", warehouse.name(), e);
                counter!(WAREHOUSE_FAILURES).increment(1);
                WarehouseStatus::Failed { message: e.to_string() }
            }
            Err(e) => {
                warn!("Warehouse '{}' refresh failed: {}", warehouse.name(), e);
                counter!(WAREHOUSE_FAILURES).increment(1);
                WarehouseStatus::Failed { message: e.to_string() }
            }
        }
    }

    /// Run the complete sync
    #[instrument(skip(self), fields(sheet = %self.sheet.name()))]
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| SyncError::Config("no survey source configured".to_string()))?;

        // Step 1: fetch
        let raw = source.fetch_all().await?;
        counter!(RECORDS_FETCHED).increment(raw.len() as u64);
        if raw.is_empty() {
            info!("Source returned no records");
            return Ok(finish(RunSummary::empty(RunOutcome::NothingFetched), started));
        }
        let fetched = raw.len();

        // Step 2: extract
        let (mut records, stats) = extract_records(raw, &self.source_config);
        counter!(RECORDS_DROPPED)
            .increment((stats.dropped_without_coordinates + stats.dropped_without_identifier) as u64);

        // Step 3: classify
        classify_records(&mut records, &self.zones, &self.corridors);
        let zones = ZoneStats::from_assignments(records.iter().map(|r| &r.zone));
        if zones.partition_without_code > 0 {
            warn!(
                "{} records matched a '{}' polygon without a resolvable code",
                zones.partition_without_code,
                self.zones.partition().name
            );
        }

        // Step 4: filter against the destination
        let snapshot = self.read_snapshot().await;
        let state = snapshot
            .as_ref()
            .map(|s| SyncState::from_snapshot(s, &self.schema.id_column()))
            .unwrap_or_default();
        let filtered = filter_new(records, &state);
        counter!(RECORDS_ALREADY_SYNCED).increment(filtered.already_synced as u64);

        let mut summary = RunSummary {
            outcome: RunOutcome::UpToDate,
            fetched,
            dropped_without_coordinates: stats.dropped_without_coordinates,
            dropped_without_identifier: stats.dropped_without_identifier,
            unparseable_timestamps: stats.unparseable_timestamps,
            unresolved_zone_codes: zones.partition_without_code,
            zones,
            already_synced: filtered.already_synced,
            duplicates_in_batch: filtered.duplicates_in_batch,
            written: 0,
            warehouse: WarehouseStatus::Skipped,
            duration_secs: 0.0,
        };

        if filtered.new_records.is_empty() {
            info!("Destination is up to date");
            return Ok(finish(summary, started));
        }

        // Step 5: write the destination; failure here aborts the run
        let table = self.schema.build_table(&filtered.new_records);
        let plan = plan_sheet_write(&table, snapshot.as_ref());
        match &plan {
            SheetWrite::Replace { header, rows } => self.sheet.write_all(header, rows).await?,
            SheetWrite::Append { rows } => self.sheet.append_rows(rows).await?,
        }
        summary.written = plan.row_count();
        summary.outcome = RunOutcome::Synced;
        counter!(RECORDS_WRITTEN).increment(summary.written as u64);
        info!("Wrote {} new records to '{}'", summary.written, self.sheet.name());

        // Step 6: mirror the destination into the warehouse
        summary.warehouse = match &snapshot {
            Some(snapshot) => {
                let mirrored = self.schema.merge_snapshot(Some(snapshot), &table);
                self.refresh_warehouse(&mirrored).await
            }
            None => {
                if self.warehouse.is_some() {
                    warn!("Skipping warehouse refresh: destination contents are unknown");
                }
                WarehouseStatus::Skipped
            }
        };

        Ok(finish(summary, started))
    }

    /// Recomputes zone and corridor for every destination row, replaces the
    /// destination and refreshes the warehouse. A CSV backup of the current
    /// rows is written to `backup_dir` first.
    #[instrument(skip(self, backup_dir), fields(sheet = %self.sheet.name()))]
    pub async fn reclassify(&self, backup_dir: &Path) -> Result<ReclassifySummary> {
        let snapshot = SheetSnapshot::from_rows(self.sheet.read_all_rows().await?);
        if snapshot.is_empty() || snapshot.rows.is_empty() {
            info!("Destination is empty, nothing to reclassify");
            return Ok(ReclassifySummary {
                rows: 0,
                without_coordinates: 0,
                changed: 0,
                zones: ZoneStats::default(),
                backup: None,
                warehouse: WarehouseStatus::Skipped,
            });
        }

        let backup = write_backup(backup_dir, &snapshot)?;
        info!("Backed up {} rows to {}", snapshot.rows.len(), backup.display());

        let coordinate_column = self.schema.output_name(&self.source_config.coordinate_field);
        let positions: Vec<Option<Point<f64>>> = snapshot
            .records()
            .iter()
            .map(|row| self.row_point(row, &coordinate_column))
            .collect();
        let located: Vec<(usize, Point<f64>)> = positions
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| (i, p)))
            .collect();
        let points: Vec<Point<f64>> = located.iter().map(|(_, p)| *p).collect();
        let assignments = self.zones.classify(&points);
        let corridors = self.corridors.tag_all(&points);

        let mut table = Table::from_snapshot(&snapshot);
        let zone_column = table.ensure_column(&self.schema.names.zone);
        let corridor_column = table.ensure_column(&self.schema.names.corridor);

        let mut changed = 0;
        for ((&(row, _), zone), corridor) in located.iter().zip(&assignments).zip(corridors) {
            let cells = &mut table.rows[row];
            if cells[zone_column].as_f64() != zone.code() {
                changed += 1;
            }
            cells[zone_column] = CellValue::opt_number(zone.code());
            cells[corridor_column] = CellValue::opt_text(corridor);
        }
        self.schema.retype(&mut table);

        let without_coordinates = snapshot.rows.len() - located.len();
        if without_coordinates > 0 {
            warn!("{} rows have no usable coordinates and keep an empty zone", without_coordinates);
        }
        // Rows without coordinates lose any stale zone
        for (row, position) in positions.iter().enumerate() {
            if position.is_none() {
                if !table.rows[row][zone_column].is_null() {
                    changed += 1;
                }
                table.rows[row][zone_column] = CellValue::Null;
                table.rows[row][corridor_column] = CellValue::Null;
            }
        }

        self.sheet.write_all(&table.columns, &table.rows).await?;
        info!("Rewrote {} rows ({} zone changes)", table.len(), changed);

        let warehouse = self.refresh_warehouse(&table).await;
        Ok(ReclassifySummary {
            rows: table.len(),
            without_coordinates,
            changed,
            zones: ZoneStats::from_assignments(&assignments),
            backup: Some(backup),
            warehouse,
        })
    }

    /// Latitude/longitude columns first, then the raw coordinate string.
    fn row_point(&self, row: &RawRecord, coordinate_column: &str) -> Option<Point<f64>> {
        let number = |column: &str| match row.get(column) {
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        };
        let names = &self.schema.names;
        if let (Some(lat), Some(lon)) = (number(&names.latitude), number(&names.longitude)) {
            return Some(Point::new(lon, lat));
        }
        match row.get(coordinate_column) {
            Some(Value::String(raw)) => parse_coordinates(raw).map(|p| p.point()),
            _ => None,
        }
    }
}

/// Stamps the run duration on every outcome.
fn finish(mut summary: RunSummary, started: Instant) -> RunSummary {
    summary.duration_secs = started.elapsed().as_secs_f64();
    histogram!(RUN_DURATION).record(summary.duration_secs);
    summary
}

/// Writes the snapshot, header first, to a timestamped CSV under `dir`.
fn write_backup(dir: &Path, snapshot: &SheetSnapshot) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("sheet_backup_{timestamp}.csv"));
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(&path)?;
    writer.write_record(&snapshot.header)?;
    for row in &snapshot.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(path)
}
