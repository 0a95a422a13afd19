//! Sink-boundary projections of processed records.
//!
//! Records stay strongly typed until they reach this module. Here they are
//! flattened into a column-ordered [`Table`] of scalar [`CellValue`]s, which
//! can then be aligned to the text sink's header or turned into a
//! [`TypedTable`] with normalized column names for the warehouse.

use crate::config::{AppConfig, ColumnNames};
use crate::error::{Result, SyncError};
use crate::sync::SheetSnapshot;
use crate::types::SurveyRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("valid regex"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("valid regex"));

/// A scalar cell. Composite and non-finite values never get this far.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Non-finite numbers become `Null`.
    pub fn number(n: f64) -> Self {
        if n.is_finite() {
            CellValue::Number(n)
        } else {
            CellValue::Null
        }
    }

    pub fn opt_number(n: Option<f64>) -> Self {
        n.map_or(CellValue::Null, CellValue::number)
    }

    pub fn opt_text(s: Option<impl Into<String>>) -> Self {
        s.map_or(CellValue::Null, |s| CellValue::Text(s.into()))
    }

    /// Arrays and objects are stringified as compact JSON.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Integer(i),
                None => CellValue::opt_number(n.as_f64()),
            },
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => CellValue::Text(value.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            CellValue::Bool(_) | CellValue::Null => None,
        }
    }

    /// Plain-text rendering for text-only cells; `Null` is the empty string.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }
}

/// Numeric coercion; anything unparseable is `Null`, never an error.
pub fn coerce_numeric(value: &CellValue) -> CellValue {
    match value {
        CellValue::Integer(_) => value.clone(),
        other => CellValue::opt_number(other.as_f64()),
    }
}

/// Integer coercion for count columns: unparseable values become 0 and
/// fractions are truncated.
pub fn coerce_integer(value: &CellValue) -> CellValue {
    match value {
        CellValue::Integer(_) => value.clone(),
        other => CellValue::Integer(other.as_f64().map_or(0, |n| n.trunc() as i64)),
    }
}

/// Re-types a cell read back from the sink: text holding a number becomes
/// that number, anything else is left as it is.
pub fn retype_numeric(value: &CellValue) -> CellValue {
    match value {
        CellValue::Text(_) => value.as_f64().map_or_else(|| value.clone(), CellValue::Number),
        _ => value.clone(),
    }
}

/// Integer variant of [`retype_numeric`]. Blank cells stay null.
pub fn retype_integer(value: &CellValue) -> CellValue {
    match value {
        CellValue::Text(_) | CellValue::Number(_) => value
            .as_f64()
            .map_or_else(|| value.clone(), |n| CellValue::Integer(n.trunc() as i64)),
        _ => value.clone(),
    }
}

/// Maps a column name into `[\w_]` lowercase: runs of other characters become
/// one underscore, underscore runs collapse, edges are trimmed.
pub fn normalize_column_name(name: &str) -> String {
    let replaced = NON_WORD.replace_all(name, "_");
    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_').to_lowercase();
    if trimmed.is_empty() {
        "unnamed_column".to_string()
    } else {
        trimmed
    }
}

/// Normalizes every name and fails if two distinct inputs collide. A name
/// repeated verbatim (two blank header cells, say) gets a `_2`, `_3`...
/// suffix instead.
pub fn normalize_columns(names: &[String]) -> Result<Vec<String>> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let base = normalize_column_name(name);
        let mut normalized = base.clone();
        let mut repeat = 1;
        while let Some(&first) = seen.get(&normalized) {
            if first != name {
                return Err(SyncError::ColumnCollision {
                    normalized,
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
            repeat += 1;
            normalized = format!("{}_{}", base, repeat);
        }
        seen.insert(normalized.clone(), name);
        out.push(normalized);
    }
    Ok(out)
}

/// Column-ordered rows of scalar cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Builds a table from per-record cell lists. With a non-empty
    /// `canonical` order, columns outside it are dropped and missing ones
    /// are null; otherwise columns appear in first-seen order.
    pub fn from_records(records: Vec<Vec<(String, CellValue)>>, canonical: &[String]) -> Self {
        let columns: Vec<String> = if canonical.is_empty() {
            let mut seen = HashSet::new();
            records
                .iter()
                .flatten()
                .filter(|(name, _)| seen.insert(name.clone()))
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            canonical.to_vec()
        };

        let position: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let rows = records
            .into_iter()
            .map(|cells| {
                let mut row = vec![CellValue::Null; columns.len()];
                for (name, value) in cells {
                    if let Some(&i) = position.get(name.as_str()) {
                        row[i] = value;
                    }
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// Existing sink rows as text cells; empty cells are null.
    pub fn from_snapshot(snapshot: &SheetSnapshot) -> Self {
        let columns = snapshot.header.clone();
        let rows = snapshot
            .rows
            .iter()
            .map(|row| {
                (0..columns.len())
                    .map(|i| match row.get(i) {
                        Some(cell) if !cell.is_empty() => CellValue::Text(cell.clone()),
                        _ => CellValue::Null,
                    })
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of `name`, appending it as an all-null column when absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(i) = self.column(name) {
            return i;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(CellValue::Null);
        }
        self.columns.len() - 1
    }

    /// Reorders to `header`: missing columns become null, columns the
    /// header does not know are dropped.
    pub fn align_to(&self, header: &[String]) -> Table {
        let sources: Vec<Option<usize>> = header.iter().map(|h| self.column(h)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .map(|source| source.map_or(CellValue::Null, |i| row[i].clone()))
                    .collect()
            })
            .collect();
        Table {
            columns: header.to_vec(),
            rows,
        }
    }

    /// Appends `other`, aligned to this table's columns.
    pub fn extend(&mut self, other: &Table) {
        let aligned = other.align_to(&self.columns);
        self.rows.extend(aligned.rows);
    }

    pub fn map_column(&mut self, name: &str, f: impl Fn(&CellValue) -> CellValue) {
        if let Some(i) = self.column(name) {
            for row in &mut self.rows {
                row[i] = f(&row[i]);
            }
        }
    }
}

/// How the text sink should be written.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetWrite {
    /// Clear and write header plus rows.
    Replace {
        header: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    },
    /// Append rows in the sink's existing column order.
    Append { rows: Vec<Vec<CellValue>> },
}

impl SheetWrite {
    pub fn row_count(&self) -> usize {
        match self {
            SheetWrite::Replace { rows, .. } | SheetWrite::Append { rows } => rows.len(),
        }
    }
}

/// Decides between a full write and an append. `snapshot` is `None` when
/// the sink could not be read; that case appends in canonical order and
/// never clears the sink.
pub fn plan_sheet_write(table: &Table, snapshot: Option<&SheetSnapshot>) -> SheetWrite {
    match snapshot {
        Some(snapshot) if snapshot.is_empty() => SheetWrite::Replace {
            header: table.columns.clone(),
            rows: table.rows.clone(),
        },
        Some(snapshot) => SheetWrite::Append {
            rows: table.align_to(&snapshot.header).rows,
        },
        None => SheetWrite::Append {
            rows: table.rows.clone(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    String,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::String => "TEXT",
        }
    }

    fn infer<'a>(cells: impl Iterator<Item = &'a CellValue>) -> Self {
        let (mut ints, mut floats, mut bools, mut texts) = (0, 0, 0, 0);
        for cell in cells {
            match cell {
                CellValue::Null => {}
                CellValue::Integer(_) => ints += 1,
                CellValue::Number(_) => floats += 1,
                CellValue::Bool(_) => bools += 1,
                CellValue::Text(_) => texts += 1,
            }
        }
        match (ints, floats, bools, texts) {
            (0, 0, 0, 0) => ColumnType::String,
            (_, 0, 0, 0) => ColumnType::Integer,
            (_, _, 0, 0) => ColumnType::Float,
            (0, 0, _, 0) => ColumnType::Boolean,
            _ => ColumnType::String,
        }
    }

    fn cast(&self, cell: CellValue) -> CellValue {
        match (self, cell) {
            (_, CellValue::Null) => CellValue::Null,
            (ColumnType::Float, CellValue::Integer(i)) => CellValue::Number(i as f64),
            (ColumnType::String, cell) => CellValue::Text(cell.to_text()),
            (_, cell) => cell,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// Warehouse-ready table: normalized names and one type per column.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedTable {
    pub columns: Vec<TypedColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TypedTable {
    pub fn from_table(table: &Table) -> Result<Self> {
        let names = normalize_columns(&table.columns)?;
        let types: Vec<ColumnType> = (0..table.columns.len())
            .map(|i| ColumnType::infer(table.rows.iter().map(|row| &row[i])))
            .collect();

        let rows = table
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .cloned()
                    .zip(&types)
                    .map(|(cell, column_type)| column_type.cast(cell))
                    .collect()
            })
            .collect();

        Ok(Self {
            columns: names
                .into_iter()
                .zip(types)
                .map(|(name, column_type)| TypedColumn { name, column_type })
                .collect(),
            rows,
        })
    }
}

/// Maps typed records onto output columns.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub names: ColumnNames,
    pub id_field: String,
    pub rename: HashMap<String, String>,
    pub canonical: Vec<String>,
    pub numeric: Vec<String>,
    pub integer: Vec<String>,
}

impl OutputSchema {
    pub fn from_config(config: &AppConfig) -> Self {
        let names = config.columns.clone();
        let mut numeric = vec![
            names.latitude.clone(),
            names.longitude.clone(),
            names.altitude.clone(),
            names.precision.clone(),
            names.zone.clone(),
        ];
        numeric.extend(config.output.numeric_columns.iter().cloned());
        Self {
            names,
            id_field: config.source.id_field.clone(),
            rename: config.output.rename.clone(),
            canonical: config.output.columns.clone(),
            numeric,
            integer: config.output.integer_columns.clone(),
        }
    }

    /// Output column name for a source field.
    pub fn output_name(&self, field: &str) -> String {
        self.rename
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.to_string())
    }

    pub fn id_column(&self) -> String {
        self.output_name(&self.id_field)
    }

    /// Source fields (renamed) followed by derived columns. A derived column
    /// replaces a source field of the same name in place.
    pub fn project(&self, record: &SurveyRecord) -> Vec<(String, CellValue)> {
        let mut cells: Vec<(String, CellValue)> = record
            .fields
            .iter()
            .map(|(field, value)| (self.output_name(field), CellValue::from_json(value)))
            .collect();

        let n = &self.names;
        let position = &record.position;
        let derived = [
            (self.id_column(), CellValue::Text(record.id.clone())),
            (n.shift.clone(), CellValue::opt_text(record.shift.map(|s| s.code()))),
            (
                n.date.clone(),
                CellValue::opt_text(record.submitted_at.map(|t| t.format("%Y-%m-%d").to_string())),
            ),
            (
                n.time.clone(),
                CellValue::opt_text(record.submitted_at.map(|t| t.format("%H:%M:%S").to_string())),
            ),
            (n.latitude.clone(), CellValue::number(position.latitude)),
            (n.longitude.clone(), CellValue::number(position.longitude)),
            (n.altitude.clone(), CellValue::opt_number(position.altitude)),
            (n.precision.clone(), CellValue::opt_number(position.precision)),
            (n.corridor.clone(), CellValue::opt_text(record.corridor.clone())),
            (n.zone.clone(), CellValue::opt_number(record.zone.code())),
        ];

        for (name, value) in derived {
            match cells.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = value,
                None => cells.push((name, value)),
            }
        }
        cells
    }

    /// Applies numeric and integer coercion to the configured columns.
    pub fn coerce(&self, table: &mut Table) {
        for column in &self.numeric {
            table.map_column(column, coerce_numeric);
        }
        for column in &self.integer {
            table.map_column(column, coerce_integer);
        }
    }

    /// Re-types numeric columns of rows read back from the sink. Unlike
    /// [`coerce`](Self::coerce) it never turns a blank or non-numeric cell
    /// into 0 or null.
    pub fn retype(&self, table: &mut Table) {
        for column in &self.numeric {
            table.map_column(column, retype_numeric);
        }
        for column in &self.integer {
            table.map_column(column, retype_integer);
        }
    }

    pub fn build_table(&self, records: &[SurveyRecord]) -> Table {
        let mut table = Table::from_records(
            records.iter().map(|r| self.project(r)).collect(),
            &self.canonical,
        );
        self.coerce(&mut table);
        table
    }

    /// Existing sink contents, re-typed, followed by `new_rows` as built by
    /// [`build_table`](Self::build_table).
    pub fn merge_snapshot(&self, snapshot: Option<&SheetSnapshot>, new_rows: &Table) -> Table {
        match snapshot {
            Some(snapshot) if !snapshot.is_empty() => {
                let mut existing = Table::from_snapshot(snapshot);
                self.retype(&mut existing);
                existing.extend(new_rows);
                existing
            }
            _ => new_rows.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoPosition, RawRecord, Shift, ZoneAssignment};
    use chrono::NaiveDate;
    use serde_json::json;

    fn schema() -> OutputSchema {
        let config = AppConfig::from_toml_str(
            r#"
            [source]
            url = "http://localhost/data.json"
            [zones.partition]
            name = "districts"
            path = "districts.geojson"
            [sheet]
            kind = "csv"
            path = "sheet.csv"
            [output]
            integer_columns = ["people"]
            [output.rename]
            "datos_per/cant_pers" = "people"
            "#,
        )
        .unwrap();
        OutputSchema::from_config(&config)
    }

    fn record(id: &str, fields: Value) -> SurveyRecord {
        SurveyRecord {
            id: id.to_string(),
            submitted_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .and_then(|d| d.and_hms_opt(9, 30, 5)),
            raw_coordinates: "-34.6 -58.4 10 3".to_string(),
            position: GeoPosition {
                latitude: -34.6,
                longitude: -58.4,
                altitude: None,
                precision: Some(3.0),
            },
            shift: Some(Shift::MidDay),
            zone: ZoneAssignment::Special {
                layer: "north".to_string(),
                code: 14.5,
            },
            corridor: None,
            fields: match fields {
                Value::Object(map) => map,
                _ => RawRecord::new(),
            },
        }
    }

    fn cell<'a>(table: &'a Table, row: usize, column: &str) -> &'a CellValue {
        &table.rows[row][table.column(column).unwrap()]
    }

    #[test]
    fn test_normalize_column_names() {
        assert_eq!(normalize_column_name("Georreferenciación del punto"), "georreferenciación_del_punto");
        assert_eq!(normalize_column_name("geo_ref/geo_punto"), "geo_ref_geo_punto");
        assert_eq!(normalize_column_name("__version__"), "version");
        assert_eq!(normalize_column_name("Se observan niños/as (en el punto)"), "se_observan_niños_as_en_el_punto");
        assert_eq!(normalize_column_name("a  --  b"), "a_b");
        assert_eq!(normalize_column_name("///"), "unnamed_column");
    }

    #[test]
    fn test_column_collision_fails_loudly() {
        let err = normalize_columns(&["Start Time".to_string(), "start_time".to_string()]).unwrap_err();
        match err {
            SyncError::ColumnCollision { normalized, first, second } => {
                assert_eq!(normalized, "start_time");
                assert_eq!(first, "Start Time");
                assert_eq!(second, "start_time");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(normalize_columns(&["a".to_string(), "b".to_string()]).is_ok());
    }

    #[test]
    fn test_repeated_identical_names_are_suffixed() {
        let names: Vec<String> = ["", "Zone", "", ""].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            normalize_columns(&names).unwrap(),
            vec!["unnamed_column", "zone", "unnamed_column_2", "unnamed_column_3"]
        );
        // A distinct name landing on the same output still fails
        let clash: Vec<String> = ["", "///"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(
            normalize_columns(&clash),
            Err(SyncError::ColumnCollision { .. })
        ));
    }

    #[test]
    fn test_composites_are_stringified() {
        assert_eq!(
            CellValue::from_json(&json!([1, "a"])),
            CellValue::Text("[1,\"a\"]".to_string())
        );
        assert_eq!(
            CellValue::from_json(&json!({"k": null})),
            CellValue::Text("{\"k\":null}".to_string())
        );
        assert_eq!(CellValue::from_json(&json!(3)), CellValue::Integer(3));
        assert_eq!(CellValue::from_json(&json!(2.5)), CellValue::Number(2.5));
    }

    #[test]
    fn test_non_finite_numbers_become_null() {
        assert_eq!(CellValue::number(f64::NAN), CellValue::Null);
        assert_eq!(CellValue::number(f64::INFINITY), CellValue::Null);
        assert_eq!(CellValue::number(f64::NEG_INFINITY), CellValue::Null);
        assert_eq!(coerce_numeric(&CellValue::Text("inf".into())), CellValue::Null);
        assert_eq!(coerce_numeric(&CellValue::Text("NaN".into())), CellValue::Null);
        assert_eq!(coerce_numeric(&CellValue::Text(" 4.5".into())), CellValue::Number(4.5));
        assert_eq!(coerce_numeric(&CellValue::Text("abc".into())), CellValue::Null);
        assert_eq!(coerce_integer(&CellValue::Text("abc".into())), CellValue::Integer(0));
        assert_eq!(coerce_integer(&CellValue::Text("3.9".into())), CellValue::Integer(3));
    }

    #[test]
    fn test_sanitized_output_has_no_unsafe_values() {
        let schema = schema();
        let records = vec![
            record("a", json!({"nested": {"x": [1, 2]}, "list": [{"y": 1}], "datos_per/cant_pers": "n/a"})),
            record("b", json!({"nested": [], "datos_per/cant_pers": 4})),
        ];
        let table = schema.build_table(&records);
        for row in &table.rows {
            for value in row {
                if let CellValue::Number(n) = value {
                    assert!(n.is_finite());
                }
            }
        }
        assert_eq!(cell(&table, 0, "people"), &CellValue::Integer(0));
        assert_eq!(cell(&table, 1, "people"), &CellValue::Integer(4));
        assert_eq!(cell(&table, 0, "list"), &CellValue::Text("[{\"y\":1}]".to_string()));

        let json = serde_json::to_string(&table.rows).unwrap();
        assert!(!json.contains("NaN") && !json.contains("inf"));
    }

    #[test]
    fn test_projection_derived_columns() {
        let schema = schema();
        let table = schema.build_table(&[record("a", json!({"start": "2024-05-01T09:30:05-03:00", "deviceid": "x"}))]);
        assert_eq!(cell(&table, 0, "_uuid"), &CellValue::Text("a".into()));
        assert_eq!(cell(&table, 0, "shift"), &CellValue::Text("TO".into()));
        // Derived date replaces the raw timestamp in place
        assert_eq!(table.columns[0], "start");
        assert_eq!(cell(&table, 0, "start"), &CellValue::Text("2024-05-01".into()));
        assert_eq!(cell(&table, 0, "start_time"), &CellValue::Text("09:30:05".into()));
        assert_eq!(cell(&table, 0, "altitude"), &CellValue::Null);
        assert_eq!(cell(&table, 0, "precision"), &CellValue::Number(3.0));
        assert_eq!(cell(&table, 0, "zone"), &CellValue::Number(14.5));
        assert_eq!(cell(&table, 0, "corridor"), &CellValue::Null);
    }

    #[test]
    fn test_canonical_order_drops_and_fills() {
        let mut schema = schema();
        schema.canonical = vec!["zone".into(), "missing".into(), "_uuid".into()];
        let table = schema.build_table(&[record("a", json!({"extra": 1}))]);
        assert_eq!(table.columns, vec!["zone", "missing", "_uuid"]);
        assert_eq!(
            table.rows[0],
            vec![CellValue::Number(14.5), CellValue::Null, CellValue::Text("a".into())]
        );
    }

    #[test]
    fn test_empty_sink_gets_header() {
        let table = schema().build_table(&[record("a", json!({}))]);
        let plan = plan_sheet_write(&table, Some(&SheetSnapshot::default()));
        match plan {
            SheetWrite::Replace { header, rows } => {
                assert_eq!(header, table.columns);
                assert_eq!(rows.len(), 1);
            }
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[test]
    fn test_append_aligns_to_sink_header() {
        let table = schema().build_table(&[record("a", json!({"deviceid": "d1"}))]);
        let snapshot = SheetSnapshot::from_rows(vec![
            vec!["zone".into(), "legacy".into(), "_uuid".into()],
            vec!["3".into(), "x".into(), "old".into()],
        ]);
        match plan_sheet_write(&table, Some(&snapshot)) {
            SheetWrite::Append { rows } => assert_eq!(
                rows,
                vec![vec![CellValue::Number(14.5), CellValue::Null, CellValue::Text("a".into())]]
            ),
            other => panic!("expected append, got {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_sink_appends_without_header() {
        let table = schema().build_table(&[record("a", json!({}))]);
        let plan = plan_sheet_write(&table, None);
        assert!(matches!(plan, SheetWrite::Append { .. }));
        assert_eq!(plan.row_count(), 1);
    }

    #[test]
    fn test_typed_table_inference() {
        let table = Table {
            columns: vec!["Count".into(), "Lat itude".into(), "Mixed".into(), "Empty".into(), "Flag".into()],
            rows: vec![
                vec![CellValue::Integer(1), CellValue::Integer(2), CellValue::Integer(1), CellValue::Null, CellValue::Bool(true)],
                vec![CellValue::Null, CellValue::Number(2.5), CellValue::Text("x".into()), CellValue::Null, CellValue::Null],
            ],
        };
        let typed = TypedTable::from_table(&table).unwrap();
        let types: Vec<ColumnType> = typed.columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![ColumnType::Integer, ColumnType::Float, ColumnType::String, ColumnType::String, ColumnType::Boolean]
        );
        assert_eq!(typed.columns[1].name, "lat_itude");
        assert_eq!(typed.rows[0][1], CellValue::Number(2.0));
        assert_eq!(typed.rows[0][2], CellValue::Text("1".into()));
        assert_eq!(typed.rows[1][0], CellValue::Null);
    }

    #[test]
    fn test_merge_snapshot_retypes_existing_rows() {
        let schema = schema();
        let new_rows = schema.build_table(&[record("b", json!({}))]);
        let snapshot = SheetSnapshot::from_rows(vec![
            vec!["_uuid".into(), "zone".into(), "latitude".into()],
            vec!["a".into(), "3".into(), "".into()],
        ]);
        let merged = schema.merge_snapshot(Some(&snapshot), &new_rows);
        assert_eq!(merged.columns, snapshot.header);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.rows[0], vec![CellValue::Text("a".into()), CellValue::Number(3.0), CellValue::Null]);
        assert_eq!(merged.rows[1][0], CellValue::Text("b".into()));
        assert_eq!(merged.rows[1][2], CellValue::Number(-34.6));
    }

    #[test]
    fn test_merge_snapshot_keeps_blank_and_text_counts() {
        let schema = schema();
        let new_rows = schema.build_table(&[record("c", json!({"datos_per/cant_pers": "n/a"}))]);
        let snapshot = SheetSnapshot::from_rows(vec![
            vec!["_uuid".into(), "people".into(), "zone".into()],
            vec!["a".into(), "".into(), "pending".into()],
            vec!["b".into(), "2.7".into(), "14".into()],
        ]);
        let merged = schema.merge_snapshot(Some(&snapshot), &new_rows);
        assert_eq!(merged.rows[0][1], CellValue::Null);
        assert_eq!(merged.rows[0][2], CellValue::Text("pending".into()));
        assert_eq!(merged.rows[1][1], CellValue::Integer(2));
        assert_eq!(merged.rows[1][2], CellValue::Number(14.0));
        // New rows still get the fill-with-zero count coercion
        assert_eq!(merged.rows[2][1], CellValue::Integer(0));
    }

    #[test]
    fn test_retype_leaves_non_numeric_cells() {
        assert_eq!(retype_integer(&CellValue::Null), CellValue::Null);
        assert_eq!(retype_integer(&CellValue::Text("x".into())), CellValue::Text("x".into()));
        assert_eq!(retype_integer(&CellValue::Text("5".into())), CellValue::Integer(5));
        assert_eq!(retype_numeric(&CellValue::Text(" 4.5".into())), CellValue::Number(4.5));
        assert_eq!(retype_numeric(&CellValue::Text("inf".into())), CellValue::Text("inf".into()));
    }
}
