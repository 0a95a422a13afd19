use crate::config::SourceConfig;
use crate::types::{GeoPosition, RawRecord, Shift, SurveyRecord, ZoneAssignment};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;
use tracing::{debug, info, warn};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Counts of per-record problems recovered during extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub input: usize,
    pub dropped_without_coordinates: usize,
    pub dropped_without_identifier: usize,
    pub unparseable_timestamps: usize,
}

/// Parses `"<lat> <lon> [alt] [acc]"`. Latitude and longitude must be finite
/// numbers; altitude and accuracy default to 0 when absent.
pub fn parse_coordinates(raw: &str) -> Option<GeoPosition> {
    let mut tokens = raw.split_whitespace();
    let latitude = parse_finite(tokens.next()?)?;
    let longitude = parse_finite(tokens.next()?)?;
    let altitude = tokens.next().map_or(Some(0.0), parse_finite);
    let precision = tokens.next().map_or(Some(0.0), parse_finite);
    Some(GeoPosition {
        latitude,
        longitude,
        altitude,
        precision,
    })
}

fn parse_finite(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a submission timestamp into local wall-clock time. Offsets are
/// honoured by keeping the local reading, not by converting to UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.naive_local());
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn shift_for(timestamp: Option<NaiveDateTime>) -> Option<Shift> {
    timestamp.map(|ts| Shift::from_hour(ts.hour()))
}

/// Flattens nested objects into dotted keys. Arrays stay composite.
pub fn flatten_record(record: RawRecord) -> RawRecord {
    let mut flat = RawRecord::new();
    flatten_into(&mut flat, None, record);
    flat
}

fn flatten_into(out: &mut RawRecord, prefix: Option<&str>, record: RawRecord) {
    for (key, value) in record {
        let key = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key,
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&key), inner),
            other => {
                out.insert(key, other);
            }
        }
    }
}

/// Reads a scalar field as text; numbers are rendered, null/absent is `None`.
pub fn field_text(record: &RawRecord, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Turns raw records into typed `SurveyRecord`s. Records lacking an
/// identifier or valid coordinates are dropped and only counted.
pub fn extract_records(
    raw: Vec<RawRecord>,
    source: &SourceConfig,
) -> (Vec<SurveyRecord>, ExtractionStats) {
    let mut stats = ExtractionStats {
        input: raw.len(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(raw.len());

    for fields in raw {
        // Trimmed the same way the sheet's identifier column is read back
        let Some(id) = field_text(&fields, &source.id_field)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
        else {
            stats.dropped_without_identifier += 1;
            continue;
        };
        let raw_coordinates = field_text(&fields, &source.coordinate_field).unwrap_or_default();
        let Some(position) = parse_coordinates(&raw_coordinates) else {
            stats.dropped_without_coordinates += 1;
            continue;
        };

        let submitted_at = match field_text(&fields, &source.timestamp_field) {
            Some(text) => {
                let parsed = parse_timestamp(&text);
                if parsed.is_none() {
                    debug!(record = %id, "Unparseable timestamp {:?}", text);
                    stats.unparseable_timestamps += 1;
                }
                parsed
            }
            None => None,
        };

        records.push(SurveyRecord {
            id,
            submitted_at,
            raw_coordinates,
            position,
            shift: shift_for(submitted_at),
            zone: ZoneAssignment::Unclassified,
            corridor: None,
            fields,
        });
    }

    if stats.dropped_without_coordinates > 0 || stats.dropped_without_identifier > 0 {
        warn!(
            "Dropped {} records without valid coordinates and {} without an identifier",
            stats.dropped_without_coordinates, stats.dropped_without_identifier
        );
    }
    if stats.unparseable_timestamps > 0 {
        warn!("{} records have an unparseable timestamp", stats.unparseable_timestamps);
    }
    info!("Extracted {} of {} records", records.len(), stats.input);

    (records, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> SourceConfig {
        crate::config::AppConfig::from_toml_str(
            r#"
            [source]
            url = "http://localhost/data.json"
            [zones.partition]
            name = "districts"
            path = "districts.geojson"
            [sheet]
            kind = "csv"
            path = "sheet.csv"
            "#,
        )
        .unwrap()
        .source
    }

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_parse_full_coordinate_string() {
        let pos = parse_coordinates("-34.5912 -58.4011 25.3 4.9").unwrap();
        assert_eq!(pos.latitude, -34.5912);
        assert_eq!(pos.longitude, -58.4011);
        assert_eq!(pos.altitude, Some(25.3));
        assert_eq!(pos.precision, Some(4.9));
    }

    #[test]
    fn test_optional_parts_default_to_zero() {
        let pos = parse_coordinates("-34.5 -58.4").unwrap();
        assert_eq!(pos.altitude, Some(0.0));
        assert_eq!(pos.precision, Some(0.0));

        let pos = parse_coordinates("-34.5 -58.4 high").unwrap();
        assert_eq!(pos.altitude, None);
        assert_eq!(pos.precision, Some(0.0));
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        assert!(parse_coordinates("").is_none());
        assert!(parse_coordinates("-34.5").is_none());
        assert!(parse_coordinates("abc -58.4").is_none());
        assert!(parse_coordinates("NaN -58.4").is_none());
        assert!(parse_coordinates("-34.5 inf").is_none());
    }

    #[test]
    fn test_timestamp_keeps_local_hour() {
        let ts = parse_timestamp("2024-05-01T02:15:00.000-03:00").unwrap();
        assert_eq!(ts.hour(), 2);
        assert_eq!(shift_for(Some(ts)), Some(Shift::Night));

        let ts = parse_timestamp("2024-05-01T09:40:11").unwrap();
        assert_eq!(shift_for(Some(ts)), Some(Shift::MidDay));

        assert_eq!(shift_for(None), None);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_flatten_nested_objects_keeps_arrays() {
        let flat = flatten_record(record(json!({
            "a": {"b": 1, "c": {"d": "x"}},
            "list": [1, 2],
            "empty": {},
            "geo_ref/geo_punto": "1 2"
        })));
        assert_eq!(flat.get("a.b"), Some(&json!(1)));
        assert_eq!(flat.get("a.c.d"), Some(&json!("x")));
        assert_eq!(flat.get("list"), Some(&json!([1, 2])));
        assert_eq!(flat.get("empty"), Some(&json!({})));
        assert_eq!(flat.get("geo_ref/geo_punto"), Some(&json!("1 2")));
    }

    #[test]
    fn test_extract_drops_and_counts() {
        let raw = vec![
            record(json!({"_uuid": "a", "geo_ref/geo_punto": "-34.5 -58.4 0 5", "start": "2024-05-01T21:00:00-03:00"})),
            record(json!({"_uuid": "b", "geo_ref/geo_punto": "not a point"})),
            record(json!({"geo_ref/geo_punto": "-34.5 -58.4"})),
            record(json!({"_uuid": 7, "geo_ref/geo_punto": "-34.5 -58.4", "start": "garbage"})),
            record(json!({"_uuid": "c", "start": null})),
        ];
        let (records, stats) = extract_records(raw, &source());
        assert_eq!(records.len(), 2);
        assert_eq!(stats.input, 5);
        assert_eq!(stats.dropped_without_coordinates, 2);
        assert_eq!(stats.dropped_without_identifier, 1);
        assert_eq!(stats.unparseable_timestamps, 1);

        assert_eq!(records[0].id, "a");
        assert_eq!(records[0].shift, Some(Shift::Evening));
        assert_eq!(records[1].id, "7");
        assert_eq!(records[1].shift, None);
        assert!(records[1].zone.is_unclassified());
    }

    #[test]
    fn test_identifier_is_trimmed_and_blank_is_dropped() {
        let raw = vec![
            record(json!({"_uuid": " a ", "geo_ref/geo_punto": "-34.5 -58.4"})),
            record(json!({"_uuid": "   ", "geo_ref/geo_punto": "-34.5 -58.4"})),
        ];
        let (records, stats) = extract_records(raw, &source());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
        assert_eq!(stats.dropped_without_identifier, 1);
    }
}
