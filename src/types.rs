use chrono::NaiveDateTime;
use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw survey record as returned by the source, flattened or not.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Position parsed from a `"<lat> <lon> [alt] [acc]"` coordinate string.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// 0 when absent, `None` when present but unparseable.
    pub altitude: Option<f64>,
    /// Horizontal accuracy; same defaulting as `altitude`.
    pub precision: Option<f64>,
}

impl GeoPosition {
    /// WGS84 point, x = longitude, y = latitude.
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Coarse time-of-day bucket of a record's local timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shift {
    /// [03:00, 08:00)
    EarlyMorning,
    /// [08:00, 16:00)
    MidDay,
    /// [16:00, 22:00)
    Evening,
    /// [22:00, 03:00)
    Night,
}

impl Shift {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            3..=7 => Shift::EarlyMorning,
            8..=15 => Shift::MidDay,
            16..=21 => Shift::Evening,
            _ => Shift::Night,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Shift::EarlyMorning => "TM",
            Shift::MidDay => "TO",
            Shift::Evening => "TT",
            Shift::Night => "TN",
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The single zone a point was assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ZoneAssignment {
    /// Inside a special zone polygon; carries the layer's constant code.
    Special { layer: String, code: f64 },
    /// Inside an administrative partition polygon. `code` is `None` when the
    /// polygon had no resolvable numeric code.
    Partition { code: Option<f64> },
    /// Outside every layer.
    Unclassified,
}

impl ZoneAssignment {
    pub fn code(&self) -> Option<f64> {
        match self {
            ZoneAssignment::Special { code, .. } => Some(*code),
            ZoneAssignment::Partition { code } => *code,
            ZoneAssignment::Unclassified => None,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        matches!(self, ZoneAssignment::Unclassified)
    }
}

/// A survey record after extraction. Source fields are kept verbatim in
/// `fields`; everything the pipeline derives is strongly typed.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyRecord {
    pub id: String,
    /// Local wall-clock time of the submission, offset discarded.
    pub submitted_at: Option<NaiveDateTime>,
    pub raw_coordinates: String,
    pub position: GeoPosition,
    pub shift: Option<Shift>,
    pub zone: ZoneAssignment,
    pub corridor: Option<String>,
    pub fields: RawRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_boundaries() {
        assert_eq!(Shift::from_hour(2), Shift::Night);
        assert_eq!(Shift::from_hour(3), Shift::EarlyMorning);
        assert_eq!(Shift::from_hour(7), Shift::EarlyMorning);
        assert_eq!(Shift::from_hour(8), Shift::MidDay);
        assert_eq!(Shift::from_hour(9), Shift::MidDay);
        assert_eq!(Shift::from_hour(15), Shift::MidDay);
        assert_eq!(Shift::from_hour(16), Shift::Evening);
        assert_eq!(Shift::from_hour(21), Shift::Evening);
        assert_eq!(Shift::from_hour(22), Shift::Night);
        assert_eq!(Shift::from_hour(0), Shift::Night);
    }

    #[test]
    fn test_zone_codes() {
        let special = ZoneAssignment::Special {
            layer: "north".to_string(),
            code: 14.5,
        };
        assert_eq!(special.code(), Some(14.5));
        assert_eq!(ZoneAssignment::Partition { code: Some(3.0) }.code(), Some(3.0));
        assert_eq!(ZoneAssignment::Partition { code: None }.code(), None);
        assert!(ZoneAssignment::Unclassified.is_unclassified());
        assert_eq!(ZoneAssignment::Unclassified.code(), None);
    }
}
