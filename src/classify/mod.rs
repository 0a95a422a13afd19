//! Zone classification and corridor tagging. The two are independent and
//! are merged back onto records by index.

pub mod corridor;
pub mod zone;

pub use corridor::{Corridor, CorridorTagger};
pub use zone::{PartitionLayer, SpecialLayer, ZoneClassifier, ZoneStats};

use crate::types::SurveyRecord;
use geo::Point;

/// Classifies and tags every record in place.
pub fn classify_records(
    records: &mut [SurveyRecord],
    zones: &ZoneClassifier,
    corridors: &CorridorTagger,
) {
    let points: Vec<Point<f64>> = records.iter().map(|r| r.position.point()).collect();
    let assignments = zones.classify(&points);
    let tags = corridors.tag_all(&points);

    for ((record, zone), corridor) in records.iter_mut().zip(assignments).zip(tags) {
        record.zone = zone;
        record.corridor = corridor;
    }
}
