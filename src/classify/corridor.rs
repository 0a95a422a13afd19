use crate::config::CorridorConfig;
use geo::{Contains, LineString, Point, Polygon};

pub struct Corridor {
    pub name: String,
    polygon: Polygon<f64>,
}

impl Corridor {
    pub fn new(name: impl Into<String>, ring: &[[f64; 2]]) -> Self {
        let exterior: LineString<f64> = ring.iter().map(|&[lon, lat]| (lon, lat)).collect::<Vec<_>>().into();
        Self {
            name: name.into(),
            polygon: Polygon::new(exterior, vec![]),
        }
    }
}

/// Tags points with the patrol corridor containing them.
///
/// Corridors are tested in configuration order and every containing
/// corridor overwrites the previous tag, so with overlapping corridors the
/// last one wins, not the first.
pub struct CorridorTagger {
    corridors: Vec<Corridor>,
}

impl CorridorTagger {
    pub fn new(corridors: Vec<Corridor>) -> Self {
        Self { corridors }
    }

    pub fn from_config(corridors: &[CorridorConfig]) -> Self {
        Self::new(
            corridors
                .iter()
                .map(|c| Corridor::new(c.name.clone(), &c.ring))
                .collect(),
        )
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.corridors.iter().map(|c| c.name.as_str())
    }

    pub fn tag(&self, point: &Point<f64>) -> Option<&str> {
        let mut tag = None;
        for corridor in &self.corridors {
            if corridor.polygon.contains(point) {
                tag = Some(corridor.name.as_str());
            }
        }
        tag
    }

    pub fn tag_all(&self, points: &[Point<f64>]) -> Vec<Option<String>> {
        points
            .iter()
            .map(|p| self.tag(p).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_corridors;

    fn square(name: &str, x0: f64, y0: f64, size: f64) -> Corridor {
        Corridor::new(
            name,
            &[[x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size]],
        )
    }

    #[test]
    fn test_overlap_is_last_write_wins() {
        // Not first-match: whichever overlapping corridor comes later is kept
        let tagger = CorridorTagger::new(vec![
            square("first", 0.0, 0.0, 10.0),
            square("second", 5.0, 5.0, 10.0),
        ]);
        assert_eq!(tagger.tag(&Point::new(7.0, 7.0)), Some("second"));
        assert_eq!(tagger.tag(&Point::new(1.0, 1.0)), Some("first"));

        let reversed = CorridorTagger::new(vec![
            square("second", 5.0, 5.0, 10.0),
            square("first", 0.0, 0.0, 10.0),
        ]);
        assert_eq!(reversed.tag(&Point::new(7.0, 7.0)), Some("first"));
    }

    #[test]
    fn test_outside_every_corridor_is_none() {
        let tagger = CorridorTagger::new(vec![square("only", 0.0, 0.0, 1.0)]);
        assert_eq!(tagger.tag_all(&[Point::new(3.0, 3.0)]), vec![None]);
    }

    #[test]
    fn test_default_corridors() {
        let tagger = CorridorTagger::from_config(&default_corridors());
        assert_eq!(
            tagger.names().collect::<Vec<_>>(),
            vec!["Recorrido A", "Recorrido B", "Recorrido C"]
        );
        assert_eq!(tagger.tag(&Point::new(-58.40, -34.585)), Some("Recorrido C"));
        assert_eq!(tagger.tag(&Point::new(-58.45, -34.60)), None);
    }
}
