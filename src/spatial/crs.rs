use crate::error::{Result, SyncError};
use geo::{Coord, MapCoords, MultiPolygon};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Coordinate references a layer may be declared in. Everything is
/// normalized to WGS84 longitude/latitude before any containment test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    Wgs84,
    WebMercator,
}

impl FromStr for Crs {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EPSG:4326" | "WGS84" | "CRS84" | "OGC:CRS84" => Ok(Crs::Wgs84),
            "EPSG:3857" | "EPSG:900913" => Ok(Crs::WebMercator),
            other => Err(SyncError::Config(format!(
                "Unsupported coordinate reference '{}' (expected EPSG:4326 or EPSG:3857)",
                other
            ))),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => f.write_str("EPSG:4326"),
            Crs::WebMercator => f.write_str("EPSG:3857"),
        }
    }
}

impl Crs {
    /// Recognizes the reference an ESRI `.prj` WKT string declares. `None`
    /// for anything that is neither geographic WGS84 nor Web Mercator.
    pub fn from_wkt(wkt: &str) -> Option<Crs> {
        let upper = wkt.trim().to_ascii_uppercase();
        if upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS") {
            return upper.contains("WGS").then_some(Crs::Wgs84);
        }
        let projected = upper.starts_with("PROJCS") || upper.starts_with("PROJCRS");
        let mercator = [
            "WEB_MERCATOR",
            "PSEUDO_MERCATOR",
            "PSEUDO-MERCATOR",
            "MERCATOR_AUXILIARY_SPHERE",
            "POPULAR_VISUALISATION",
            "\"3857\"",
            "\"900913\"",
        ]
        .iter()
        .any(|marker| upper.contains(marker));
        (projected && mercator).then_some(Crs::WebMercator)
    }

    pub fn to_wgs84(&self, geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
        match self {
            Crs::Wgs84 => geometry,
            Crs::WebMercator => geometry.map_coords(mercator_to_wgs84),
        }
    }
}

/// Spherical Web Mercator metres to WGS84 degrees.
pub fn mercator_to_wgs84(c: Coord<f64>) -> Coord<f64> {
    let lon = (c.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    Coord { x: lon, y: lat }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Contains, Point};

    #[test]
    fn test_parse_crs_names() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("epsg:3857".parse::<Crs>().unwrap(), Crs::WebMercator);
        assert_eq!("CRS84".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert!("EPSG:22185".parse::<Crs>().is_err());
    }

    #[test]
    fn test_from_wkt() {
        let geographic = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert_eq!(Crs::from_wkt(geographic), Some(Crs::Wgs84));

        let mercator = r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]]],PROJECTION["Mercator_Auxiliary_Sphere"],AUTHORITY["EPSG","3857"]]"#;
        assert_eq!(Crs::from_wkt(mercator), Some(Crs::WebMercator));

        let gauss_kruger = r#"PROJCS["POSGAR_94_Argentina_5",GEOGCS["GCS_POSGAR_1994",DATUM["D_POSGAR_1994"]],PROJECTION["Transverse_Mercator"]]"#;
        assert_eq!(Crs::from_wkt(gauss_kruger), None);
    }

    #[test]
    fn test_mercator_origin_and_known_point() {
        let origin = mercator_to_wgs84(Coord { x: 0.0, y: 0.0 });
        assert!(origin.x.abs() < 1e-9 && origin.y.abs() < 1e-9);

        // Buenos Aires area, roughly (-58.4, -34.6)
        let c = mercator_to_wgs84(Coord {
            x: -6_501_180.0,
            y: -4_110_000.0,
        });
        assert!((c.x - -58.4011).abs() < 1e-3, "lon {}", c.x);
        assert!((c.y - -34.6026).abs() < 1e-3, "lat {}", c.y);
    }

    #[test]
    fn test_transformed_polygon_contains_wgs84_point() {
        let square = MultiPolygon::new(vec![polygon![
            (x: -1_000_000.0, y: -1_000_000.0),
            (x: 1_000_000.0, y: -1_000_000.0),
            (x: 1_000_000.0, y: 1_000_000.0),
            (x: -1_000_000.0, y: 1_000_000.0),
        ]]);
        let wgs = Crs::WebMercator.to_wgs84(square);
        assert!(wgs.contains(&Point::new(5.0, 5.0)));
        assert!(!wgs.contains(&Point::new(10.0, 5.0)));
    }
}
