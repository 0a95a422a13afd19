use crate::error::{Result, SyncError};
use crate::spatial::Crs;
use crate::types::RawRecord;
use anyhow::{anyhow, Context};
use geo::{Geometry, MultiPolygon};
use geojson::GeoJson;
use serde_json::Value;
use shapefile::dbase::FieldValue;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

/// One polygon feature of a layer with its attribute table row.
#[derive(Debug, Clone)]
pub struct LayerFeature {
    pub geometry: MultiPolygon<f64>,
    pub attributes: RawRecord,
}

/// Loads every polygon of a layer file and normalizes it to WGS84.
/// Format is chosen by extension: GeoJSON, Shapefile, KML or KMZ.
/// Unreadable files and layers without polygons are errors.
pub fn load_layer(name: &str, path: &Path, crs: Crs) -> Result<Vec<LayerFeature>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| SyncError::layer(name, format!("{:?} has no extension", path)))?;

    info!("Loading layer '{}' from {:?} ({})", name, path, crs);
    let loaded = match extension.as_str() {
        "json" | "geojson" => load_geojson(path),
        "shp" => {
            check_projection(name, path, crs);
            load_shapefile(path)
        }
        "kml" => load_kml(path, false),
        "kmz" => load_kml(path, true),
        other => Err(anyhow!("unsupported layer format '{}'", other)),
    };
    let features = loaded.map_err(|e| SyncError::layer(name, format!("{:#}", e)))?;

    if features.is_empty() {
        return Err(SyncError::layer(name, "layer contains no polygons"));
    }

    let features: Vec<LayerFeature> = features
        .into_iter()
        .map(|f| LayerFeature {
            geometry: crs.to_wgs84(f.geometry),
            attributes: f.attributes,
        })
        .collect();
    debug!("Layer '{}' has {} polygon features", name, features.len());
    Ok(features)
}

/// Keeps the polygonal part of a geometry, flattening collections.
pub fn polygons_of(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::GeometryCollection(gc) => {
            let polygons: Vec<_> = gc
                .0
                .into_iter()
                .filter_map(polygons_of)
                .flat_map(|mp| mp.0)
                .collect();
            (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
        }
        _ => None,
    }
}

fn load_geojson(path: &Path) -> anyhow::Result<Vec<LayerFeature>> {
    let file = File::open(path).with_context(|| format!("Failed to open GeoJSON {:?}", path))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;

    let features = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => vec![geojson::Feature {
            bbox: None,
            geometry: Some(g),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    };

    let mut out = Vec::new();
    for feature in features {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geometry: Geometry<f64> = geometry
            .value
            .try_into()
            .map_err(|e| anyhow!("Failed to convert GeoJSON geometry: {:?}", e))?;
        if let Some(geometry) = polygons_of(geometry) {
            out.push(LayerFeature {
                geometry,
                attributes: feature.properties.unwrap_or_default(),
            });
        }
    }
    Ok(out)
}

/// Compares the shapefile's `.prj` with the configured reference. Only
/// logs: a mismatch usually means no point will ever fall inside the layer.
fn check_projection(name: &str, path: &Path, crs: Crs) {
    let prj = path.with_extension("prj");
    let Ok(wkt) = fs::read_to_string(&prj) else {
        debug!("Layer '{}' has no readable {:?}, assuming {}", name, prj, crs);
        return;
    };
    match Crs::from_wkt(&wkt) {
        Some(declared) if declared == crs => debug!("Layer '{}' .prj agrees with {}", name, crs),
        Some(declared) => warn!(
            "Layer '{}' .prj declares {} but the layer is configured as {}",
            name, declared, crs
        ),
        None => warn!(
            "Layer '{}' .prj is neither {} nor {} (configured {}): {}",
            name,
            Crs::Wgs84,
            Crs::WebMercator,
            crs,
            wkt.trim()
        ),
    }
}

fn load_shapefile(path: &Path) -> anyhow::Result<Vec<LayerFeature>> {
    let mut reader = shapefile::Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile {:?}", path))?;

    let mut out = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;
        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue,
        };

        // Sorted so attribute order does not depend on hashing
        let fields: BTreeMap<String, Value> = record
            .into_iter()
            .map(|(name, value)| (name, field_to_json(value)))
            .collect();
        out.push(LayerFeature {
            geometry,
            attributes: fields.into_iter().collect(),
        });
    }
    Ok(out)
}

fn field_to_json(value: FieldValue) -> Value {
    let number = |n: f64| {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    };
    match value {
        FieldValue::Character(Some(s)) => Value::String(s.trim().to_string()),
        FieldValue::Memo(s) => Value::String(s),
        FieldValue::Numeric(Some(n)) => number(n),
        FieldValue::Float(Some(f)) => number(f as f64),
        FieldValue::Double(d) => number(d),
        FieldValue::Currency(c) => number(c),
        FieldValue::Integer(i) => Value::from(i),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        _ => Value::Null,
    }
}

fn load_kml(path: &Path, zipped: bool) -> anyhow::Result<Vec<LayerFeature>> {
    let document = if zipped {
        kml::KmlReader::<_, f64>::from_kmz_path(path)
            .with_context(|| format!("Failed to open KMZ {:?}", path))?
            .read()
            .context("Failed to parse KML inside KMZ")?
    } else {
        kml::KmlReader::<_, f64>::from_path(path)
            .with_context(|| format!("Failed to open KML {:?}", path))?
            .read()
            .context("Failed to parse KML")?
    };

    let collection = kml::quick_collection(document).context("Failed to convert KML geometry")?;
    Ok(collection
        .0
        .into_iter()
        .filter_map(polygons_of)
        .map(|geometry| LayerFeature {
            geometry,
            attributes: RawRecord::new(),
        })
        .collect())
}
