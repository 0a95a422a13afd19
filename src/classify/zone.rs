use crate::config::ZonesConfig;
use crate::error::Result;
use crate::spatial::{load_layer, Crs, LayerFeature, PolygonIndex};
use crate::types::ZoneAssignment;
use geo::Point;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};

/// A high-priority layer whose matches all receive the same constant code.
pub struct SpecialLayer {
    pub name: String,
    pub code: f64,
    index: PolygonIndex,
}

impl SpecialLayer {
    pub fn new(name: impl Into<String>, code: f64, features: Vec<LayerFeature>) -> Self {
        Self {
            name: name.into(),
            code,
            index: PolygonIndex::new(features.into_iter().map(|f| f.geometry).collect()),
        }
    }

    pub fn polygon_count(&self) -> usize {
        self.index.len()
    }
}

/// The lowest-priority administrative partition. The code attribute is
/// resolved once from the alias list and every polygon's code is coerced
/// up front.
pub struct PartitionLayer {
    pub name: String,
    pub code_attribute: Option<String>,
    codes: Vec<Option<f64>>,
    index: PolygonIndex,
}

impl PartitionLayer {
    pub fn new(name: impl Into<String>, features: Vec<LayerFeature>, aliases: &[String]) -> Self {
        let name = name.into();
        let code_attribute = resolve_code_attribute(&features, aliases);

        let codes: Vec<Option<f64>> = match &code_attribute {
            Some(attribute) => features
                .iter()
                .map(|f| f.attributes.get(attribute).and_then(coerce_code))
                .collect(),
            None => {
                warn!(
                    "Partition layer '{}' has none of the code attributes {:?}; matches will carry no code",
                    name, aliases
                );
                vec![None; features.len()]
            }
        };

        if code_attribute.is_some() {
            let unparseable = codes.iter().filter(|c| c.is_none()).count();
            if unparseable > 0 {
                warn!(
                    "Partition layer '{}': {} polygons have a non-numeric '{}' value",
                    name,
                    unparseable,
                    code_attribute.as_deref().unwrap_or_default()
                );
            }
        }

        Self {
            name,
            code_attribute,
            codes,
            index: PolygonIndex::new(features.into_iter().map(|f| f.geometry).collect()),
        }
    }

    pub fn polygon_count(&self) -> usize {
        self.index.len()
    }
}

/// First alias present in the layer's attribute schema (union of all
/// features' keys).
pub fn resolve_code_attribute(features: &[LayerFeature], aliases: &[String]) -> Option<String> {
    aliases
        .iter()
        .find(|alias| features.iter().any(|f| f.attributes.contains_key(alias.as_str())))
        .cloned()
}

/// Numeric coercion of an attribute value. Anything that is not a finite
/// number (or text holding one) is `None`.
pub fn coerce_code(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Priority-ordered point classifier: special layers in order, then the
/// partition. A point consumed by one layer is never tested by a later one.
pub struct ZoneClassifier {
    special: Vec<SpecialLayer>,
    partition: PartitionLayer,
}

impl ZoneClassifier {
    pub fn new(special: Vec<SpecialLayer>, partition: PartitionLayer) -> Self {
        Self { special, partition }
    }

    /// Loads every configured layer. Any failure aborts the load.
    #[instrument(skip(config))]
    pub fn load(config: &ZonesConfig) -> Result<Self> {
        let mut special = Vec::with_capacity(config.special.len());
        for zone in &config.special {
            let crs: Crs = zone.crs.parse()?;
            let features = load_layer(&zone.name, &zone.path, crs)?;
            special.push(SpecialLayer::new(zone.name.clone(), zone.code, features));
        }

        let partition_config = &config.partition;
        let crs: Crs = partition_config.crs.parse()?;
        let features = load_layer(&partition_config.name, &partition_config.path, crs)?;
        let partition = PartitionLayer::new(
            partition_config.name.clone(),
            features,
            &partition_config.code_aliases,
        );

        info!(
            "Loaded {} special layers and partition '{}' ({} polygons, code attribute {:?})",
            special.len(),
            partition.name,
            partition.polygon_count(),
            partition.code_attribute
        );
        Ok(Self::new(special, partition))
    }

    pub fn special_layers(&self) -> &[SpecialLayer] {
        &self.special
    }

    pub fn partition(&self) -> &PartitionLayer {
        &self.partition
    }

    /// One assignment per input point, in input order.
    pub fn classify(&self, points: &[Point<f64>]) -> Vec<ZoneAssignment> {
        let mut zones: Vec<Option<ZoneAssignment>> = vec![None; points.len()];
        let mut remaining: Vec<usize> = (0..points.len()).collect();

        for layer in &self.special {
            let (matched, rest): (Vec<usize>, Vec<usize>) = remaining
                .par_iter()
                .partition(|&&i| layer.index.contains(&points[i]));
            for &i in &matched {
                zones[i] = Some(ZoneAssignment::Special {
                    layer: layer.name.clone(),
                    code: layer.code,
                });
            }
            info!("{} points classified as '{}' ({})", matched.len(), layer.name, layer.code);
            remaining = rest;
        }

        let partition_matches: Vec<(usize, Option<usize>)> = remaining
            .par_iter()
            .map(|&i| (i, self.partition.index.first_containing(&points[i])))
            .collect();
        let mut matched = 0;
        for (i, polygon) in partition_matches {
            if let Some(polygon) = polygon {
                zones[i] = Some(ZoneAssignment::Partition {
                    code: self.partition.codes[polygon],
                });
                matched += 1;
            }
        }
        info!("{} points classified by partition '{}'", matched, self.partition.name);

        zones
            .into_iter()
            .map(|z| z.unwrap_or(ZoneAssignment::Unclassified))
            .collect()
    }

    /// Same as `classify`, keyed by record identifier.
    pub fn classify_by_id(&self, points: &[(String, Point<f64>)]) -> HashMap<String, ZoneAssignment> {
        let geometry: Vec<Point<f64>> = points.iter().map(|(_, p)| *p).collect();
        points
            .iter()
            .map(|(id, _)| id.clone())
            .zip(self.classify(&geometry))
            .collect()
    }
}

/// Per-zone counts for run reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneStats {
    pub special: BTreeMap<String, usize>,
    /// Keyed by the code's display form, e.g. `"3"` or `"14.5"`.
    pub partition: BTreeMap<String, usize>,
    pub partition_without_code: usize,
    pub unclassified: usize,
}

impl ZoneStats {
    pub fn from_assignments<'a>(zones: impl IntoIterator<Item = &'a ZoneAssignment>) -> Self {
        let mut stats = Self::default();
        for zone in zones {
            match zone {
                ZoneAssignment::Special { layer, .. } => {
                    *stats.special.entry(layer.clone()).or_default() += 1;
                }
                ZoneAssignment::Partition { code: Some(code) } => {
                    *stats.partition.entry(code.to_string()).or_default() += 1;
                }
                ZoneAssignment::Partition { code: None } => stats.partition_without_code += 1,
                ZoneAssignment::Unclassified => stats.unclassified += 1,
            }
        }
        stats
    }
}
