use geo::{BoundingRect, Contains, MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};

// Bounding box entry pointing back into the polygon list
struct IndexedPolygon {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedPolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// R-tree over a layer's polygons. Lookups return the lowest polygon index
/// whose interior contains the point; boundary points are not contained.
pub struct PolygonIndex {
    polygons: Vec<MultiPolygon<f64>>,
    tree: RTree<IndexedPolygon>,
}

impl PolygonIndex {
    pub fn new(polygons: Vec<MultiPolygon<f64>>) -> Self {
        let items: Vec<IndexedPolygon> = polygons
            .iter()
            .enumerate()
            .filter_map(|(index, polygon)| {
                // Empty geometries have no envelope and can never match
                let rect = polygon.bounding_rect()?;
                Some(IndexedPolygon {
                    index,
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        Self {
            polygons,
            tree: RTree::bulk_load(items),
        }
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn first_containing(&self, point: &Point<f64>) -> Option<usize> {
        let envelope = AABB::from_point([point.x(), point.y()]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|candidate| self.polygons[candidate.index].contains(point))
            .map(|candidate| candidate.index)
            .min()
    }

    pub fn contains(&self, point: &Point<f64>) -> bool {
        self.first_containing(point).is_some()
    }
}
