use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::geo_utils::{BoundingBox, GeoPoint};

/// `highway` values that identify a way as a trail
pub const TRAIL_HIGHWAY_TYPES: [&str; 4] = ["path", "footway", "track", "trail"];

/// A map node, immutable once loaded
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OsmNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: BTreeMap<String, String>,
}

impl OsmNode {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// A map way: an ordered list of node references plus tags.
///
/// `bbox` covers only the nodes that resolved when the way was indexed and is
/// `None` when none did (clipped extracts reference nodes outside the region).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OsmWay {
    pub id: i64,
    pub nodes: Vec<i64>,
    pub tags: BTreeMap<String, String>,
    pub bbox: Option<BoundingBox>,
}

impl OsmWay {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// The `highway` value if it marks a trail
    pub fn trail_type(&self) -> Option<&str> {
        self.tag("highway")
            .filter(|highway| TRAIL_HIGHWAY_TYPES.contains(highway))
    }

    pub fn name(&self) -> Option<&str> {
        self.tag("name").filter(|name| !name.is_empty())
    }
}

/// A named trail way inside a query box, borrowed from the index
#[derive(Clone, Debug, PartialEq)]
pub struct TrailCandidate<'a> {
    pub way_id: i64,
    pub name: &'a str,
    pub trail_type: &'a str,
    pub node_ids: &'a [i64],
}

/// R-tree entry for a way envelope, [lon, lat] ordering
#[derive(Clone, Debug)]
struct WayEnvelope {
    way_id: i64,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for WayEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn bbox_envelope(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat])
}

/// Accumulates nodes and ways while an extract is streamed.
///
/// Way bounding boxes are computed when the way is added, from the nodes
/// seen so far; extracts list nodes before ways.
#[derive(Debug, Default)]
pub struct MapIndexBuilder {
    nodes: HashMap<i64, OsmNode>,
    ways: HashMap<i64, OsmWay>,
}

impl MapIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: OsmNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn add_way(&mut self, id: i64, nodes: Vec<i64>, tags: BTreeMap<String, String>) {
        let bbox = way_bbox(&nodes, &self.nodes);
        self.ways.insert(
            id,
            OsmWay {
                id,
                nodes,
                tags,
                bbox,
            },
        );
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn way_count(&self) -> usize {
        self.ways.len()
    }

    pub fn build(self) -> MapIndex {
        MapIndex::from_parts(self.nodes, self.ways)
    }
}

/// Bounding box over the resolvable member nodes of a way
pub fn way_bbox(node_ids: &[i64], nodes: &HashMap<i64, OsmNode>) -> Option<BoundingBox> {
    let points: Vec<GeoPoint> = node_ids
        .iter()
        .filter_map(|id| nodes.get(id))
        .map(OsmNode::point)
        .collect();
    BoundingBox::from_points(&points)
}

/// Read-only node/way index with a spatial index over way boxes.
///
/// Built once per run (fresh parse or cache) and shared by reference across
/// track workers.
#[derive(Debug)]
pub struct MapIndex {
    nodes: HashMap<i64, OsmNode>,
    ways: HashMap<i64, OsmWay>,
    tree: RTree<WayEnvelope>,
}

impl MapIndex {
    pub fn from_parts(nodes: HashMap<i64, OsmNode>, ways: HashMap<i64, OsmWay>) -> Self {
        let envelopes: Vec<WayEnvelope> = ways
            .values()
            .filter_map(|way| {
                way.bbox
                    .filter(BoundingBox::is_valid)
                    .map(|bbox| WayEnvelope {
                        way_id: way.id,
                        envelope: bbox_envelope(&bbox),
                    })
            })
            .collect();

        Self {
            nodes,
            ways,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn nodes(&self) -> &HashMap<i64, OsmNode> {
        &self.nodes
    }

    pub fn ways(&self) -> &HashMap<i64, OsmWay> {
        &self.ways
    }

    pub fn node(&self, id: i64) -> Option<&OsmNode> {
        self.nodes.get(&id)
    }

    pub fn way(&self, id: i64) -> Option<&OsmWay> {
        self.ways.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn way_count(&self) -> usize {
        self.ways.len()
    }

    /// Coordinates of the given node ids, skipping ids missing from the index
    pub fn resolve_points(&self, node_ids: &[i64]) -> Vec<GeoPoint> {
        node_ids
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(OsmNode::point)
            .collect()
    }

    /// Named trail ways whose bounding box overlaps `bbox`.
    ///
    /// Order is whatever the spatial index yields; callers must not rely on it.
    pub fn query_trails(&self, bbox: &BoundingBox) -> Vec<TrailCandidate<'_>> {
        self.tree
            .locate_in_envelope_intersecting(&bbox_envelope(bbox))
            .filter_map(|entry| self.ways.get(&entry.way_id))
            .filter_map(|way| {
                let trail_type = way.trail_type()?;
                let name = way.name()?;
                Some(TrailCandidate {
                    way_id: way.id,
                    name,
                    trail_type,
                    node_ids: &way.nodes,
                })
            })
            .collect()
    }
}

impl PartialEq for MapIndex {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.ways == other.ways
    }
}
