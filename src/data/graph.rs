use std::collections::BTreeMap;

use geo_types::LineString;
use serde::Serialize;

use super::osm::OsmId;
use crate::geometry::projection::Crs;

pub type NodeId = usize;
pub type EdgeId = usize;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub source_id: Option<OsmId>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub u: NodeId,
    pub v: NodeId,
    pub length_m: f64,
    pub gain_m: f64,
    pub loss_m: f64,
    pub highway: Option<String>,
    pub surface: Option<String>,
    pub flags: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    pub source_id: OsmId,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceEdge {
    pub u: OsmId,
    pub v: OsmId,
    pub key: u32,
    /// Geometry in the graph's planar CRS.
    pub geometry: LineString<f64>,
    pub highway: Option<String>,
    pub surface: Option<String>,
}

/// Input to the reindexer: original nodes in geographic coordinates, edges
/// with planar geometry in `crs`.
#[derive(Debug, Clone)]
pub struct SourceGraph {
    pub nodes: Vec<SourceNode>,
    pub edges: Vec<SourceEdge>,
    pub crs: Crs,
}

#[derive(Debug, Default, Clone)]
pub struct DensifiedGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}
