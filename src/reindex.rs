use std::collections::{BTreeMap, HashMap};

use geo::{Euclidean, Length};
use geo_types::Coord;
use log::{debug, info};
use thiserror::Error;

use crate::data::graph::{DensifiedGraph, Edge, Node, NodeId, SourceEdge, SourceGraph};
use crate::data::osm::OsmId;
use crate::geometry::densify::{densify, DensifyError};
use crate::geometry::distance::haversine_m;
use crate::geometry::projection::{Crs, ProjectionError, Projector};

/// Identifies an input edge in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRef {
    pub u: OsmId,
    pub v: OsmId,
    pub key: u32,
}

impl std::fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.u, self.v, self.key)
    }
}

impl From<&SourceEdge> for EdgeRef {
    fn from(edge: &SourceEdge) -> Self {
        EdgeRef { u: edge.u, v: edge.v, key: edge.key }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("edge {edge} references node {node} which is not in the graph")]
    MissingNodeReference { edge: EdgeRef, node: OsmId },

    #[error("node {node} appears more than once")]
    DuplicateNode { node: OsmId },

    #[error("edge {edge} has unusable geometry: {reason}")]
    DegenerateGeometry { edge: EdgeRef, reason: DensifyError },

    #[error("could not project edge {edge}: {reason}")]
    ProjectionFailure { edge: EdgeRef, reason: ProjectionError },

    #[error("max distance must be a positive number, got {max_distance}")]
    InvalidConfiguration { max_distance: f64 },
}

/// Single-pass densification of a [`SourceGraph`]. Owns the id counters and
/// the source id lookup; consumed by [`GraphReindexer::run`].
pub struct GraphReindexer<'a, P: Projector> {
    projector: &'a P,
    max_distance: f64,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    id_lookup: HashMap<OsmId, NodeId>,
}

impl<'a, P: Projector> GraphReindexer<'a, P> {
    pub fn new(projector: &'a P, max_distance: f64) -> Result<Self, GraphError> {
        if !max_distance.is_finite() || max_distance <= 0.0 {
            return Err(GraphError::InvalidConfiguration { max_distance });
        }
        Ok(GraphReindexer {
            projector,
            max_distance,
            nodes: Vec::new(),
            edges: Vec::new(),
            id_lookup: HashMap::new(),
        })
    }

    fn push_node(&mut self, source_id: Option<OsmId>, lat: f64, lon: f64) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            source_id,
            latitude: lat,
            longitude: lon,
            elevation_m: 0.0,
        });
        id
    }

    fn push_edge(&mut self, u: NodeId, v: NodeId, original: &SourceEdge) {
        let (from, to) = (&self.nodes[u], &self.nodes[v]);
        let length_m = haversine_m(from.latitude, from.longitude, to.latitude, to.longitude);
        self.edges.push(Edge {
            id: self.edges.len(),
            u,
            v,
            length_m,
            gain_m: 0.0,
            loss_m: 0.0,
            highway: original.highway.clone(),
            surface: original.surface.clone(),
            flags: BTreeMap::new(),
        });
    }

    fn lookup(&self, edge: &SourceEdge, node: OsmId) -> Result<NodeId, GraphError> {
        self.id_lookup
            .get(&node)
            .copied()
            .ok_or(GraphError::MissingNodeReference { edge: edge.into(), node })
    }

    /// Densified points of `edge` in geographic coordinates, endpoints included.
    fn geographic_points(&self, edge: &SourceEdge, crs: &Crs) -> Result<Vec<Coord<f64>>, GraphError> {
        let planar = match densify(&edge.geometry, self.max_distance) {
            Ok(points) => points,
            // A closed loop back onto its own node has nothing to subdivide.
            Err(DensifyError::ZeroLength) if edge.u == edge.v => return Ok(Vec::new()),
            Err(reason) => return Err(GraphError::DegenerateGeometry { edge: edge.into(), reason }),
        };
        let projected = self
            .projector
            .project(&planar, crs, &Crs::Geographic)
            .map_err(|reason| GraphError::ProjectionFailure { edge: edge.into(), reason })?;
        if projected.len() != planar.len() {
            return Err(GraphError::ProjectionFailure {
                edge: edge.into(),
                reason: ProjectionError::CountMismatch {
                    expected: planar.len(),
                    actual: projected.len(),
                },
            });
        }
        Ok(projected)
    }

    fn add_edge(&mut self, edge: &SourceEdge, crs: &Crs) -> Result<(), GraphError> {
        let u = self.lookup(edge, edge.u)?;
        let v = self.lookup(edge, edge.v)?;
        let points = self.geographic_points(edge, crs)?;

        let mut prev = u;
        for point in points.iter().skip(1).take(points.len().saturating_sub(2)) {
            let interior = self.push_node(None, point.y, point.x);
            self.push_edge(prev, interior, edge);
            prev = interior;
        }
        self.push_edge(prev, v, edge);
        Ok(())
    }

    pub fn run(mut self, graph: &SourceGraph) -> Result<DensifiedGraph, GraphError> {
        let mut source_nodes: Vec<_> = graph.nodes.iter().collect();
        source_nodes.sort_by_key(|node| node.source_id);
        for node in source_nodes {
            if self.id_lookup.contains_key(&node.source_id) {
                return Err(GraphError::DuplicateNode { node: node.source_id });
            }
            let id = self.push_node(Some(node.source_id), node.lat, node.lon);
            self.id_lookup.insert(node.source_id, id);
        }

        let mut source_edges: Vec<_> = graph.edges.iter().collect();
        source_edges.sort_by_key(|edge| (edge.u, edge.v, edge.key));
        for edge in source_edges {
            self.add_edge(edge, &graph.crs)?;
            debug!(u = edge.u, v = edge.v, planar_length = Euclidean.length(&edge.geometry); "Densified edge");
        }

        info!(
            source_nodes = graph.nodes.len(),
            source_edges = graph.edges.len(),
            nodes = self.nodes.len(),
            edges = self.edges.len();
            "Reindexed graph"
        );
        Ok(DensifiedGraph {
            nodes: self.nodes,
            edges: self.edges,
        })
    }
}
