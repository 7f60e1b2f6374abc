use std::collections::HashMap;

use self::osm::{OsmId, OsmNode, OsmWay};

pub mod graph;
pub mod osm;

/// Map data as read from the .osm file. Only nodes and ways are kept, tags
/// only for ways.
#[derive(Debug, Default, Clone)]
pub struct OsmMapData {
    pub nodes: HashMap<OsmId, OsmNode>,
    pub ways: Vec<OsmWay>,
}
