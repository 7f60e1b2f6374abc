use std::collections::HashMap;

pub type OsmId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct OsmNode {
    pub id: OsmId,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OsmWay {
    pub id: OsmId,
    pub node_refs: Vec<OsmId>,
    pub tags: HashMap<String, String>,
}

impl OsmWay {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    fn has_kv_pair(&self, key: &str, value: &str) -> bool {
        self.tag(key)
            .map(|tag_value| tag_value.split(';').any(|v| v.trim() == value))
            .unwrap_or(false)
    }

    /// Whether pedestrians may use this way.
    pub fn is_walkable(&self) -> bool {
        const EXCLUDED_HIGHWAYS: [&str; 14] = [
            "abandoned",
            "bus_guideway",
            "construction",
            "motor",
            "no",
            "planned",
            "platform",
            "proposed",
            "raceway",
            "razed",
            "motorway",
            "motorway_link",
            "trunk",
            "trunk_link",
        ];
        match self.tag("highway") {
            None => false,
            Some(highway) if EXCLUDED_HIGHWAYS.contains(&highway) => false,
            Some(_) => {
                !self.has_kv_pair("foot", "no")
                    && !self.has_kv_pair("access", "private")
                    && !self.has_kv_pair("area", "yes")
            }
        }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub struct RawNode {
    pub id: OsmId,
    pub lon: f64,
    pub lat: f64,
}

/// One directed edge of the extracted network. `geometry` runs from `u` to
/// `v`, both endpoints included.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub struct RawEdge {
    pub u: OsmId,
    pub v: OsmId,
    pub key: u32,
    pub highway: Option<String>,
    pub surface: Option<String>,
    pub geometry: Vec<LonLat>,
}

/// Routable network extracted from the OSM data, before densification.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
pub struct RawNetwork {
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
}
