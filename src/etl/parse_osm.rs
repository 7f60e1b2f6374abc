use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str;

use log::{info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::UserConfig;
use crate::data::OsmMapData;
use crate::data::osm::{LonLat, OsmId, OsmNode, OsmWay, RawEdge, RawNetwork, RawNode};
use crate::errors::Result;

use super::{remove_if_exists, Etl};

pub const ETL_NAME: &str = "parse_osm";
pub const OUTPUT_FILE_NAME: &str = "raw_network.rkyv";

enum ParserState {
    Top,
    Node,
    Way(OsmWay),
    Relation,
}

pub struct ParseOsmEtl<'a> {
    config: &'a UserConfig,
}

impl ParseOsmEtl<'_> {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    fn parse_id(value: &[u8]) -> Result<OsmId> {
        Ok(str::from_utf8(value)?.parse()?)
    }

    fn parse_node(el: &BytesStart) -> Result<Option<OsmNode>> {
        let mut id: Option<OsmId> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;

        for attribute_res in el.attributes() {
            let attribute = attribute_res?;
            match attribute.key.as_ref() {
                b"id" => id = Some(Self::parse_id(&attribute.value)?),
                b"lat" => lat = Some(str::from_utf8(&attribute.value)?.parse()?),
                b"lon" => lon = Some(str::from_utf8(&attribute.value)?.parse()?),
                _ => (),
            }
        }

        match (id, lat, lon) {
            (Some(id), Some(lat), Some(lon)) => Ok(Some(OsmNode { id, lat, lon })),
            _ => {
                warn!(id = id.unwrap_or_default(); "Skipping node without id or coordinates");
                Ok(None)
            },
        }
    }

    fn parse_way(el: &BytesStart) -> Result<OsmWay> {
        let mut way = OsmWay::default();
        for attribute_res in el.attributes() {
            let attribute = attribute_res?;
            if attribute.key.as_ref() == b"id" {
                way.id = Self::parse_id(&attribute.value)?;
            }
        }
        Ok(way)
    }

    fn parse_nd(el: &BytesStart) -> Result<Option<OsmId>> {
        for attribute_res in el.attributes() {
            let attribute = attribute_res?;
            if attribute.key.as_ref() == b"ref" {
                return Ok(Some(Self::parse_id(&attribute.value)?));
            }
        }
        Ok(None)
    }

    fn parse_tag(el: &BytesStart) -> Result<Option<(String, String)>> {
        let mut key = None;
        let mut value = None;
        for attribute_res in el.attributes() {
            let attribute = attribute_res?;
            match attribute.key.as_ref() {
                b"k" => key = Some(attribute.unescape_value()?.into_owned()),
                b"v" => value = Some(attribute.unescape_value()?.into_owned()),
                _ => (),
            }
        }
        Ok(key.zip(value))
    }

    fn add_way_member(state: &mut ParserState, el: &BytesStart) -> Result<()> {
        if let ParserState::Way(way) = state {
            match el.name().as_ref() {
                b"nd" => way.node_refs.extend(Self::parse_nd(el)?),
                b"tag" => way.tags.extend(Self::parse_tag(el)?),
                _ => (),
            }
        }
        Ok(())
    }

    /// Streams nodes and ways out of an OSM XML document.
    pub fn read_osm<R: BufRead>(reader: &mut Reader<R>) -> Result<OsmMapData> {
        let mut buf = Vec::new();
        let mut output = OsmMapData::default();
        let mut state = ParserState::Top;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Eof => break,
                Event::Text(_e) => return Err("Didn't expect to see Text in OSM file.".into()),
                Event::Start(e) => match e.name().as_ref() {
                    b"node" => {
                        if let Some(node) = Self::parse_node(&e)? {
                            output.nodes.insert(node.id, node);
                        }
                        state = ParserState::Node;
                    },
                    b"way" => state = ParserState::Way(Self::parse_way(&e)?),
                    b"relation" => state = ParserState::Relation,
                    _ => Self::add_way_member(&mut state, &e)?,
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"node" => {
                        if let Some(node) = Self::parse_node(&e)? {
                            output.nodes.insert(node.id, node);
                        }
                    },
                    _ => Self::add_way_member(&mut state, &e)?,
                },
                Event::End(e) => match e.name().as_ref() {
                    b"node" | b"relation" => state = ParserState::Top,
                    b"way" => {
                        if let ParserState::Way(way) = std::mem::replace(&mut state, ParserState::Top) {
                            output.ways.push(way);
                        }
                    },
                    _ => (),
                },
                // Declarations, comments, doctypes and the like carry nothing we need.
                _ => (),
            }
            // if we don't keep a borrow elsewhere, we can clear the buffer to keep memory usage low
            buf.clear();
        }
        Ok(output)
    }

    fn create_osm_reader(&self) -> Result<Reader<Box<dyn BufRead>>> {
        let path = Path::new(&self.config.data_path);
        let file_reader = BufReader::new(File::open(path)?);
        let source: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "xz") {
            Box::new(BufReader::new(XzDecoder::new(file_reader)))
        } else {
            Box::new(file_reader)
        };
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);

        Ok(reader)
    }

    pub fn new(config: &UserConfig) -> ParseOsmEtl {
        ParseOsmEtl {
            config
        }
    }
}

/// Splits walkable ways into edges at every way endpoint and every node
/// shared between ways. Each piece is emitted in both directions, and only
/// the largest connected component is kept.
pub fn build_walk_network(map: &OsmMapData) -> RawNetwork {
    let ways: Vec<(&OsmWay, Vec<OsmId>)> = map.ways.iter()
        .filter(|way| way.is_walkable())
        .map(|way| {
            // Refs outside the extract are dropped, as are consecutive repeats.
            let mut refs: Vec<OsmId> = way.node_refs.iter()
                .copied()
                .filter(|id| map.nodes.contains_key(id))
                .collect();
            refs.dedup();
            (way, refs)
        })
        .filter(|(_, refs)| refs.len() >= 2)
        .collect();

    let mut use_count: HashMap<OsmId, usize> = HashMap::new();
    for (_, refs) in &ways {
        for id in refs {
            *use_count.entry(*id).or_default() += 1;
        }
    }

    let mut keys: HashMap<(OsmId, OsmId), u32> = HashMap::new();
    let mut endpoints: BTreeSet<OsmId> = BTreeSet::new();
    let mut edges = Vec::new();
    let mut push_edge = |way: &OsmWay, piece: Vec<OsmId>| {
        let (u, v) = (piece[0], piece[piece.len() - 1]);
        let key = keys.entry((u, v)).or_insert(0);
        endpoints.extend([u, v]);
        edges.push(RawEdge {
            u,
            v,
            key: *key,
            highway: way.tag("highway").map(str::to_string),
            surface: way.tag("surface").map(str::to_string),
            geometry: piece.iter()
                .map(|id| &map.nodes[id])
                .map(|node| LonLat { lon: node.lon, lat: node.lat })
                .collect(),
        });
        *key += 1;
    };

    for (way, refs) in &ways {
        let mut start = 0;
        for idx in 1..refs.len() {
            if idx < refs.len() - 1 && use_count[&refs[idx]] < 2 {
                continue;
            }
            let piece = refs[start..=idx].to_vec();
            let mut reversed = piece.clone();
            reversed.reverse();
            push_edge(way, piece);
            push_edge(way, reversed);
            start = idx;
        }
    }

    let nodes: Vec<RawNode> = endpoints.iter()
        .map(|id| &map.nodes[id])
        .map(|node| RawNode { id: node.id, lon: node.lon, lat: node.lat })
        .collect();

    info!(walkable_ways = ways.len(), nodes = nodes.len(), edges = edges.len(); "Extracted walk network");
    retain_largest_component(RawNetwork { nodes, edges })
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry { return; }
        if self.rank[rx] < self.rank[ry] {
            self.parent[rx] = ry;
        } else if self.rank[rx] > self.rank[ry] {
            self.parent[ry] = rx;
        } else {
            self.parent[ry] = rx;
            self.rank[rx] += 1;
        }
    }
}

/// Drops every node and edge outside the largest connected component, so
/// unreachable islands never reach the routing tables. Ties go to the
/// component holding the lowest node id.
pub fn retain_largest_component(network: RawNetwork) -> RawNetwork {
    let index: HashMap<OsmId, usize> = network.nodes.iter()
        .enumerate()
        .map(|(idx, node)| (node.id, idx))
        .collect();

    let mut uf = UnionFind::new(network.nodes.len());
    for edge in &network.edges {
        if let (Some(&u), Some(&v)) = (index.get(&edge.u), index.get(&edge.v)) {
            uf.union(u, v);
        }
    }

    let roots: Vec<usize> = (0..network.nodes.len()).map(|idx| uf.find(idx)).collect();
    // root -> (node count, lowest node id)
    let mut components: HashMap<usize, (usize, OsmId)> = HashMap::new();
    for (node, root) in network.nodes.iter().zip(&roots) {
        let entry = components.entry(*root).or_insert((0, node.id));
        entry.0 += 1;
        entry.1 = entry.1.min(node.id);
    }
    let Some(largest) = components.iter()
        .max_by_key(|(_, (count, lowest))| (*count, Reverse(*lowest)))
        .map(|(root, _)| *root)
    else {
        return network;
    };

    let in_largest = |id: &OsmId| index.get(id).is_some_and(|&idx| roots[idx] == largest);
    let total_nodes = network.nodes.len();
    let total_edges = network.edges.len();
    let nodes: Vec<RawNode> = network.nodes.into_iter()
        .filter(|node| in_largest(&node.id))
        .collect();
    let edges: Vec<RawEdge> = network.edges.into_iter()
        .filter(|edge| in_largest(&edge.u) && in_largest(&edge.v))
        .collect();

    if nodes.len() < total_nodes {
        info!(
            components = components.len(),
            dropped_nodes = total_nodes - nodes.len(),
            dropped_edges = total_edges - edges.len();
            "Dropped disconnected islands"
        );
    }
    RawNetwork { nodes, edges }
}

impl Etl for ParseOsmEtl<'_> {
    type Input = OsmMapData;
    type Output = RawNetwork;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(Self::output_path(dir).try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        remove_if_exists(&Self::output_path(dir))
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        let mut reader = self.create_osm_reader()?;
        let map = Self::read_osm(&mut reader)?;
        info!(etl_name = ETL_NAME, nodes = map.nodes.len(), ways = map.ways.len(); "Read OSM elements");
        Ok(map)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        Ok(build_walk_network(&input))
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        fs::create_dir_all(dir)?;
        let bytes = rkyv::to_bytes::<_, 256>(&output)
            .map_err(|err| format!("Could not serialize raw network: {:?}", err))?;
        let mut output_file = File::create(Self::output_path(dir))?;
        output_file.write_all(&bytes)?;
        Ok(())
    }
}
