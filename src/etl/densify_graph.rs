use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use geo_types::{Coord, LineString};
use log::info;
use rkyv::AlignedVec;
use serde::Serialize;

use crate::UserConfig;
use crate::data::graph::{DensifiedGraph, SourceEdge, SourceGraph, SourceNode};
use crate::data::osm::RawNetwork;
use crate::errors::Result;
use crate::etl::parse_osm;
use crate::geometry::projection::{centroid, Crs, Projector, TangentPlaneProjector};
use crate::reindex::{EdgeRef, GraphError, GraphReindexer};

use super::{remove_if_exists, Etl};

pub const ETL_NAME: &str = "densify_graph";
pub const NODES_FILE_NAME: &str = "nodes.json";
pub const EDGES_FILE_NAME: &str = "edges.json";

pub struct DensifyGraphEtl<'a> {
    config: &'a UserConfig,
    projector: TangentPlaneProjector,
}

/// Moves a raw network's edge geometries into `planar`, or into a tangent
/// plane centred on its nodes when no plane is given.
pub fn project_network<P: Projector>(network: &RawNetwork, projector: &P, planar: Option<&Crs>) -> Result<SourceGraph> {
    let origin = centroid(network.nodes.iter().map(|node| Coord { x: node.lon, y: node.lat }))
        .ok_or("Raw network has no nodes")?;
    let crs = match planar {
        Some(crs) => crs.clone(),
        None => Crs::LocalTangentPlane { origin_lon: origin.x, origin_lat: origin.y },
    };

    let nodes = network.nodes.iter()
        .map(|node| SourceNode { source_id: node.id, lat: node.lat, lon: node.lon })
        .collect();

    let mut edges = Vec::with_capacity(network.edges.len());
    for edge in tqdm::tqdm(network.edges.iter()) {
        let geographic: Vec<Coord<f64>> = edge.geometry.iter()
            .map(|point| Coord { x: point.lon, y: point.lat })
            .collect();
        let planar = projector.project(&geographic, &Crs::Geographic, &crs)
            .map_err(|reason| GraphError::ProjectionFailure {
                edge: EdgeRef { u: edge.u, v: edge.v, key: edge.key },
                reason,
            })?;
        edges.push(SourceEdge {
            u: edge.u,
            v: edge.v,
            key: edge.key,
            geometry: LineString::new(planar),
            highway: edge.highway.clone(),
            surface: edge.surface.clone(),
        });
    }

    Ok(SourceGraph { nodes, edges, crs })
}

impl DensifyGraphEtl<'_> {
    fn nodes_path(dir: &Path) -> PathBuf {
        dir.join(NODES_FILE_NAME)
    }

    fn edges_path(dir: &Path) -> PathBuf {
        dir.join(EDGES_FILE_NAME)
    }

    fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, records)?;
        writer.flush()?;
        Ok(())
    }

    pub fn new(config: &UserConfig) -> DensifyGraphEtl {
        DensifyGraphEtl {
            config,
            projector: TangentPlaneProjector,
        }
    }
}

impl Etl for DensifyGraphEtl<'_> {
    type Input = RawNetwork;
    type Output = DensifiedGraph;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(Self::nodes_path(dir).try_exists()? && Self::edges_path(dir).try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        remove_if_exists(&Self::nodes_path(dir))?;
        remove_if_exists(&Self::edges_path(dir))
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        let buf = fs::read(dir.join(parse_osm::OUTPUT_FILE_NAME))?;
        let mut bytes = AlignedVec::with_capacity(buf.len());
        bytes.extend_from_slice(&buf);

        let network: RawNetwork = unsafe {
            rkyv::from_bytes_unchecked(&bytes)
                .map_err(|err| format!("Could not deserialize raw network cache: {:?}", err))?
        };
        Ok(network)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let planar = self.config.planar_crs.as_deref()
            .map(str::parse::<Crs>)
            .transpose()
            .map_err(|err| format!("Invalid planar_crs: {}", err))?;
        let source = project_network(&input, &self.projector, planar.as_ref())?;
        let reindexer = GraphReindexer::new(&self.projector, self.config.max_distance)?;
        Ok(reindexer.run(&source)?)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        Self::write_records(&Self::nodes_path(dir), &output.nodes)?;
        Self::write_records(&Self::edges_path(dir), &output.edges)?;
        info!(etl_name = ETL_NAME, nodes = output.nodes.len(), edges = output.edges.len(); "Wrote densified graph");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::data::osm::{LonLat, RawEdge, RawNode};
    use crate::etl::parse_osm::ParseOsmEtl;

    // A footway and a flight of steps meeting at node 2; the footway is roughly 150 m long.
    const STREET_OSM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="59.9100" lon="10.7400"/>
  <node id="2" lat="59.9100" lon="10.7427"/>
  <node id="3" lat="59.9101" lon="10.7428"/>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="footway"/>
    <tag k="surface" v="asphalt"/>
  </way>
  <way id="11">
    <nd ref="2"/>
    <nd ref="3"/>
    <tag k="highway" v="steps"/>
  </way>
</osm>
"#;

    fn config(dir: &Path, max_distance: f64) -> UserConfig {
        config_with_crs(dir, max_distance, None)
    }

    fn config_with_crs(dir: &Path, max_distance: f64, planar_crs: Option<&str>) -> UserConfig {
        let data_path = dir.join("street.osm");
        fs::write(&data_path, STREET_OSM).unwrap();
        UserConfig {
            data_path: data_path.to_string_lossy().into_owned(),
            dest_path: dir.join("out").to_string_lossy().into_owned(),
            max_distance,
            skip_download: false,
            planar_crs: planar_crs.map(str::to_string),
        }
    }

    fn read_records(path: PathBuf) -> Vec<Value> {
        let text = fs::read_to_string(path).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn pipeline_writes_densified_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path(), 25.0);
        let out = Path::new(&config.dest_path);

        ParseOsmEtl::new(&config).process(out).unwrap();
        DensifyGraphEtl::new(&config).process(out).unwrap();

        let nodes = read_records(out.join(NODES_FILE_NAME));
        let edges = read_records(out.join(EDGES_FILE_NAME));

        // 3 original nodes; the ~150 m footway gains 6 interior nodes per direction.
        let originals = nodes.iter().filter(|n| !n["source_id"].is_null()).count();
        assert_eq!(originals, 3);
        assert_eq!(nodes.len(), 3 + 2 * 6);
        assert_eq!(edges.len(), 2 * 7 + 2);

        for (idx, node) in nodes.iter().enumerate() {
            assert_eq!(node["id"], idx);
            assert_eq!(node["elevation_m"], 0.0);
        }
        for (idx, edge) in edges.iter().enumerate() {
            assert_eq!(edge["id"], idx);
            assert!(edge["u"].as_u64().unwrap() < nodes.len() as u64);
            assert!(edge["v"].as_u64().unwrap() < nodes.len() as u64);
            assert!(edge["length_m"].as_f64().unwrap() <= 25.01);
            assert_eq!(edge["flags"], Value::Object(Default::default()));
        }
        assert_eq!(edges[0]["highway"], "footway");
        assert_eq!(edges[0]["surface"], "asphalt");
        assert!(edges.last().unwrap()["surface"].is_null());
    }

    #[test]
    fn cached_network_is_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path(), 25.0);
        let out = Path::new(&config.dest_path);

        let mut parse = ParseOsmEtl::new(&config);
        parse.process(out).unwrap();
        assert!(parse.is_cached(out).unwrap());

        // The source is gone, so only the cache can satisfy a second run.
        fs::remove_file(&config.data_path).unwrap();
        parse.process(out).unwrap();

        parse.clean(out).unwrap();
        assert!(parse.process(out).is_err());
    }

    #[test]
    fn invalid_max_distance_fails_transform() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path(), 0.0);
        let out = Path::new(&config.dest_path);

        ParseOsmEtl::new(&config).process(out).unwrap();
        let mut densify = DensifyGraphEtl::new(&config);
        let err = densify.process(out).unwrap_err();
        assert!(err.message.contains("max distance"));
        assert!(!densify.is_cached(out).unwrap());
    }

    #[test]
    fn configured_plane_gives_the_same_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_crs(tmp.path(), 25.0, Some("LTP:10.74,59.91"));
        let out = Path::new(&config.dest_path);

        ParseOsmEtl::new(&config).process(out).unwrap();
        DensifyGraphEtl::new(&config).process(out).unwrap();
        assert_eq!(read_records(out.join(NODES_FILE_NAME)).len(), 3 + 2 * 6);
        assert_eq!(read_records(out.join(EDGES_FILE_NAME)).len(), 2 * 7 + 2);
    }

    #[test]
    fn named_plane_fails_without_writing_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with_crs(tmp.path(), 25.0, Some("EPSG:25832"));
        let out = Path::new(&config.dest_path);

        ParseOsmEtl::new(&config).process(out).unwrap();
        let mut densify = DensifyGraphEtl::new(&config);
        let err = densify.process(out).unwrap_err();
        assert!(err.message.contains("EPSG:25832"));
        assert!(!densify.is_cached(out).unwrap());

        let config = config_with_crs(tmp.path(), 25.0, Some("LTP:nowhere"));
        let err = DensifyGraphEtl::new(&config).process(out).unwrap_err();
        assert!(err.message.contains("Invalid planar_crs"));
    }

    #[test]
    fn projection_keeps_endpoints_on_node_coordinates() {
        let network = RawNetwork {
            nodes: vec![
                RawNode { id: 7, lon: 10.74, lat: 59.91 },
                RawNode { id: 8, lon: 10.75, lat: 59.92 },
            ],
            edges: vec![RawEdge {
                u: 7,
                v: 8,
                key: 0,
                highway: None,
                surface: None,
                geometry: vec![LonLat { lon: 10.74, lat: 59.91 }, LonLat { lon: 10.75, lat: 59.92 }],
            }],
        };
        let source = project_network(&network, &TangentPlaneProjector, None).unwrap();
        let origin = &source.crs;
        match origin {
            Crs::LocalTangentPlane { origin_lon, origin_lat } => {
                assert!((origin_lon - 10.745).abs() < 1e-9);
                assert!((origin_lat - 59.915).abs() < 1e-9);
            },
            other => panic!("unexpected crs {:?}", other),
        }

        let back = TangentPlaneProjector
            .project(&source.edges[0].geometry.0, origin, &Crs::Geographic)
            .unwrap();
        assert!((back[0].x - 10.74).abs() < 1e-9 && (back[0].y - 59.91).abs() < 1e-9);
        assert!((back[1].x - 10.75).abs() < 1e-9 && (back[1].y - 59.92).abs() < 1e-9);
    }

    #[test]
    fn empty_network_is_rejected() {
        assert!(project_network(&RawNetwork::default(), &TangentPlaneProjector, None).is_err());
    }
}
