mod data;
mod errors;
mod etl;
mod geometry;
mod reindex;

use std::env;
use std::fs::{create_dir_all, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::etl::densify_graph::DensifyGraphEtl;
use crate::etl::parse_osm::ParseOsmEtl;
use crate::etl::Etl;
use crate::errors::Result;

const DEFAULT_CONFIG_PATH: &str = "config/oslo_walk.json";

fn default_max_distance() -> f64 {
    25.0
}

#[derive(Deserialize, Debug)]
pub struct UserConfig {
    pub data_path: String,
    pub dest_path: String,
    /// Longest allowed sub-edge, in planar meters.
    #[serde(default = "default_max_distance")]
    pub max_distance: f64,
    /// Reuse the parsed network from a previous run instead of re-reading the extract.
    #[serde(default)]
    pub skip_download: bool,
    /// Plane to densify in, e.g. `LTP:10.75,59.91`. Defaults to a tangent
    /// plane centred on the network.
    #[serde(default)]
    pub planar_crs: Option<String>,
}

fn load_user_config(path: &str) -> Result<UserConfig> {
    let file = File::open(path)
        .map_err(|err| format!("Could not open config file {}: {}", path, err))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn create_output_dir(config: &UserConfig) -> Result<PathBuf> {
    let output_dir = Path::new(&config.dest_path).to_path_buf();
    create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let user_config = load_user_config(&config_path)?;
    info!(
        config = config_path.as_str(),
        max_distance = user_config.max_distance,
        skip_download = user_config.skip_download;
        "Loaded config"
    );
    let output_dir = create_output_dir(&user_config)?;

    let mut parse_osm = ParseOsmEtl::new(&user_config);
    if !user_config.skip_download {
        parse_osm.clean(&output_dir)?;
    }
    parse_osm.process(&output_dir)?;

    // Tables depend on max_distance, so they are always rebuilt.
    let mut densify_graph = DensifyGraphEtl::new(&user_config);
    densify_graph.clean(&output_dir)?;
    densify_graph.process(&output_dir)?;

    Ok(())
}
