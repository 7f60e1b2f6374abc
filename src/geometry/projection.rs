use std::str::FromStr;

use geo_types::Coord;
use thiserror::Error;

use super::distance::EARTH_RADIUS_M;

/// Coordinate reference systems the pipeline knows how to name.
#[derive(Debug, Clone, PartialEq)]
pub enum Crs {
    /// EPSG:4326, with x = longitude and y = latitude in degrees.
    Geographic,
    /// Metres east (x) and north (y) of an origin, equirectangular.
    LocalTangentPlane { origin_lon: f64, origin_lat: f64 },
    /// Anything else, kept by name so errors can report it.
    Named(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("unsupported projection from {from:?} to {to:?}")]
    Unsupported { from: Crs, to: Crs },

    #[error("tangent plane origin at latitude {0} is degenerate")]
    DegenerateOrigin(f64),

    #[error("projected {actual} points, expected {expected}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("could not read CRS name {0:?}")]
    InvalidName(String),
}

/// Reads `EPSG:4326` (or `WGS84`) as geographic and `LTP:<lon>,<lat>` as a
/// tangent plane at that origin. Other names are kept as [`Crs::Named`].
impl FromStr for Crs {
    type Err = ProjectionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("EPSG:4326") || name.eq_ignore_ascii_case("WGS84") {
            return Ok(Crs::Geographic);
        }
        let Some(origin) = name.strip_prefix("LTP:") else {
            return Ok(Crs::Named(name.to_string()));
        };
        let invalid = || ProjectionError::InvalidName(name.to_string());
        let (lon, lat) = origin.split_once(',').ok_or_else(invalid)?;
        let origin_lon: f64 = lon.trim().parse().map_err(|_| invalid())?;
        let origin_lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        Ok(Crs::LocalTangentPlane { origin_lon, origin_lat })
    }
}

pub trait Projector {
    /// Maps `points` from one CRS to another. The result has the same length
    /// and order as the input.
    fn project(&self, points: &[Coord<f64>], from: &Crs, to: &Crs) -> Result<Vec<Coord<f64>>, ProjectionError>;
}

/// Equirectangular local tangent plane. Accurate enough for city-sized
/// extracts, where the error against a transverse mercator stays well under
/// the densification spacing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TangentPlaneProjector;

impl TangentPlaneProjector {
    fn plane(origin_lon: f64, origin_lat: f64) -> Result<(f64, f64, f64), ProjectionError> {
        let cos_lat0 = origin_lat.to_radians().cos();
        if !cos_lat0.is_finite() || cos_lat0.abs() < 1e-12 {
            return Err(ProjectionError::DegenerateOrigin(origin_lat));
        }
        Ok((origin_lon.to_radians(), origin_lat.to_radians(), cos_lat0))
    }

    fn to_plane(c: &Coord<f64>, (lon0, lat0, cos_lat0): (f64, f64, f64)) -> Coord<f64> {
        Coord {
            x: EARTH_RADIUS_M * cos_lat0 * (c.x.to_radians() - lon0),
            y: EARTH_RADIUS_M * (c.y.to_radians() - lat0),
        }
    }

    fn from_plane(c: &Coord<f64>, (lon0, lat0, cos_lat0): (f64, f64, f64)) -> Coord<f64> {
        Coord {
            x: (lon0 + c.x / (EARTH_RADIUS_M * cos_lat0)).to_degrees(),
            y: (lat0 + c.y / EARTH_RADIUS_M).to_degrees(),
        }
    }
}

impl Projector for TangentPlaneProjector {
    fn project(&self, points: &[Coord<f64>], from: &Crs, to: &Crs) -> Result<Vec<Coord<f64>>, ProjectionError> {
        match (from, to) {
            (Crs::Named(_), _) | (_, Crs::Named(_)) => Err(ProjectionError::Unsupported {
                from: from.clone(),
                to: to.clone(),
            }),
            _ if from == to => Ok(points.to_vec()),
            (Crs::Geographic, Crs::LocalTangentPlane { origin_lon, origin_lat }) => {
                let plane = Self::plane(*origin_lon, *origin_lat)?;
                Ok(points.iter().map(|c| Self::to_plane(c, plane)).collect())
            }
            (Crs::LocalTangentPlane { origin_lon, origin_lat }, Crs::Geographic) => {
                let plane = Self::plane(*origin_lon, *origin_lat)?;
                Ok(points.iter().map(|c| Self::from_plane(c, plane)).collect())
            }
            (
                Crs::LocalTangentPlane { origin_lon: lon_a, origin_lat: lat_a },
                Crs::LocalTangentPlane { origin_lon: lon_b, origin_lat: lat_b },
            ) => {
                let plane_a = Self::plane(*lon_a, *lat_a)?;
                let plane_b = Self::plane(*lon_b, *lat_b)?;
                Ok(points
                    .iter()
                    .map(|c| Self::to_plane(&Self::from_plane(c, plane_a), plane_b))
                    .collect())
            }
            _ => Err(ProjectionError::Unsupported {
                from: from.clone(),
                to: to.clone(),
            }),
        }
    }
}

/// Centre of a set of geographic coordinates, used as a tangent plane origin.
pub fn centroid(points: impl IntoIterator<Item = Coord<f64>>) -> Option<Coord<f64>> {
    let (count, sum) = points
        .into_iter()
        .fold((0usize, Coord { x: 0.0, y: 0.0 }), |(count, sum), c| (count + 1, sum + c));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OSLO: Crs = Crs::LocalTangentPlane { origin_lon: 10.75, origin_lat: 59.91 };

    #[test]
    fn round_trip_through_plane() {
        let points = vec![Coord { x: 10.7522, y: 59.9139 }, Coord { x: 10.70, y: 59.95 }];
        let planar = TangentPlaneProjector.project(&points, &Crs::Geographic, &OSLO).unwrap();
        let back = TangentPlaneProjector.project(&planar, &OSLO, &Crs::Geographic).unwrap();
        assert_eq!(back.len(), points.len());
        for (a, b) in points.iter().zip(&back) {
            assert!((a.x - b.x).abs() < 1e-9);
            assert!((a.y - b.y).abs() < 1e-9);
        }
    }

    #[test]
    fn origin_maps_to_zero() {
        let origin = [Coord { x: 10.75, y: 59.91 }];
        let planar = TangentPlaneProjector.project(&origin, &Crs::Geographic, &OSLO).unwrap();
        assert!(planar[0].x.abs() < 1e-6 && planar[0].y.abs() < 1e-6);
    }

    #[test]
    fn named_crs_is_unsupported() {
        let utm = Crs::Named("EPSG:32632".to_string());
        let result = TangentPlaneProjector.project(&[], &utm, &Crs::Geographic);
        assert!(matches!(result, Err(ProjectionError::Unsupported { .. })));
    }

    #[test]
    fn polar_origin_is_rejected() {
        let pole = Crs::LocalTangentPlane { origin_lon: 0.0, origin_lat: 90.0 };
        let result = TangentPlaneProjector.project(&[Coord { x: 0.0, y: 89.0 }], &Crs::Geographic, &pole);
        assert!(matches!(result, Err(ProjectionError::DegenerateOrigin(_))));
    }

    #[test]
    fn parses_crs_names() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Geographic);
        assert_eq!(
            "LTP: 10.75, 59.91".parse::<Crs>().unwrap(),
            Crs::LocalTangentPlane { origin_lon: 10.75, origin_lat: 59.91 }
        );
        assert_eq!("EPSG:32632".parse::<Crs>().unwrap(), Crs::Named("EPSG:32632".to_string()));
        assert!(matches!("LTP:10.75".parse::<Crs>(), Err(ProjectionError::InvalidName(_))));
        assert!(matches!("LTP:east,59".parse::<Crs>(), Err(ProjectionError::InvalidName(_))));
    }

    #[test]
    fn centroid_of_empty_is_none() {
        assert_eq!(centroid(Vec::new()), None);
        let c = centroid(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 2.0, y: 4.0 }]).unwrap();
        assert_eq!(c, Coord { x: 1.0, y: 2.0 });
    }
}
