use geo::{Euclidean, InterpolatableLine, Length};
use geo_types::{Coord, LineString};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DensifyError {
    #[error("max distance must be finite and positive, got {0}")]
    InvalidMaxDistance(f64),

    #[error("curve has {0} points, need at least 2")]
    TooFewPoints(usize),

    #[error("curve contains a non-finite coordinate")]
    NonFinite,

    #[error("curve has zero length")]
    ZeroLength,
}

/// Samples `curve` every `max_distance` units (in the curve's own CRS) and
/// always closes with the exact end point. Curves no longer than
/// `max_distance` come back as just their two endpoints.
pub fn densify(curve: &LineString<f64>, max_distance: f64) -> Result<Vec<Coord<f64>>, DensifyError> {
    if !max_distance.is_finite() || max_distance <= 0.0 {
        return Err(DensifyError::InvalidMaxDistance(max_distance));
    }
    let (start, end) = match (curve.0.first(), curve.0.last()) {
        (Some(start), Some(end)) if curve.0.len() >= 2 => (*start, *end),
        _ => return Err(DensifyError::TooFewPoints(curve.0.len())),
    };
    if curve.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(DensifyError::NonFinite);
    }

    let length = Euclidean.length(curve);
    if length <= 0.0 {
        return Err(DensifyError::ZeroLength);
    }
    if length <= max_distance {
        return Ok(vec![start, end]);
    }

    // Same count as stepping 0, d, 2d, ... while strictly below the length.
    let steps = (length / max_distance).ceil() as usize;
    let mut points = Vec::with_capacity(steps + 1);
    points.push(start);
    for step in 1..steps {
        let fraction = (step as f64 * max_distance / length).min(1.0);
        if let Some(point) = curve.point_at_ratio_from_start(&Euclidean, fraction) {
            points.push(point.0);
        }
    }
    points.push(end);
    Ok(points)
}
