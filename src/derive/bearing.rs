//! Vehicle bearing interpolation from an assigned shape.
//!
//! When a live vehicle reports no bearing, one is derived from the shape its
//! trip follows: find the shape point nearest the vehicle (planar scan — per-
//! shape point counts are small), then take the geodesic azimuth of the path
//! segment through that point in travel order. Falls back to 0 for shapes
//! too degenerate to orient.

use geo::{Bearing, Geodesic, Point};

/// Downtown reference used to break exact nearest-point distance ties in a
/// direction-consistent way (farther from downtown = outbound side).
const REFERENCE_LAT: f64 = 42.3601;
const REFERENCE_LON: f64 = -71.0589;

fn planar_dist_sq(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dlat = a.0 - b.0;
    let dlon = a.1 - b.1;
    dlat * dlat + dlon * dlon
}

/// Interpolate a bearing in degrees [0, 360) for a vehicle at (lat, lon) on
/// an ordered shape of (lat, lon) points. Travel order follows the point
/// sequence; a vehicle nearest the final point takes the heading of the
/// segment arriving at it.
pub fn interpolate_bearing(shape: &[(f64, f64)], lat: f64, lon: f64) -> f64 {
    if shape.len() < 2 {
        return 0.0;
    }

    let here = (lat, lon);
    let reference = (REFERENCE_LAT, REFERENCE_LON);
    let mut nearest = 0usize;
    let mut best = planar_dist_sq(shape[0], here);
    for (i, pt) in shape.iter().enumerate().skip(1) {
        let d = planar_dist_sq(*pt, here);
        if d < best
            || (d == best
                && planar_dist_sq(*pt, reference) > planar_dist_sq(shape[nearest], reference))
        {
            best = d;
            nearest = i;
        }
    }

    let (from, to) = if nearest + 1 < shape.len() {
        (shape[nearest], shape[nearest + 1])
    } else {
        (shape[nearest - 1], shape[nearest])
    };
    if from == to {
        return 0.0;
    }

    // geo points are (x, y) = (lon, lat).
    let azimuth = Geodesic.bearing(Point::new(from.1, from.0), Point::new(to.1, to.0));
    if azimuth.is_finite() {
        azimuth.rem_euclid(360.0)
    } else {
        0.0
    }
}
