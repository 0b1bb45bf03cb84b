//! Geographic primitives shared by the map index, the matcher and the track
//! processor: points, bounding boxes and great-circle distances.

use geo_types::Point;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for similarity distances (kilometers)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Mean Earth radius used for trail lengths (miles)
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

// geo-types points are (x, y) = (lon, lat)
impl From<Point<f64>> for GeoPoint {
    fn from(point: Point<f64>) -> Self {
        Self {
            lat: point.y(),
            lon: point.x(),
        }
    }
}

/// Axis-aligned latitude/longitude rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Smallest box containing every point, or `None` for an empty slice
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a GeoPoint>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::new(first.lat, first.lon, first.lat, first.lon);
        for point in iter {
            bbox.include(point);
        }
        Some(bbox)
    }

    /// Grow the box so that it contains `point`
    pub fn include(&mut self, point: &GeoPoint) {
        self.min_lat = self.min_lat.min(point.lat);
        self.min_lon = self.min_lon.min(point.lon);
        self.max_lat = self.max_lat.max(point.lat);
        self.max_lon = self.max_lon.max(point.lon);
    }

    /// Pad every side by `buffer` degrees
    pub fn expand(&self, buffer: f64) -> Self {
        Self {
            min_lat: self.min_lat - buffer,
            min_lon: self.min_lon - buffer,
            max_lat: self.max_lat + buffer,
            max_lon: self.max_lon + buffer,
        }
    }

    /// Closed-interval rectangle overlap: touching edges count as overlapping.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }

    pub fn is_valid(&self) -> bool {
        self.min_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lat.is_finite()
            && self.max_lon.is_finite()
            && self.min_lat <= self.max_lat
            && self.min_lon <= self.max_lon
    }
}

/// Central angle between two points (radians), haversine formula
fn central_angle(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Great-circle distance in kilometers
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    EARTH_RADIUS_KM * central_angle(a, b)
}

/// Great-circle distance in miles
pub fn haversine_miles(a: &GeoPoint, b: &GeoPoint) -> f64 {
    EARTH_RADIUS_MILES * central_angle(a, b)
}

/// Length of a polyline in miles, rounded to the nearest tenth
pub fn path_length_miles(points: &[GeoPoint]) -> f64 {
    let total: f64 = points
        .windows(2)
        .map(|w| haversine_miles(&w[0], &w[1]))
        .sum();
    (total * 10.0).round() / 10.0
}
