//! Projection of station coordinates into a local plane around the array
//! reference point.

use crate::channel::{PlaneOffset, WaveformSegment};
use crate::prelude::{FkError, FkResult};

/// Mean Earth radius, km.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Per-channel local-plane offsets resolved once per call.
///
/// The reference point is (a) the station carrying the offsets when every
/// channel supplies one, else (b) the station nearest the centroid of the
/// unique station locations.
#[derive(Debug, Clone)]
pub struct ArrayGeometry {
    reference: String,
    offsets: Vec<PlaneOffset>,
}

impl ArrayGeometry {
    /// Resolve offsets for one representative segment per logical channel,
    /// in channel order.
    pub fn resolve(channels: &[&WaveformSegment]) -> FkResult<Self> {
        if channels.is_empty() {
            return Err(FkError::InvalidConfig("no channels supplied".to_string()));
        }

        if channels.iter().all(|c| c.offset.is_some()) {
            return Ok(Self::from_supplied_offsets(channels));
        }

        let stations = unique_stations(channels)?;
        if stations.len() < 2 {
            let seg = channels[0];
            return Err(FkError::Geometry {
                channel: seg.id(),
                reason: "fewer than 2 unique station locations".to_string(),
            });
        }

        let (lat0, lon0) = sphere_centroid(&stations);
        let reference = nearest_station(&stations, lat0, lon0);
        let (ref_lat, ref_lon) = stations
            .iter()
            .find(|s| s.0 == reference)
            .map(|s| (s.1, s.2))
            .unwrap_or((lat0, lon0));

        let mut offsets = Vec::with_capacity(channels.len());
        for seg in channels {
            let loc = seg.location.as_ref().ok_or_else(|| FkError::Geometry {
                channel: seg.id(),
                reason: "missing station location".to_string(),
            })?;
            offsets.push(project(loc.lat_deg, loc.lon_deg, ref_lat, ref_lon));
        }

        Ok(Self { reference, offsets })
    }

    pub fn from_channels(channels: &[WaveformSegment]) -> FkResult<Self> {
        let refs: Vec<&WaveformSegment> = channels.iter().collect();
        Self::resolve(&refs)
    }

    fn from_supplied_offsets(channels: &[&WaveformSegment]) -> Self {
        let offsets: Vec<PlaneOffset> = channels.iter().map(|c| c.offset.unwrap()).collect();
        // The carrier of the offsets is the station sitting at their origin.
        let reference = channels
            .iter()
            .zip(&offsets)
            .min_by(|(_, a), (_, b)| {
                let ra = a.east_km * a.east_km + a.north_km * a.north_km;
                let rb = b.east_km * b.east_km + b.north_km * b.north_km;
                ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(c, _)| c.station.clone())
            .unwrap_or_default();
        Self { reference, offsets }
    }

    pub fn reference_station(&self) -> &str {
        &self.reference
    }

    /// Offsets in the channel order the geometry was resolved with.
    pub fn offsets(&self) -> &[PlaneOffset] {
        &self.offsets
    }

    /// Largest inter-station distance, km.
    pub fn aperture_km(&self) -> f64 {
        let mut max = 0.0f64;
        for a in &self.offsets {
            for b in &self.offsets {
                let de = a.east_km - b.east_km;
                let dn = a.north_km - b.north_km;
                max = max.max((de * de + dn * dn).sqrt());
            }
        }
        max
    }
}

fn unique_stations(channels: &[&WaveformSegment]) -> FkResult<Vec<(String, f64, f64)>> {
    let mut stations: Vec<(String, f64, f64)> = Vec::new();
    for seg in channels {
        let loc = seg.location.as_ref().ok_or_else(|| FkError::Geometry {
            channel: seg.id(),
            reason: "missing station location".to_string(),
        })?;
        if !stations.iter().any(|s| s.0 == seg.station) {
            stations.push((seg.station.clone(), loc.lat_deg, loc.lon_deg));
        }
    }
    Ok(stations)
}

/// Centroid of the unique locations on the unit sphere, back-projected to
/// latitude/longitude.
fn sphere_centroid(stations: &[(String, f64, f64)]) -> (f64, f64) {
    let mut x = 0.0;
    let mut y = 0.0;
    let mut z = 0.0;
    for (_, lat, lon) in stations {
        let (lat, lon) = (lat.to_radians(), lon.to_radians());
        x += lat.cos() * lon.cos();
        y += lat.cos() * lon.sin();
        z += lat.sin();
    }
    let norm = (x * x + y * y + z * z).sqrt();
    if norm == 0.0 {
        return (0.0, 0.0);
    }
    let lat = (z / norm).asin();
    let lon = y.atan2(x);
    (lat.to_degrees(), lon.to_degrees())
}

fn nearest_station(stations: &[(String, f64, f64)], lat0: f64, lon0: f64) -> String {
    let mut best = stations[0].0.clone();
    let mut best_d = f64::MAX;
    for (name, lat, lon) in stations {
        let off = project(*lat, *lon, lat0, lon0);
        let d = off.east_km * off.east_km + off.north_km * off.north_km;
        if d < best_d {
            best_d = d;
            best = name.clone();
        }
    }
    best
}

/// Equirectangular projection around the reference, valid for the short
/// inter-station distances of an array.
fn project(lat: f64, lon: f64, ref_lat: f64, ref_lon: f64) -> PlaneOffset {
    let east_km =
        EARTH_RADIUS_KM * (lon - ref_lon).to_radians() * ref_lat.to_radians().cos();
    let north_km = EARTH_RADIUS_KM * (lat - ref_lat).to_radians();
    PlaneOffset { east_km, north_km }
}
