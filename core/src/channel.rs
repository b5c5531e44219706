use serde::{Deserialize, Serialize};

/// Geographic station coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub elev_km: f64,
}

/// Local-plane offset from the array reference point, in kilometers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaneOffset {
    pub east_km: f64,
    pub north_km: f64,
}

/// Sensor-axis orientation for a three-component channel: azimuth clockwise
/// from north, incidence down from vertical, both in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub azimuth_deg: f64,
    pub incidence_deg: f64,
}

/// One contiguous run of samples from a single channel. Read-only to the
/// core; segments sharing `(station, channel)` form one logical channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformSegment {
    pub station: String,
    pub channel: String,
    pub samples: Vec<f64>,
    /// Sample interval in seconds.
    pub dt: f64,
    /// Time of the first sample, seconds of epoch.
    pub tbeg: f64,
    pub location: Option<GeoLocation>,
    pub offset: Option<PlaneOffset>,
    pub orientation: Option<Orientation>,
}

impl WaveformSegment {
    pub fn new(station: &str, channel: &str, samples: Vec<f64>, dt: f64, tbeg: f64) -> Self {
        Self {
            station: station.to_string(),
            channel: channel.to_string(),
            samples,
            dt,
            tbeg,
            location: None,
            offset: None,
            orientation: None,
        }
    }

    pub fn with_location(mut self, location: GeoLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_offset(mut self, offset: PlaneOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn nsamp(&self) -> usize {
        self.samples.len()
    }

    /// End time, one sample interval past the last sample (half-open).
    pub fn tend(&self) -> f64 {
        self.tbeg + self.samples.len() as f64 * self.dt
    }

    /// `STATION.CHANNEL` identifier used in error reports and grouping.
    pub fn id(&self) -> String {
        format!("{}.{}", self.station, self.channel)
    }
}
