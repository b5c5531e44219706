//! Shared error type and the re-exports a caller needs to drive the core.

pub use crate::channel::{GeoLocation, Orientation, PlaneOffset, WaveformSegment};
pub use crate::coverage::TimeSpan;
pub use crate::driver::{DriverState, FkDriver, ProgressMonitor, ProgressUpdate};
pub use crate::params::{FkParams, FrequencyBand, SearchRegion, Taper};
pub use crate::result::{BandResult, FkSeries, GridPeak, SingleWindowResult, SlownessGrid};

/// Common error type for beamforming calls.
///
/// `InvalidConfig` and `Geometry` are always caller bugs and fatal to the
/// call that raised them; `NoCoverage` is the expected "no data in the
/// requested span" condition and may be retried once more data arrives.
#[derive(thiserror::Error, Debug)]
pub enum FkError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("channel {channel}: {reason}")]
    Geometry { channel: String, reason: String },
    #[error("no data coverage common to all channels in the requested span")]
    NoCoverage,
    #[error("allocation failure: {0}")]
    Allocation(String),
}

pub type FkResult<T> = Result<T, FkError>;
