//! Frequency-wavenumber beamforming core for the Rust seismic-array platform.
//!
//! The modules mirror the classic array-processing pipeline while providing
//! safe abstractions, driver-owned scratch, and a single validation gate:
//! geometry and parameters resolve once per call, each sliding window runs
//! spectral preparation, phase-sum beam power, and peak refinement, and the
//! results accumulate into a time-ordered FK-gram.

pub mod beam;
pub mod channel;
pub mod coverage;
pub mod driver;
pub mod geometry;
pub mod io;
pub mod params;
pub mod polarization;
pub mod prelude;
pub mod result;
pub mod spectral;
pub mod telemetry;

pub use prelude::{FkError, FkResult};
