pub mod engine;
pub mod refine;

pub use engine::{BeamPowerEngine, ScanOutcome, SpectralCube, POWER_EPSILON};
pub use refine::{fine_refine, locate_peak, PeakLocation, FINE_GRID_NODES};
