pub mod front_end;
pub mod taper;

pub use front_end::{next_pow2, BandBins, SpectralFrontEnd, WindowSpectrum};
