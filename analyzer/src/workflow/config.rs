use anyhow::Context;
use fkcore::prelude::{FkParams, FrequencyBand, Taper};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub slowness_max: f64,
    pub num_slowness: usize,
    pub fmin: f64,
    pub fmax: f64,
    pub window_length: f64,
    pub overlap: f64,
    pub taper: Taper,
    pub output_power: bool,
    pub fine_grid: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            slowness_max: 0.4,
            num_slowness: 81,
            fmin: 0.5,
            fmax: 6.0,
            window_length: 10.0,
            overlap: 5.0,
            taper: Taper::Hann,
            output_power: true,
            fine_grid: false,
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_args(
        slowness_max: f64,
        num_slowness: usize,
        fmin: f64,
        fmax: f64,
        window_length: f64,
        overlap: f64,
    ) -> Self {
        Self {
            slowness_max,
            num_slowness,
            fmin,
            fmax,
            window_length,
            overlap,
            ..Default::default()
        }
    }

    pub fn to_fk_params(&self) -> FkParams {
        FkParams {
            slowness_max: self.slowness_max,
            num_slowness: self.num_slowness,
            bands: vec![FrequencyBand::new(self.fmin, self.fmax)],
            taper: self.taper,
            output_power: self.output_power,
            fine_grid: self.fine_grid,
            ..Default::default()
        }
    }
}
