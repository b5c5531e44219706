use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use fkcore::prelude::{FkDriver, ProgressUpdate, WaveformSegment};
use log::debug;
use serde::{Deserialize, Serialize};

/// One window's headline numbers, taken from the first band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakSummary {
    pub tbeg: f64,
    pub azimuth_deg: f64,
    pub slowness: f64,
    pub apparent_velocity: f64,
    pub power: f64,
    pub fstat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub windows: usize,
    pub peaks: Vec<PeakSummary>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, channels: &[WaveformSegment]) -> anyhow::Result<AnalysisSummary> {
        let mut driver = FkDriver::new(
            self.config.to_fk_params(),
            self.config.window_length,
            self.config.overlap,
        )
        .context("configuring FK driver")?;

        let mut monitor = |update: &ProgressUpdate| {
            debug!(
                "fk progress {}/{} windows",
                update.windows_done, update.windows_planned
            );
            true
        };
        let windows = driver
            .run(channels, None, &mut monitor)
            .context("running sliding FK analysis")?;

        let peaks = driver
            .results()
            .iter()
            .filter_map(|result| {
                result.bands.first().map(|band| PeakSummary {
                    tbeg: result.tbeg,
                    azimuth_deg: band.peak.azimuth_deg(),
                    slowness: band.peak.slowness(),
                    apparent_velocity: band.peak.apparent_velocity(),
                    power: band.peak.value,
                    fstat: band.fstat,
                })
            })
            .collect();

        Ok(AnalysisSummary { windows, peaks })
    }
}
