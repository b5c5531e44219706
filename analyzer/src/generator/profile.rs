use anyhow::Context;
use fkcore::prelude::{PlaneOffset, WaveformSegment};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Configuration for generating a synthetic array channel set: an L-shaped
/// array (one arm east, one arm north, so both slowness components are
/// constrained) carrying a noisy plane-wave tone with a known horizontal
/// slowness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub stations: usize,
    pub spacing_km: f64,
    pub sample_rate: f64,
    pub duration: f64,
    pub frequency: f64,
    pub slowness_east: f64,
    pub slowness_north: f64,
    pub noise: f64,
    pub seed: u64,
    pub description: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            stations: 5,
            spacing_km: 1.0,
            sample_rate: 20.0,
            duration: 120.0,
            frequency: 1.25,
            slowness_east: 0.2,
            slowness_north: 0.0,
            noise: 0.05,
            seed: 0,
            description: None,
        }
    }
}

impl GeneratorConfig {
    fn normalized_stations(&self) -> usize {
        self.stations.max(2)
    }

    fn sample_count(&self) -> anyhow::Result<usize> {
        let count = (self.duration * self.sample_rate).round();
        if !(count >= 1.0) {
            anyhow::bail!("duration {} too short at {} Hz", self.duration, self.sample_rate);
        }
        Ok(count as usize)
    }
}

/// Build one channel per station, delayed per its offset so the FK core
/// should recover `(slowness_east, slowness_north)`.
pub fn build_channel_set_from_config(config: &GeneratorConfig) -> anyhow::Result<Vec<WaveformSegment>> {
    let nsta = config.normalized_stations();
    let nsamp = config.sample_count().context("sizing generator output")?;
    let dt = 1.0 / config.sample_rate;

    let east_arm = (nsta + 1) / 2;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut channels = Vec::with_capacity(nsta);
    for i in 0..nsta {
        let (east, north) = if i < east_arm {
            (i as f64 * config.spacing_km, 0.0)
        } else {
            (0.0, (i - east_arm + 1) as f64 * config.spacing_km)
        };
        let delay = config.slowness_east * east + config.slowness_north * north;
        let mut samples = Vec::with_capacity(nsamp);
        for n in 0..nsamp {
            let t = n as f64 * dt;
            let jitter = if config.noise > 0.0 {
                rng.gen_range(-config.noise..config.noise)
            } else {
                0.0
            };
            samples.push((2.0 * PI * config.frequency * (t - delay)).sin() + jitter);
        }
        channels.push(
            WaveformSegment::new(&format!("AR{:02}", i), "sz", samples, dt, 0.0).with_offset(
                PlaneOffset {
                    east_km: east,
                    north_km: north,
                },
            ),
        );
    }
    Ok(channels)
}

pub fn build_channel_set(stations: usize, duration: f64) -> anyhow::Result<Vec<WaveformSegment>> {
    let config = GeneratorConfig {
        stations,
        duration,
        ..Default::default()
    };
    build_channel_set_from_config(&config)
}
