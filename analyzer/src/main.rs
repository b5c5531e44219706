use anyhow::Context;
use clap::Parser;
use generator::profile::{build_channel_set_from_config, GeneratorConfig};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Rust-facing FK analysis workflow driver")]
struct Args {
    /// Run a single offline sweep over synthetic array data and emit a summary
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 0.4)]
    slowness_max: f64,
    #[arg(long, default_value_t = 81)]
    num_slowness: usize,
    #[arg(long, default_value_t = 0.5)]
    fmin: f64,
    #[arg(long, default_value_t = 6.0)]
    fmax: f64,
    #[arg(long, default_value_t = 10.0)]
    window_length: f64,
    #[arg(long, default_value_t = 5.0)]
    overlap: f64,
    /// Synthetic-data slowness injected along east, s/km
    #[arg(long, default_value_t = 0.2)]
    slowness_east: f64,
    /// Append the JSON window summaries to this report file
    #[arg(long, default_value = "tools/data/fk_offline.log")]
    report: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(
            args.slowness_max,
            args.num_slowness,
            args.fmin,
            args.fmax,
            args.window_length,
            args.overlap,
        )
    };

    let runner = Runner::new(workflow_config);
    let generator_config = GeneratorConfig {
        slowness_east: args.slowness_east,
        ..Default::default()
    };
    let channels = build_channel_set_from_config(&generator_config)
        .context("building synthetic channel set")?;

    if args.offline {
        let summary = runner.execute(&channels)?;

        match summary.peaks.first() {
            Some(peak) => println!(
                "Offline run -> {} windows, first peak az {:.1} deg, slowness {:.3} s/km, fstat {:.1}",
                summary.windows, peak.azimuth_deg, peak.slowness, peak.fstat
            ),
            None => println!("Offline run -> no windows computed"),
        }

        let report = serde_json::to_string(&summary).context("encoding summary")?;
        if let Some(parent) = args.report.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.report)?;
        writeln!(file, "{}", report)?;
    }

    Ok(())
}
