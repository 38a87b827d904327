mod config;
mod encode;
mod error;
mod gpu;
mod reference;
mod sequencer;
mod stages;


use std::process::ExitCode;

use clap::Parser;

pub use config::{Cli, PipelineConfig};
pub use encode::{FileEncoder, ImageEncoder, OutputImage};
pub use error::{PipelineError, Result};
pub use gpu::GpuContext;
pub use reference::run_reference;
pub use sequencer::{PipelineSequencer, RunOutput, RunReport};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.to_config()?;
    log::info!(
        "{}x{} image, {} mip levels, {:?}",
        config.extent.width,
        config.extent.height,
        config.mip_levels,
        config.fill
    );

    let image = if cli.reference {
        run_on_host(&config)?
    } else {
        run_on_device(&config)?
    };

    FileEncoder.encode(&image, &config.output)
}

fn run_on_host(config: &PipelineConfig) -> Result<OutputImage> {
    log::info!("Running host reference pipeline");
    Ok(run_reference(config)?.image)
}

fn run_on_device(config: &PipelineConfig) -> Result<OutputImage> {
    let ctx = GpuContext::headless()?;
    let mut sequencer = PipelineSequencer::new(&ctx, config.clone())?;
    let output = sequencer.run()?;
    for batch in &output.report.batches {
        log::debug!(
            "Batch '{}': {} dispatches, {} barriers",
            batch.label,
            batch.dispatches,
            batch.barriers.len()
        );
    }
    Ok(output.image)
}
