//! Orchestration of one pipeline run
//!
//! fill -> downsample -> upsample -> luminance -> tone map -> convert.
//! Every stage is its own batch, submitted and waited on before the next
//! one is recorded. The HDR image and its per-level state belong to the
//! sequencer for the whole run.

use std::time::Instant;

use crate::config::PipelineConfig;
use crate::encode::OutputImage;
use crate::error::Result;
use crate::gpu::arena::BindingArena;
use crate::gpu::batch::BatchReport;
use crate::gpu::context::{GpuContext, HDR_FORMAT};
use crate::gpu::image::{ImageDesc, MipImage, allocate_image};
use crate::gpu::ResourceStateTracker;
use crate::stages::convert::{Destage, LDR_FORMAT};
use crate::stages::luminance::PartialSums;
use crate::stages::{
    FormatConverter, LuminanceReducer, PyramidDownsampler, PyramidUpsampler, FillPipeline,
    ToneMapper,
};

/// What happened during a run
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub batches: Vec<BatchReport>,
    /// Average luminance measured by the reduction
    pub measured_luminance: f32,
    /// Average luminance handed to the tone mapper
    pub applied_luminance: f32,
}

impl RunReport {
    pub fn total_dispatches(&self) -> u32 {
        self.batches.iter().map(|batch| batch.dispatches).sum()
    }

    pub fn batch(&self, label: &str) -> Option<&BatchReport> {
        self.batches.iter().find(|batch| batch.label == label)
    }
}

/// Result of a completed run
pub struct RunOutput {
    pub image: OutputImage,
    pub report: RunReport,
}

/// Every kernel of the pipeline, built once per sequencer
struct Kernels {
    fill: FillPipeline,
    downsample: PyramidDownsampler,
    upsample: PyramidUpsampler,
    luminance: LuminanceReducer,
    tonemap: ToneMapper,
    convert: FormatConverter,
}

pub struct PipelineSequencer<'a> {
    ctx: &'a GpuContext,
    config: PipelineConfig,
    tracker: ResourceStateTracker,
    kernels: Kernels,
}

impl<'a> PipelineSequencer<'a> {
    /// Validate the config and build every kernel up front
    pub fn new(ctx: &'a GpuContext, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let kernels = Kernels {
            fill: FillPipeline::new(ctx)?,
            downsample: PyramidDownsampler::new(ctx)?,
            upsample: PyramidUpsampler::new(ctx)?,
            luminance: LuminanceReducer::new(ctx)?,
            tonemap: ToneMapper::new(ctx)?,
            convert: FormatConverter::new(ctx)?,
        };
        Ok(Self {
            ctx,
            config,
            tracker: ResourceStateTracker::new(),
            kernels,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage to completion and return the 8-bit result
    pub fn run(&mut self) -> Result<RunOutput> {
        let start = Instant::now();
        let mut report = RunReport::default();

        let hdr = allocate_image(
            self.ctx,
            &mut self.tracker,
            &ImageDesc {
                label: "HDR Image",
                extent: self.config.extent,
                format: HDR_FORMAT,
                mip_levels: self.config.mip_levels,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING,
            },
        )?;

        let result = self.run_stages(&hdr, &mut report);
        hdr.destroy(&mut self.tracker);
        let image = result?;

        log::info!(
            "Pipeline finished in {:.1} ms ({} dispatches, average luminance {:.4})",
            start.elapsed().as_secs_f64() * 1000.0,
            report.total_dispatches(),
            report.applied_luminance
        );
        Ok(RunOutput { image, report })
    }

    fn run_stages(&mut self, hdr: &MipImage, report: &mut RunReport) -> Result<OutputImage> {
        self.fill(hdr, report)?;
        self.bloom(hdr, report)?;

        let measured = self.measure_luminance(hdr, report)?;
        report.measured_luminance = measured;
        report.applied_luminance = self.config.fixed_luminance.unwrap_or(measured);
        log::info!(
            "Average luminance: measured {:.4}, applied {:.4}",
            measured,
            report.applied_luminance
        );

        self.tone_map(hdr, report.applied_luminance, report)?;
        self.destage(hdr, report)
    }

    fn fill(&mut self, hdr: &MipImage, report: &mut RunReport) -> Result<()> {
        let ctx = self.ctx;
        let mut arena = BindingArena::new("Fill");
        let mut batch = ctx.begin_batch("fill");
        self.kernels.fill.record(
            ctx,
            &mut batch,
            &mut self.tracker,
            &mut arena,
            hdr,
            self.config.fill,
        );
        report.batches.push(ctx.submit_and_wait(batch)?);
        arena.release();
        Ok(())
    }

    fn bloom(&mut self, hdr: &MipImage, report: &mut RunReport) -> Result<()> {
        let ctx = self.ctx;
        let mut arena = BindingArena::new("Bloom");
        let mut batch = ctx.begin_batch("bloom");
        self.kernels
            .downsample
            .record(ctx, &mut batch, &mut self.tracker, &mut arena, hdr);
        self.kernels.upsample.record(
            ctx,
            &mut batch,
            &mut self.tracker,
            &mut arena,
            hdr,
            self.config.bloom_strength,
        );
        report.batches.push(ctx.submit_and_wait(batch)?);
        arena.release();
        Ok(())
    }

    fn measure_luminance(&mut self, hdr: &MipImage, report: &mut RunReport) -> Result<f32> {
        let ctx = self.ctx;
        let sums = PartialSums::allocate(ctx, hdr.extent)?;
        let mut arena = BindingArena::new("Luminance");
        let mut batch = ctx.begin_batch("luminance");
        self.kernels
            .luminance
            .record(ctx, &mut batch, &mut self.tracker, &mut arena, hdr, &sums);
        report.batches.push(ctx.submit_and_wait(batch)?);
        arena.release();
        sums.average(ctx)
    }

    fn tone_map(&mut self, hdr: &MipImage, average_luminance: f32, report: &mut RunReport) -> Result<()> {
        let ctx = self.ctx;
        let mut arena = BindingArena::new("Tone Map");
        let mut batch = ctx.begin_batch("tonemap");
        self.kernels.tonemap.record(
            ctx,
            &mut batch,
            &mut self.tracker,
            &mut arena,
            hdr,
            average_luminance,
            self.config.key_value,
        );
        report.batches.push(ctx.submit_and_wait(batch)?);
        arena.release();
        Ok(())
    }

    fn destage(&mut self, hdr: &MipImage, report: &mut RunReport) -> Result<OutputImage> {
        let ctx = self.ctx;
        let ldr = allocate_image(
            ctx,
            &mut self.tracker,
            &ImageDesc {
                label: "LDR Image",
                extent: hdr.extent,
                format: LDR_FORMAT,
                mip_levels: 1,
                usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            },
        )?;

        let result = Destage::allocate(ctx, hdr.extent).and_then(|destage| {
            let mut arena = BindingArena::new("Convert");
            let mut batch = ctx.begin_batch("convert");
            self.kernels.convert.record(
                ctx,
                &mut batch,
                &mut self.tracker,
                &mut arena,
                hdr,
                &ldr,
                &destage,
            );
            report.batches.push(ctx.submit_and_wait(batch)?);
            arena.release();
            destage.read(ctx)
        });

        ldr.destroy(&mut self.tracker);
        result
    }
}
