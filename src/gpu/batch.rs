//! One-shot command batches: encoder, recorded barriers and dispatches

use super::context::GpuContext;
use super::state::{ImageBarrier, ImageId, ResourceState, ResourceStateTracker};
use super::workgroups::WorkgroupCount;
use std::ops::Range;

/// What a completed batch did, for logging and tests
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub label: &'static str,
    pub barriers: Vec<ImageBarrier>,
    pub dispatches: u32,
}

/// A command encoder plus the barrier log of everything recorded into it
pub struct CommandBatch {
    encoder: wgpu::CommandEncoder,
    report: BatchReport,
}

impl CommandBatch {
    pub(super) fn new(ctx: &GpuContext, label: &'static str) -> Self {
        // Popped in `GpuContext::submit_and_wait`
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self {
            encoder,
            report: BatchReport {
                label,
                ..Default::default()
            },
        }
    }

    /// Transition `mips` of `image` and record the resulting barriers.
    ///
    /// Called immediately before the command that depends on it; transitions
    /// are never batched across dependent dispatches.
    pub fn transition(
        &mut self,
        tracker: &mut ResourceStateTracker,
        image: ImageId,
        mips: Range<u32>,
        to: ResourceState,
    ) {
        let barriers = tracker.transition(image, mips, to);
        self.record_barriers(barriers);
    }

    /// Record barriers already computed by the tracker
    pub fn record_barriers(&mut self, barriers: Vec<ImageBarrier>) {
        for barrier in barriers {
            log::trace!(
                "[{}] barrier {:?} mips {:?}: {:?} -> {:?}",
                self.report.label,
                barrier.image,
                barrier.mips,
                barrier.from,
                barrier.to
            );
            self.report.barriers.push(barrier);
        }
    }

    /// Record one compute dispatch in its own pass
    pub fn dispatch(
        &mut self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        push_constants: &[u8],
        workgroups: WorkgroupCount,
    ) {
        let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        if !push_constants.is_empty() {
            pass.set_push_constants(0, push_constants);
        }
        pass.dispatch_workgroups(workgroups.x, workgroups.y, workgroups.z);
        self.report.dispatches += 1;
    }

    /// Raw encoder access for copies
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        &mut self.encoder
    }

    pub fn label(&self) -> &'static str {
        self.report.label
    }

    pub(super) fn finish(self) -> (wgpu::CommandEncoder, BatchReport) {
        (self.encoder, self.report)
    }
}
