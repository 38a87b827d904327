//! Per-mip-level resource state tracking and barrier computation
//!
//! Every image registered here gets one `ResourceState` row per mip level.
//! Stages never mutate those rows directly: they ask for a transition right
//! before a dispatch or transfer touches a level, and receive the barrier
//! that has to separate the previous use from the next one.
//!
//! wgpu derives the hardware barriers from its own usage tracking, so the
//! barriers produced here are the recorded protocol of the run. The layout
//! assertions are what keep bindings honest.

use std::collections::HashMap;
use std::ops::Range;

/// Pipeline stage a level was last touched by
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    TopOfPipe,
    ComputeShader,
    Transfer,
    Host,
}

bitflags::bitflags! {
    /// Memory access bits
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const TRANSFER_READ = 1 << 2;
        const TRANSFER_WRITE = 1 << 3;
        const HOST_READ = 1 << 4;
    }
}

impl AccessMask {
    pub const NONE: Self = Self::empty();

    pub fn has_writes(self) -> bool {
        self.intersects(Self::SHADER_WRITE.union(Self::TRANSFER_WRITE))
    }
}

/// Image layout of a mip level
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
}

impl ImageLayout {
    /// Layouts a kernel may sample or load from
    pub fn is_sampleable(self) -> bool {
        matches!(self, ImageLayout::General | ImageLayout::ShaderReadOnly)
    }

    /// Layouts a kernel may store into
    pub fn is_shader_writable(self) -> bool {
        self == ImageLayout::General
    }
}

/// Stage, access mask and layout of one mip level
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceState {
    pub stage: PipelineStage,
    pub access: AccessMask,
    pub layout: ImageLayout,
}

impl ResourceState {
    /// Never written; nothing to wait on
    pub const UNDEFINED: Self = Self {
        stage: PipelineStage::TopOfPipe,
        access: AccessMask::NONE,
        layout: ImageLayout::Undefined,
    };

    /// Sampled or loaded by a compute kernel
    pub const SHADER_READ: Self = Self {
        stage: PipelineStage::ComputeShader,
        access: AccessMask::SHADER_READ,
        layout: ImageLayout::ShaderReadOnly,
    };

    /// Written as a storage image by a compute kernel
    pub const SHADER_WRITE: Self = Self {
        stage: PipelineStage::ComputeShader,
        access: AccessMask::SHADER_WRITE,
        layout: ImageLayout::General,
    };

    /// Read-modify-write storage image
    pub const SHADER_READ_WRITE: Self = Self {
        stage: PipelineStage::ComputeShader,
        access: AccessMask::SHADER_READ.union(AccessMask::SHADER_WRITE),
        layout: ImageLayout::General,
    };

    /// Source of a copy into a buffer
    pub const TRANSFER_SRC: Self = Self {
        stage: PipelineStage::Transfer,
        access: AccessMask::TRANSFER_READ,
        layout: ImageLayout::TransferSrc,
    };

    /// Whether moving from `self` to `next` needs any synchronization
    fn needs_barrier(&self, next: &ResourceState) -> bool {
        self.layout != next.layout || self.access.has_writes() || next.access.has_writes()
    }
}

/// Handle keying an image's rows in the tracker
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageId(u32);

/// A layout/visibility transition covering a contiguous mip range
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageId,
    pub mips: Range<u32>,
    pub from: ResourceState,
    pub to: ResourceState,
}

/// Owner of every per-level `ResourceState` in a run
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    images: HashMap<ImageId, Vec<ResourceState>>,
    next_id: u32,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new image; all levels begin `UNDEFINED`
    pub fn register(&mut self, mip_levels: u32) -> ImageId {
        let id = ImageId(self.next_id);
        self.next_id += 1;
        self.images
            .insert(id, vec![ResourceState::UNDEFINED; mip_levels as usize]);
        id
    }

    /// Stop tracking an image once it has been destroyed
    pub fn release(&mut self, image: ImageId) {
        self.images.remove(&image);
    }

    pub fn is_tracked(&self, image: ImageId) -> bool {
        self.images.contains_key(&image)
    }

    fn levels(&self, image: ImageId) -> &[ResourceState] {
        match self.images.get(&image) {
            Some(levels) => levels,
            None => panic!("{image:?} is not tracked"),
        }
    }

    /// Recorded state of one level
    pub fn state(&self, image: ImageId, level: u32) -> ResourceState {
        self.levels(image)[level as usize]
    }

    /// Move `mips` of `image` to `to`, returning the barriers that must
    /// precede the next use.
    ///
    /// Levels that share a prior state and sit next to each other are merged
    /// into one barrier. Read-after-read in the same layout needs nothing.
    pub fn transition(
        &mut self,
        image: ImageId,
        mips: Range<u32>,
        to: ResourceState,
    ) -> Vec<ImageBarrier> {
        let levels = match self.images.get_mut(&image) {
            Some(levels) => levels,
            None => panic!("{image:?} is not tracked"),
        };
        assert!(
            mips.start < mips.end && mips.end as usize <= levels.len(),
            "mip range {mips:?} outside {image:?} with {} levels",
            levels.len()
        );

        let mut barriers: Vec<ImageBarrier> = Vec::new();
        for level in mips {
            let from = std::mem::replace(&mut levels[level as usize], to);
            if !from.needs_barrier(&to) {
                continue;
            }
            match barriers.last_mut() {
                Some(last) if last.from == from && last.mips.end == level => {
                    last.mips.end = level + 1;
                }
                _ => barriers.push(ImageBarrier {
                    image,
                    mips: level..level + 1,
                    from,
                    to,
                }),
            }
        }
        barriers
    }

    /// Panics unless `level` is recorded in `layout`.
    ///
    /// Binding a level whose layout does not match what the kernel expects is
    /// a sequencing bug, not a runtime condition.
    pub fn assert_layout(&self, image: ImageId, level: u32, layout: ImageLayout) {
        let current = self.state(image, level).layout;
        assert_eq!(
            current, layout,
            "{image:?} mip {level} is {current:?}, expected {layout:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_use_waits_on_nothing() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(6);

        let barriers = tracker.transition(image, 0..1, ResourceState::SHADER_WRITE);
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].from.stage, PipelineStage::TopOfPipe);
        assert_eq!(barriers[0].from.access, AccessMask::NONE);
        assert_eq!(barriers[0].from.layout, ImageLayout::Undefined);
        assert_eq!(tracker.state(image, 0), ResourceState::SHADER_WRITE);
        assert_eq!(tracker.state(image, 1), ResourceState::UNDEFINED);
    }

    #[test]
    fn test_barrier_from_matches_previous_state() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(3);
        let sequence = [
            ResourceState::SHADER_WRITE,
            ResourceState::SHADER_READ,
            ResourceState::SHADER_READ_WRITE,
            ResourceState::SHADER_READ,
            ResourceState::TRANSFER_SRC,
            ResourceState::SHADER_WRITE,
        ];

        let mut previous = tracker.state(image, 1);
        for to in sequence {
            let barriers = tracker.transition(image, 1..2, to);
            for barrier in &barriers {
                assert_eq!(barrier.from, previous);
                assert_eq!(barrier.to, to);
                assert_eq!(barrier.mips, 1..2);
            }
            assert_eq!(tracker.state(image, 1), to);
            previous = to;
        }
    }

    #[test]
    fn test_read_after_read_is_free() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(1);
        tracker.transition(image, 0..1, ResourceState::SHADER_WRITE);
        assert_eq!(tracker.transition(image, 0..1, ResourceState::SHADER_READ).len(), 1);
        assert!(tracker.transition(image, 0..1, ResourceState::SHADER_READ).is_empty());
        assert_eq!(tracker.state(image, 0), ResourceState::SHADER_READ);
    }

    #[test]
    fn test_write_after_write_still_synchronizes() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(1);
        tracker.transition(image, 0..1, ResourceState::SHADER_WRITE);
        let barriers = tracker.transition(image, 0..1, ResourceState::SHADER_WRITE);
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].from.layout, barriers[0].to.layout);
    }

    #[test]
    fn test_range_transition_merges_matching_levels() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(4);
        tracker.transition(image, 1..2, ResourceState::SHADER_WRITE);

        let barriers = tracker.transition(image, 0..4, ResourceState::TRANSFER_SRC);
        assert_eq!(barriers.len(), 3);
        assert_eq!(barriers[0].mips, 0..1);
        assert_eq!(barriers[0].from, ResourceState::UNDEFINED);
        assert_eq!(barriers[1].mips, 1..2);
        assert_eq!(barriers[1].from, ResourceState::SHADER_WRITE);
        assert_eq!(barriers[2].mips, 2..4);
        assert_eq!(barriers[2].from, ResourceState::UNDEFINED);
        for level in 0..4 {
            assert_eq!(tracker.state(image, level), ResourceState::TRANSFER_SRC);
        }
    }

    #[test]
    #[should_panic(expected = "expected ShaderReadOnly")]
    fn test_assert_layout_rejects_unready_level() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(2);
        tracker.transition(image, 0..1, ResourceState::SHADER_WRITE);
        tracker.assert_layout(image, 0, ImageLayout::ShaderReadOnly);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_transition_outside_mip_chain_panics() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(2);
        tracker.transition(image, 1..3, ResourceState::SHADER_READ);
    }

    #[test]
    fn test_release_forgets_image() {
        let mut tracker = ResourceStateTracker::new();
        let first = tracker.register(1);
        let second = tracker.register(1);
        assert_ne!(first, second);
        tracker.release(first);
        assert!(!tracker.is_tracked(first));
        assert!(tracker.is_tracked(second));
    }

    #[test]
    fn test_access_mask_names_and_writes() {
        let access = ResourceState::SHADER_READ_WRITE.access;
        let names: Vec<&str> = access.iter_names().map(|(name, _)| name).collect();
        assert_eq!(names, ["SHADER_READ", "SHADER_WRITE"]);
        assert!(access.has_writes());
        assert!(!(AccessMask::SHADER_READ | AccessMask::TRANSFER_READ).has_writes());
        assert!(AccessMask::NONE.is_empty());
    }
}
