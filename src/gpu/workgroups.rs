//! Dispatch sizing shared by every compute stage

/// Width/height of an image or one of its mip levels, in pixels
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Extent of the given mip level (each level halves, never below 1)
    pub fn mip(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Number of levels in a full mip chain down to 1x1
    pub fn max_mip_levels(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }

    pub fn to_wgpu(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Pixels covered by one workgroup; must match the kernel's `@workgroup_size`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Workgroup counts passed to `dispatch_workgroups`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkgroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupCount {
    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// Number of workgroups needed to cover `extent` with `tile`-sized groups.
///
/// Zero-sized extents are rejected by the config layer before any dispatch.
#[inline]
pub fn plan(extent: Extent2d, tile: TileSize) -> WorkgroupCount {
    WorkgroupCount {
        x: extent.width.div_ceil(tile.width),
        y: extent.height.div_ceil(tile.height),
        z: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_covers_extent_without_spare_groups() {
        let tiles = [TileSize::new(8, 8), TileSize::new(16, 16), TileSize::new(32, 4)];
        for tile in tiles {
            for width in (1..200).step_by(7) {
                for height in [1, 15, 16, 17, 1080] {
                    let count = plan(Extent2d::new(width, height), tile);
                    assert!(count.x * tile.width >= width);
                    assert!((count.x - 1) * tile.width < width);
                    assert!(count.y * tile.height >= height);
                    assert!((count.y - 1) * tile.height < height);
                    assert_eq!(count.z, 1);
                }
            }
        }
    }

    #[test]
    fn test_plan_full_hd() {
        let count = plan(Extent2d::new(1920, 1080), TileSize::new(16, 16));
        assert_eq!(count, WorkgroupCount { x: 120, y: 68, z: 1 });
        assert_eq!(count.total(), 8160);
    }

    #[test]
    fn test_mip_extents_halve_and_clamp() {
        let extent = Extent2d::new(1920, 1080);
        assert_eq!(extent.mip(0), extent);
        assert_eq!(extent.mip(1), Extent2d::new(960, 540));
        assert_eq!(extent.mip(5), Extent2d::new(60, 33));
        assert_eq!(Extent2d::new(4, 1).mip(2), Extent2d::new(1, 1));
    }

    #[test]
    fn test_max_mip_levels() {
        assert_eq!(Extent2d::new(1, 1).max_mip_levels(), 1);
        assert_eq!(Extent2d::new(16, 16).max_mip_levels(), 5);
        assert_eq!(Extent2d::new(1920, 1080).max_mip_levels(), 11);
    }
}
