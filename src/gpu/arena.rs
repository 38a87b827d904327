//! Stage-scoped storage for views and bind groups
//!
//! Each stage builds its views and bind groups into one arena, records its
//! dispatches against them and releases the arena once the stage's batch
//! has completed on the device.

use super::image::{LevelView, MipImage};

/// Index of a view inside an arena
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ViewId(usize);

/// Index of a bind group inside an arena
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BindGroupId(usize);

/// A resource bound to one slot of a kernel
pub enum Binding<'a> {
    View(ViewId),
    Sampler(&'a wgpu::Sampler),
    Buffer(&'a wgpu::Buffer),
}

pub struct BindingArena {
    label: &'static str,
    views: Vec<LevelView>,
    bind_groups: Vec<wgpu::BindGroup>,
}

impl BindingArena {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            views: Vec::new(),
            bind_groups: Vec::new(),
        }
    }

    /// Create a view of mip `level` owned by this arena
    pub fn level_view(&mut self, image: &MipImage, level: u32) -> ViewId {
        let view = image.level_view(level);
        log::trace!("{}: view of {} mip {}", self.label, image.label, view.level);
        self.views.push(view);
        ViewId(self.views.len() - 1)
    }

    pub fn view(&self, id: ViewId) -> &LevelView {
        &self.views[id.0]
    }

    /// Build a bind group whose slots follow the order of `bindings`
    pub fn bind_group(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        bindings: &[Binding<'_>],
    ) -> BindGroupId {
        let bind_group = {
            let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
                .iter()
                .enumerate()
                .map(|(slot, binding)| wgpu::BindGroupEntry {
                    binding: slot as u32,
                    resource: match binding {
                        Binding::View(id) => wgpu::BindingResource::TextureView(&self.views[id.0].view),
                        Binding::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                        Binding::Buffer(buffer) => buffer.as_entire_binding(),
                    },
                })
                .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(self.label),
                layout,
                entries: &entries,
            })
        };
        self.bind_groups.push(bind_group);
        BindGroupId(self.bind_groups.len() - 1)
    }

    pub fn get(&self, id: BindGroupId) -> &wgpu::BindGroup {
        &self.bind_groups[id.0]
    }

    /// Drop everything the stage allocated
    pub fn release(self) {
        log::trace!(
            "Releasing {} arena: {} views, {} bind groups",
            self.label,
            self.views.len(),
            self.bind_groups.len()
        );
    }
}
