//! Graphics pipeline objects.

use crate::descriptor::UpdateDescriptorQueue;
use crate::fixed_state::FixedPipelineState;
use crate::traits::{BufferCache, Device, DeviceError, TextureCache};
use bytemuck::{Pod, Zeroable};
use maxwell_shader::info::Info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Guest program slots: VertexA, VertexB, tessellation control and
/// eval, geometry, fragment.
pub const MAX_PROGRAMS: usize = 6;
/// Host stages; VertexA and VertexB merge into one.
pub const MAX_STAGES: usize = 5;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct GraphicsPipelineCacheKey {
    pub unique_hashes: [u64; MAX_PROGRAMS],
    pub state: FixedPipelineState,
}

impl GraphicsPipelineCacheKey {
    pub fn size(&self) -> usize {
        std::mem::size_of::<[u64; MAX_PROGRAMS]>() + self.state.size()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn hash64(&self) -> u64 {
        fxhash::hash64(&self.as_bytes()[..self.size()])
    }
}

impl PartialEq for GraphicsPipelineCacheKey {
    fn eq(&self, other: &GraphicsPipelineCacheKey) -> bool {
        let size = self.size();
        size == other.size() && self.as_bytes()[..size] == other.as_bytes()[..size]
    }
}

impl Eq for GraphicsPipelineCacheKey {}

impl std::hash::Hash for GraphicsPipelineCacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.as_bytes()[..self.size()]);
    }
}

/// Host objects and reflection of one graphics pipeline. The device
/// pipeline handle may still be building; `is_built` flips once it is
/// safe to bind.
pub struct GraphicsPipeline<D: Device> {
    key: GraphicsPipelineCacheKey,
    modules: Vec<Option<D::ShaderModule>>,
    descriptor_set_layout: Option<D::DescriptorSetLayout>,
    pipeline_layout: D::PipelineLayout,
    update_template: Option<D::UpdateTemplate>,
    uses_push_descriptor: bool,
    infos: Vec<Option<Info>>,

    handle: Mutex<Option<D::Pipeline>>,
    build_condvar: Condvar,
    is_built: AtomicBool,

    transitions: Mutex<Vec<(GraphicsPipelineCacheKey, Arc<GraphicsPipeline<D>>)>>,
}

impl<D: Device> GraphicsPipeline<D> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: GraphicsPipelineCacheKey,
        modules: Vec<Option<D::ShaderModule>>,
        descriptor_set_layout: Option<D::DescriptorSetLayout>,
        pipeline_layout: D::PipelineLayout,
        update_template: Option<D::UpdateTemplate>,
        uses_push_descriptor: bool,
        infos: Vec<Option<Info>>,
    ) -> GraphicsPipeline<D> {
        GraphicsPipeline {
            key,
            modules,
            descriptor_set_layout,
            pipeline_layout,
            update_template,
            uses_push_descriptor,
            infos,
            handle: Mutex::new(None),
            build_condvar: Condvar::new(),
            is_built: AtomicBool::new(false),
            transitions: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &GraphicsPipelineCacheKey {
        &self.key
    }

    pub fn infos(&self) -> &[Option<Info>] {
        &self.infos
    }

    pub fn pipeline_layout(&self) -> &D::PipelineLayout {
        &self.pipeline_layout
    }

    pub fn descriptor_set_layout(&self) -> Option<&D::DescriptorSetLayout> {
        self.descriptor_set_layout.as_ref()
    }

    pub fn update_template(&self) -> Option<&D::UpdateTemplate> {
        self.update_template.as_ref()
    }

    pub fn uses_push_descriptor(&self) -> bool {
        self.uses_push_descriptor
    }

    pub fn is_built(&self) -> bool {
        self.is_built.load(Ordering::Relaxed)
    }

    /// Runs the host build. Called from a worker or inline. A failed
    /// build still publishes so waiters wake up and see no handle.
    pub(crate) fn build(&self, device: &D) -> Result<(), DeviceError> {
        let result = device.create_graphics_pipeline(
            &self.key.state,
            &self.modules,
            &self.pipeline_layout,
        );
        let mut handle = self.handle.lock().unwrap();
        let outcome = match result {
            Ok(pipeline) => {
                *handle = Some(pipeline);
                Ok(())
            }
            Err(error) => Err(error),
        };
        // Publish only after the handle is fully constructed.
        self.is_built.store(true, Ordering::Release);
        self.build_condvar.notify_all();
        outcome
    }

    /// Blocks until the build finished, successfully or not.
    pub fn wait_until_built(&self) {
        let mut handle = self.handle.lock().unwrap();
        while !self.is_built.load(Ordering::Acquire) {
            handle = self.build_condvar.wait(handle).unwrap();
        }
        drop(handle);
    }

    /// Runs `f` with the built handle, waiting if necessary.
    pub fn with_handle<R>(&self, f: impl FnOnce(&D::Pipeline) -> R) -> Option<R> {
        self.wait_until_built();
        let handle = self.handle.lock().unwrap();
        handle.as_ref().map(f)
    }

    /// Appends a fast-path link for a draw-order transition.
    pub fn add_transition(
        &self,
        key: GraphicsPipelineCacheKey,
        next: Arc<GraphicsPipeline<D>>,
    ) {
        let mut transitions = self.transitions.lock().unwrap();
        if transitions.iter().any(|(existing, _)| *existing == key) {
            return;
        }
        transitions.push((key, next));
    }

    /// Transition fast path: this pipeline or a recorded successor.
    pub fn next(
        this: &Arc<GraphicsPipeline<D>>,
        current_key: &GraphicsPipelineCacheKey,
    ) -> Option<Arc<GraphicsPipeline<D>>> {
        if this.key == *current_key {
            return Some(Arc::clone(this));
        }
        let transitions = this.transitions.lock().unwrap();
        transitions
            .iter()
            .find(|(key, _)| key == current_key)
            .map(|(_, pipeline)| Arc::clone(pipeline))
    }

    #[cfg(test)]
    pub(crate) fn transition_count(&self) -> usize {
        self.transitions.lock().unwrap().len()
    }

    /// Per-draw descriptor gathering in declaration order: buffers
    /// first, then texel buffers, then image-samplers and storage
    /// images.
    pub fn configure<TC, BC>(
        &self,
        texture_cache: &mut TC,
        buffer_cache: &mut BC,
        queue: &mut UpdateDescriptorQueue<D>,
        is_indexed: bool,
    ) where
        TC: TextureCache<D>,
        BC: BufferCache<D>,
    {
        texture_cache.synchronize_graphics_descriptors();
        queue.acquire();

        // First pass: collect image view ids so written storage images
        // can be marked before the payload is flushed.
        let mut written_views = Vec::new();
        for (stage, info) in self.infos.iter().enumerate() {
            let info = match info {
                Some(info) => info,
                None => continue,
            };
            for descriptor in &info.constant_buffer_descriptors {
                let size = info.constant_buffer_used_sizes
                    [descriptor.index as usize % maxwell_shader::info::MAX_CBUFS];
                let binding =
                    buffer_cache.bind_graphics_uniform_buffer(stage, descriptor.index, size);
                queue.add_buffer(binding);
            }
            for (index, descriptor) in info.storage_buffers_descriptors.iter().enumerate() {
                let binding = buffer_cache.bind_graphics_storage_buffer(
                    stage,
                    index as u32,
                    descriptor.cbuf_index,
                    descriptor.cbuf_offset,
                    descriptor.is_written,
                );
                queue.add_buffer(binding);
            }
            for (index, _descriptor) in info.texture_buffer_descriptors.iter().enumerate() {
                let view = buffer_cache.bind_graphics_texture_buffer(stage, index as u32, false);
                queue.add_texel_buffer(view);
            }
            for (index, descriptor) in info.image_buffer_descriptors.iter().enumerate() {
                let view = buffer_cache.bind_graphics_texture_buffer(
                    stage,
                    index as u32,
                    descriptor.is_written,
                );
                queue.add_texel_buffer(view);
            }
            for descriptor in &info.texture_descriptors {
                let (_id, view, sampler) = texture_cache.get_graphics_texture(stage, descriptor);
                queue.add_sampled_image(view, sampler);
            }
            for descriptor in &info.image_descriptors {
                let (id, view) = texture_cache.get_graphics_image(stage, descriptor);
                if descriptor.is_written {
                    written_views.push(id);
                }
                queue.add_image(view);
            }
        }
        for id in written_views {
            texture_cache.mark_modification(id);
        }
        buffer_cache.update_graphics_buffers(is_indexed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefix_respects_state_size() {
        let mut a = GraphicsPipelineCacheKey::default();
        a.unique_hashes[0] = 0x1234;
        let mut b = a;
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());

        b.unique_hashes[0] = 0x1235;
        assert_ne!(a, b);

        // Differences past the truncated state prefix are invisible.
        let mut c = a;
        c.state.set_extended_dynamic_state(true);
        let mut d = c;
        d.state.dynamic_state.vertex_strides[3] = 12;
        assert_eq!(c, d);
    }
}
