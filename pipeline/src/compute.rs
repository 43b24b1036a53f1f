//! Compute pipeline objects.

use crate::descriptor::UpdateDescriptorQueue;
use crate::traits::{BufferCache, Device, DeviceError, TextureCache};
use bytemuck::{Pod, Zeroable};
use maxwell_shader::info::Info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct ComputePipelineCacheKey {
    pub unique_hash: u64,
    pub shared_memory_size: u32,
    pub workgroup_size: [u32; 3],
}

impl ComputePipelineCacheKey {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn hash64(&self) -> u64 {
        fxhash::hash64(self.as_bytes())
    }
}

impl std::hash::Hash for ComputePipelineCacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}

pub struct ComputePipeline<D: Device> {
    key: ComputePipelineCacheKey,
    module: D::ShaderModule,
    descriptor_set_layout: Option<D::DescriptorSetLayout>,
    pipeline_layout: D::PipelineLayout,
    update_template: Option<D::UpdateTemplate>,
    uses_push_descriptor: bool,
    info: Info,

    handle: Mutex<Option<D::Pipeline>>,
    build_condvar: Condvar,
    is_built: AtomicBool,
}

impl<D: Device> ComputePipeline<D> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: ComputePipelineCacheKey,
        module: D::ShaderModule,
        descriptor_set_layout: Option<D::DescriptorSetLayout>,
        pipeline_layout: D::PipelineLayout,
        update_template: Option<D::UpdateTemplate>,
        uses_push_descriptor: bool,
        info: Info,
    ) -> ComputePipeline<D> {
        ComputePipeline {
            key,
            module,
            descriptor_set_layout,
            pipeline_layout,
            update_template,
            uses_push_descriptor,
            info,
            handle: Mutex::new(None),
            build_condvar: Condvar::new(),
            is_built: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &ComputePipelineCacheKey {
        &self.key
    }

    pub fn info(&self) -> &Info {
        &self.info
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

    pub(crate) fn build(&self, device: &D) -> Result<(), DeviceError> {
        let result = device.create_compute_pipeline(&self.module, &self.pipeline_layout);
        let mut handle = self.handle.lock().unwrap();
        let outcome = match result {
            Ok(pipeline) => {
                *handle = Some(pipeline);
                Ok(())
            }
            Err(error) => Err(error),
        };
        self.is_built.store(true, Ordering::Release);
        self.build_condvar.notify_all();
        outcome
    }

    pub fn wait_until_built(&self) {
        let mut handle = self.handle.lock().unwrap();
        while !self.is_built.load(Ordering::Acquire) {
            handle = self.build_condvar.wait(handle).unwrap();
        }
        drop(handle);
    }

    pub fn with_handle<R>(&self, f: impl FnOnce(&D::Pipeline) -> R) -> Option<R> {
        self.wait_until_built();
        let handle = self.handle.lock().unwrap();
        handle.as_ref().map(f)
    }

    /// Per-dispatch descriptor gathering, in the same declaration order
    /// as the graphics path.
    pub fn configure<TC, BC>(
        &self,
        texture_cache: &mut TC,
        buffer_cache: &mut BC,
        queue: &mut UpdateDescriptorQueue<D>,
    ) where
        TC: TextureCache<D>,
        BC: BufferCache<D>,
    {
        texture_cache.synchronize_compute_descriptors();
        queue.acquire();

        let info = &self.info;
        let mut written_views = Vec::new();
        for descriptor in &info.constant_buffer_descriptors {
            let size = info.constant_buffer_used_sizes
                [descriptor.index as usize % maxwell_shader::info::MAX_CBUFS];
            let binding = buffer_cache.bind_compute_uniform_buffer(descriptor.index, size);
            queue.add_buffer(binding);
        }
        for (index, descriptor) in info.storage_buffers_descriptors.iter().enumerate() {
            let binding = buffer_cache.bind_compute_storage_buffer(
                index as u32,
                descriptor.cbuf_index,
                descriptor.cbuf_offset,
                descriptor.is_written,
            );
            queue.add_buffer(binding);
        }
        for (index, _descriptor) in info.texture_buffer_descriptors.iter().enumerate() {
            let view = buffer_cache.bind_compute_texture_buffer(index as u32, false);
            queue.add_texel_buffer(view);
        }
        for (index, descriptor) in info.image_buffer_descriptors.iter().enumerate() {
            let view =
                buffer_cache.bind_compute_texture_buffer(index as u32, descriptor.is_written);
            queue.add_texel_buffer(view);
        }
        for descriptor in &info.texture_descriptors {
            let (_id, view, sampler) = texture_cache.get_compute_texture(descriptor);
            queue.add_sampled_image(view, sampler);
        }
        for descriptor in &info.image_descriptors {
            let (id, view) = texture_cache.get_compute_image(descriptor);
            if descriptor.is_written {
                written_views.push(id);
            }
            queue.add_image(view);
        }
        for id in written_views {
            texture_cache.mark_modification(id);
        }
        buffer_cache.update_compute_buffers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_stable() {
        let key = ComputePipelineCacheKey {
            unique_hash: 0xABCD,
            shared_memory_size: 0x100,
            workgroup_size: [8, 8, 1],
        };
        assert_eq!(key.hash64(), key.hash64());
        let other = ComputePipelineCacheKey {
            workgroup_size: [8, 8, 2],
            ..key
        };
        assert_ne!(key, other);
    }
}
