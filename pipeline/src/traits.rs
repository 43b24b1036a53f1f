//! Seams to the host API and the neighbouring caches.
//!
//! The pipeline layer is generic over a [`Device`] the way a renderer
//! backend is: every host object is an associated type, and the cache
//! never names a concrete graphics API.

use crate::descriptor::{DescriptorSetLayoutBinding, UpdateTemplateEntry};
use crate::fixed_state::FixedPipelineState;
use maxwell_shader::info::{ImageDescriptor, TextureDescriptor};
use std::error::Error;
use std::fmt;

/// Host pipeline creation failure.
#[derive(Debug)]
pub struct DeviceError(pub String);

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for DeviceError {}

/// The host graphics API. Object creation may be called from build
/// worker threads.
pub trait Device: Send + Sync + 'static {
    type ShaderModule: Send + Sync;
    type DescriptorSetLayout: Send + Sync;
    type PipelineLayout: Send + Sync;
    type UpdateTemplate: Send + Sync;
    type Pipeline: Send + Sync;
    type Buffer: Copy + Send + Sync;
    type BufferView: Copy + Send + Sync;
    type ImageView: Copy + Send + Sync;
    type Sampler: Copy + Send + Sync;

    fn create_shader_module(&self, code: &[u32]) -> Result<Self::ShaderModule, DeviceError>;

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
        use_push_descriptor: bool,
    ) -> Result<Self::DescriptorSetLayout, DeviceError>;

    fn create_pipeline_layout(
        &self,
        set_layout: Option<&Self::DescriptorSetLayout>,
    ) -> Result<Self::PipelineLayout, DeviceError>;

    fn create_update_template(
        &self,
        entries: &[UpdateTemplateEntry],
        set_layout: &Self::DescriptorSetLayout,
        pipeline_layout: &Self::PipelineLayout,
        use_push_descriptor: bool,
    ) -> Result<Self::UpdateTemplate, DeviceError>;

    fn create_graphics_pipeline(
        &self,
        state: &FixedPipelineState,
        modules: &[Option<Self::ShaderModule>],
        layout: &Self::PipelineLayout,
    ) -> Result<Self::Pipeline, DeviceError>;

    fn create_compute_pipeline(
        &self,
        module: &Self::ShaderModule,
        layout: &Self::PipelineLayout,
    ) -> Result<Self::Pipeline, DeviceError>;

    /// Upper bound of descriptors a push-descriptor set supports; zero
    /// disables the fast path.
    fn max_push_descriptors(&self) -> u32 {
        0
    }

    fn has_extended_dynamic_state(&self) -> bool {
        false
    }

    fn has_dynamic_vertex_input(&self) -> bool {
        false
    }
}

/// Command scheduler; ticks back the fences.
pub trait Scheduler: Send + Sync {
    fn current_tick(&self) -> u64;
    fn is_free(&self, tick: u64) -> bool;
    fn wait(&self, tick: u64);
    fn flush(&self);
}

/// Buffer binding handed to the descriptor payload.
#[derive(Copy, Clone, Debug)]
pub struct BufferBinding<D: Device> {
    pub buffer: D::Buffer,
    pub offset: u64,
    pub size: u64,
}

/// The buffer cache, seen as the per-stage binding surface the
/// descriptor path drives.
pub trait BufferCache<D: Device> {
    fn bind_graphics_uniform_buffer(
        &mut self,
        stage: usize,
        index: u32,
        size: u32,
    ) -> BufferBinding<D>;

    fn bind_graphics_storage_buffer(
        &mut self,
        stage: usize,
        index: u32,
        cbuf_index: u32,
        cbuf_offset: u32,
        is_written: bool,
    ) -> BufferBinding<D>;

    fn bind_graphics_texture_buffer(
        &mut self,
        stage: usize,
        index: u32,
        is_written: bool,
    ) -> D::BufferView;

    fn disable_graphics_uniform_buffer(&mut self, stage: usize, index: u32);

    fn bind_compute_uniform_buffer(&mut self, index: u32, size: u32) -> BufferBinding<D>;

    fn bind_compute_storage_buffer(
        &mut self,
        index: u32,
        cbuf_index: u32,
        cbuf_offset: u32,
        is_written: bool,
    ) -> BufferBinding<D>;

    fn bind_compute_texture_buffer(&mut self, index: u32, is_written: bool) -> D::BufferView;

    fn update_graphics_buffers(&mut self, is_indexed: bool);

    fn update_compute_buffers(&mut self);
}

/// The texture cache, exposing handle resolution for sampled and
/// storage images plus the modification tracker.
pub trait TextureCache<D: Device> {
    fn synchronize_graphics_descriptors(&mut self);
    fn synchronize_compute_descriptors(&mut self);

    /// Resolves a combined image-sampler; returns the tracked view id
    /// with the host handles.
    fn get_graphics_texture(
        &mut self,
        stage: usize,
        descriptor: &TextureDescriptor,
    ) -> (u32, D::ImageView, D::Sampler);

    fn get_graphics_image(
        &mut self,
        stage: usize,
        descriptor: &ImageDescriptor,
    ) -> (u32, D::ImageView);

    fn get_compute_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> (u32, D::ImageView, D::Sampler);

    fn get_compute_image(&mut self, descriptor: &ImageDescriptor) -> (u32, D::ImageView);

    fn mark_modification(&mut self, image_id: u32);
}

/// Observer of in-flight pipeline builds.
pub trait BuildObserver: Send + Sync {
    fn mark_shader_building(&self);
    fn mark_shader_complete(&self);
}
