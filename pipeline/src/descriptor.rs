//! Descriptor-set layout synthesis and the update payload.
//!
//! Bindings are emitted in a fixed order per stage — uniform buffers,
//! storage buffers, uniform texel buffers, storage texel buffers,
//! combined image-samplers, storage images — with binding numbers
//! assigned monotonically, so the pipeline layout is a concatenation of
//! per-stage slots.

use crate::traits::{BufferBinding, Device};
use maxwell_shader::info::Info;
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    UniformTexelBuffer,
    StorageTexelBuffer,
    CombinedImageSampler,
    StorageImage,
}

#[derive(Copy, Clone, Debug)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub count: u32,
    /// Stage index in program order; the device maps it to its stage
    /// flag bits.
    pub stage: usize,
}

/// One entry of the update template: where in the payload the data for
/// a binding begins.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UpdateTemplateEntry {
    pub binding: u32,
    pub count: u32,
    pub offset: usize,
}

/// Builds set layout bindings and template entries from stage infos.
pub struct DescriptorLayoutBuilder {
    bindings: SmallVec<[DescriptorSetLayoutBinding; 32]>,
    entries: SmallVec<[UpdateTemplateEntry; 32]>,
    binding: u32,
    num_descriptors: u32,
    offset: usize,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> DescriptorLayoutBuilder {
        DescriptorLayoutBuilder {
            bindings: SmallVec::new(),
            entries: SmallVec::new(),
            binding: 0,
            num_descriptors: 0,
            offset: 0,
        }
    }

    pub fn add(&mut self, info: &Info, stage: usize) {
        let cbuf_counts: Vec<u32> = info
            .constant_buffer_descriptors
            .iter()
            .map(|d| d.count)
            .collect();
        self.add_group(DescriptorType::UniformBuffer, stage, &cbuf_counts);
        let ssbo_counts: Vec<u32> = info
            .storage_buffers_descriptors
            .iter()
            .map(|d| d.count)
            .collect();
        self.add_group(DescriptorType::StorageBuffer, stage, &ssbo_counts);
        let texel_counts: Vec<u32> = info
            .texture_buffer_descriptors
            .iter()
            .map(|d| d.count)
            .collect();
        self.add_group(DescriptorType::UniformTexelBuffer, stage, &texel_counts);
        let image_buffer_counts: Vec<u32> = info
            .image_buffer_descriptors
            .iter()
            .map(|d| d.count)
            .collect();
        self.add_group(DescriptorType::StorageTexelBuffer, stage, &image_buffer_counts);
        let texture_counts: Vec<u32> =
            info.texture_descriptors.iter().map(|d| d.count).collect();
        self.add_group(DescriptorType::CombinedImageSampler, stage, &texture_counts);
        let image_counts: Vec<u32> = info.image_descriptors.iter().map(|d| d.count).collect();
        self.add_group(DescriptorType::StorageImage, stage, &image_counts);
    }

    fn add_group(&mut self, descriptor_type: DescriptorType, stage: usize, counts: &[u32]) {
        for &count in counts {
            self.bindings.push(DescriptorSetLayoutBinding {
                binding: self.binding,
                descriptor_type,
                count,
                stage,
            });
            self.entries.push(UpdateTemplateEntry {
                binding: self.binding,
                count,
                offset: self.offset,
            });
            self.binding += 1;
            self.num_descriptors += count;
            self.offset += count as usize;
        }
    }

    pub fn bindings(&self) -> &[DescriptorSetLayoutBinding] {
        &self.bindings
    }

    pub fn entries(&self) -> &[UpdateTemplateEntry] {
        &self.entries
    }

    pub fn num_descriptors(&self) -> u32 {
        self.num_descriptors
    }

    /// Whether the whole set fits the device's push-descriptor budget.
    pub fn can_use_push_descriptor(&self, max_push_descriptors: u32) -> bool {
        max_push_descriptors != 0 && self.num_descriptors <= max_push_descriptors
    }
}

impl Default for DescriptorLayoutBuilder {
    fn default() -> DescriptorLayoutBuilder {
        DescriptorLayoutBuilder::new()
    }
}

/// Payload entry consumed by the update template.
#[derive(Copy, Clone)]
pub enum DescriptorUpdateEntry<D: Device> {
    Buffer(BufferBinding<D>),
    TexelBuffer(D::BufferView),
    SampledImage {
        image_view: D::ImageView,
        sampler: D::Sampler,
    },
    Image {
        image_view: D::ImageView,
    },
}

/// Collects descriptor data in binding order for one draw or dispatch.
pub struct UpdateDescriptorQueue<D: Device> {
    payload: Vec<DescriptorUpdateEntry<D>>,
    upload_start: usize,
}

impl<D: Device> UpdateDescriptorQueue<D> {
    pub fn new() -> UpdateDescriptorQueue<D> {
        UpdateDescriptorQueue {
            payload: Vec::with_capacity(0x1000),
            upload_start: 0,
        }
    }

    /// Starts a fresh payload region for the next bind.
    pub fn acquire(&mut self) {
        self.upload_start = self.payload.len();
    }

    pub fn add_buffer(&mut self, binding: BufferBinding<D>) {
        self.payload.push(DescriptorUpdateEntry::Buffer(binding));
    }

    pub fn add_texel_buffer(&mut self, view: D::BufferView) {
        self.payload.push(DescriptorUpdateEntry::TexelBuffer(view));
    }

    pub fn add_sampled_image(&mut self, image_view: D::ImageView, sampler: D::Sampler) {
        self.payload.push(DescriptorUpdateEntry::SampledImage {
            image_view,
            sampler,
        });
    }

    pub fn add_image(&mut self, image_view: D::ImageView) {
        self.payload
            .push(DescriptorUpdateEntry::Image { image_view });
    }

    pub fn update_data(&self) -> &[DescriptorUpdateEntry<D>] {
        &self.payload[self.upload_start..]
    }

    /// Drops payload from finished frames.
    pub fn tick_frame(&mut self) {
        self.payload.clear();
        self.upload_start = 0;
    }
}

impl<D: Device> Default for UpdateDescriptorQueue<D> {
    fn default() -> UpdateDescriptorQueue<D> {
        UpdateDescriptorQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maxwell_shader::info::{ConstantBufferDescriptor, TextureDescriptor};
    use maxwell_shader::inst::TextureType;

    fn info_with(cbufs: u32, textures: u32) -> Info {
        let mut info = Info::default();
        for index in 0..cbufs {
            info.constant_buffer_descriptors
                .push(ConstantBufferDescriptor { index, count: 1 });
        }
        for i in 0..textures {
            info.texture_descriptors.push(TextureDescriptor {
                texture_type: TextureType::Texture2D,
                is_depth: false,
                is_array: false,
                cbuf_index: None,
                cbuf_offset: 8 + i,
                count: 1,
            });
        }
        info
    }

    #[test]
    fn bindings_are_monotonic_across_stages() {
        let mut builder = DescriptorLayoutBuilder::new();
        builder.add(&info_with(2, 1), 0);
        builder.add(&info_with(1, 0), 4);
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 4);
        for (index, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, index as u32);
        }
        // Uniform buffers precede the samplers within a stage.
        assert_eq!(bindings[0].descriptor_type, DescriptorType::UniformBuffer);
        assert_eq!(
            bindings[2].descriptor_type,
            DescriptorType::CombinedImageSampler
        );
        assert_eq!(bindings[3].stage, 4);
    }

    #[test]
    fn template_offsets_follow_counts() {
        let mut builder = DescriptorLayoutBuilder::new();
        let mut info = info_with(1, 0);
        info.texture_descriptors.push(TextureDescriptor {
            texture_type: TextureType::Texture2D,
            is_depth: false,
            is_array: false,
            cbuf_index: None,
            cbuf_offset: 8,
            count: 3,
        });
        builder.add(&info, 0);
        let entries = builder.entries();
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 1);
        assert_eq!(builder.num_descriptors(), 4);
    }

    #[test]
    fn push_descriptor_budget() {
        let mut builder = DescriptorLayoutBuilder::new();
        builder.add(&info_with(3, 3), 0);
        assert!(builder.can_use_push_descriptor(32));
        assert!(!builder.can_use_push_descriptor(4));
        assert!(!builder.can_use_push_descriptor(0));
    }
}
