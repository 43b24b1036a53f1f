//! Per-stage reflection info consumed by the pipeline layer.
//!
//! This is the only shader-side data the host needs to build descriptor
//! layouts and bind resources; it is derived from the IR after
//! translation and owns no IR nodes.

use crate::inst::{AttributeIndex, ImageType, TextureType};
use crate::node::{GlobalMemoryBase, GlobalMemoryUsage};
use crate::shader_ir::ShaderIr;
use crate::ShaderStage;
use bitflags::bitflags;

pub const MAX_CBUFS: usize = 18;

bitflags! {
    /// Feature usage discovered during translation.
    #[derive(Default)]
    pub struct UsageFlags: u64 {
        const FP16 = 1 << 0;
        const FP64 = 1 << 1;
        const INT64 = 1 << 2;
        const WARP_VOTE = 1 << 3;
        const WARP_SHUFFLE = 1 << 4;
        const SHARED_ATOMICS = 1 << 5;
        const GLOBAL_ATOMICS = 1 << 6;
        const IMAGE_ATOMICS = 1 << 7;
        const TYPELESS_IMAGE_READS = 1 << 8;
        const TYPELESS_IMAGE_WRITES = 1 << 9;
        const DEMOTE_TO_HELPER = 1 << 10;
        const DERIVATIVES = 1 << 11;
        const INDEXED_SAMPLERS = 1 << 12;
        const LAYER = 1 << 13;
        const VIEWPORT_INDEX = 1 << 14;
        const POINT_SIZE = 1 << 15;
        const INSTANCE_ID = 1 << 16;
        const VERTEX_ID = 1 << 17;
        const PHYSICAL_ATTRIBUTES = 1 << 18;
        const GLOBAL_MEMORY = 1 << 19;
        const GLOBAL_MEMORY_WRITES = 1 << 20;
        const SHADOW_SAMPLERS = 1 << 21;
    }
}

/// Bitset over the attribute space of one stage boundary.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VaryingState {
    pub mask: [u64; 4],
}

impl VaryingState {
    pub fn set(&mut self, index: usize) {
        self.mask[index / 64] |= 1 << (index % 64);
    }

    pub fn get(&self, index: usize) -> bool {
        self.mask[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn set_attribute(&mut self, index: AttributeIndex, element: u32) {
        if let Some(slot) = attribute_slot(index, element) {
            self.set(slot);
        }
    }

    pub fn any_generic(&self) -> bool {
        self.mask.iter().any(|&word| word != 0)
    }
}

/// Maps an attribute/element pair to a flat varying slot.
fn attribute_slot(index: AttributeIndex, element: u32) -> Option<usize> {
    match index {
        AttributeIndex::Attribute(generic) => Some((generic * 4 + element) as usize),
        AttributeIndex::Position => Some(128 + element as usize),
        AttributeIndex::PointCoord => Some(132 + element as usize),
        AttributeIndex::ClipDistances0123 => Some(136 + element as usize),
        AttributeIndex::ClipDistances4567 => Some(140 + element as usize),
        AttributeIndex::LayerViewportPointSize => Some(144 + element as usize),
        AttributeIndex::FrontFacing => Some(148),
        AttributeIndex::TessCoordInstanceIdVertexId => Some(152 + element as usize),
        AttributeIndex::Unknown(_) => None,
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConstantBufferDescriptor {
    pub index: u32,
    pub count: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StorageBufferDescriptor {
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
    pub count: u32,
    pub is_written: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TextureBufferDescriptor {
    pub cbuf_index: Option<u32>,
    pub cbuf_offset: u32,
    pub count: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImageBufferDescriptor {
    pub cbuf_index: Option<u32>,
    pub cbuf_offset: u32,
    pub count: u32,
    pub is_written: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TextureDescriptor {
    pub texture_type: TextureType,
    pub is_depth: bool,
    pub is_array: bool,
    pub cbuf_index: Option<u32>,
    pub cbuf_offset: u32,
    pub count: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImageDescriptor {
    pub image_type: ImageType,
    pub is_written: bool,
    pub is_read: bool,
    pub cbuf_index: Option<u32>,
    pub cbuf_offset: u32,
    pub count: u32,
}

/// Reflection snapshot of one translated stage.
#[derive(Clone, Debug, Default)]
pub struct Info {
    pub usage: UsageFlags,

    pub constant_buffer_mask: u32,
    pub constant_buffer_used_sizes: [u32; MAX_CBUFS],

    pub loads: VaryingState,
    pub stores: VaryingState,
    pub passthrough: VaryingState,
    pub clip_distances_mask: u8,

    pub constant_buffer_descriptors: Vec<ConstantBufferDescriptor>,
    pub storage_buffers_descriptors: Vec<StorageBufferDescriptor>,
    pub texture_buffer_descriptors: Vec<TextureBufferDescriptor>,
    pub image_buffer_descriptors: Vec<ImageBufferDescriptor>,
    pub texture_descriptors: Vec<TextureDescriptor>,
    pub image_descriptors: Vec<ImageDescriptor>,

    pub used_global_memory: Vec<(GlobalMemoryBase, GlobalMemoryUsage)>,

    pub local_memory_size: u64,
}

impl Info {
    /// Builds the reflection snapshot from a translated program.
    pub fn from_ir(ir: &ShaderIr) -> Info {
        let mut info = Info::default();

        if ir.uses_warps() {
            info.usage |= UsageFlags::WARP_VOTE | UsageFlags::WARP_SHUFFLE;
        }
        if ir.uses_indexed_samplers() {
            info.usage |= UsageFlags::INDEXED_SAMPLERS;
        }
        if ir.uses_layer() {
            info.usage |= UsageFlags::LAYER;
        }
        if ir.uses_viewport_index() {
            info.usage |= UsageFlags::VIEWPORT_INDEX;
        }
        if ir.uses_point_size() {
            info.usage |= UsageFlags::POINT_SIZE;
        }
        if ir.uses_instance_id() {
            info.usage |= UsageFlags::INSTANCE_ID;
        }
        if ir.uses_vertex_id() {
            info.usage |= UsageFlags::VERTEX_ID;
        }
        if ir.uses_half() {
            info.usage |= UsageFlags::FP16;
        }
        if ir.stage() == ShaderStage::Fragment {
            // Kill lowers to demote on capable hosts.
            info.usage |= UsageFlags::DEMOTE_TO_HELPER;
        }

        for (&index, cbuf) in ir.used_cbufs() {
            if (index as usize) >= MAX_CBUFS {
                warn!("Dropping out-of-range constant buffer c{}", index);
                continue;
            }
            info.constant_buffer_mask |= 1 << index;
            info.constant_buffer_used_sizes[index as usize] = cbuf.size();
            info.constant_buffer_descriptors
                .push(ConstantBufferDescriptor { index, count: 1 });
        }

        for (&base, &usage) in ir.used_global_memory() {
            info.usage |= UsageFlags::GLOBAL_MEMORY;
            if usage.is_written {
                info.usage |= UsageFlags::GLOBAL_MEMORY_WRITES;
            }
            info.storage_buffers_descriptors.push(StorageBufferDescriptor {
                cbuf_index: base.cbuf_index,
                cbuf_offset: base.cbuf_offset,
                count: 1,
                is_written: usage.is_written,
            });
            info.used_global_memory.push((base, usage));
        }

        for sampler in ir.used_samplers() {
            if sampler.is_shadow {
                info.usage |= UsageFlags::SHADOW_SAMPLERS;
            }
            if sampler.is_buffer {
                info.texture_buffer_descriptors.push(TextureBufferDescriptor {
                    cbuf_index: sampler.buffer,
                    cbuf_offset: sampler.offset,
                    count: sampler.size.max(1),
                });
            } else {
                info.texture_descriptors.push(TextureDescriptor {
                    texture_type: sampler.texture_type,
                    is_depth: sampler.is_shadow,
                    is_array: sampler.is_array,
                    cbuf_index: sampler.buffer,
                    cbuf_offset: sampler.offset,
                    count: sampler.size.max(1),
                });
            }
        }

        for image in ir.used_images() {
            if image.is_atomic {
                info.usage |= UsageFlags::IMAGE_ATOMICS;
            }
            if image.image_type == ImageType::TextureBuffer {
                info.image_buffer_descriptors.push(ImageBufferDescriptor {
                    cbuf_index: image.buffer,
                    cbuf_offset: image.offset,
                    count: 1,
                    is_written: image.is_written,
                });
            } else {
                if image.is_read {
                    info.usage |= UsageFlags::TYPELESS_IMAGE_READS;
                }
                if image.is_written {
                    info.usage |= UsageFlags::TYPELESS_IMAGE_WRITES;
                }
                info.image_descriptors.push(ImageDescriptor {
                    image_type: image.image_type,
                    is_written: image.is_written,
                    is_read: image.is_read,
                    cbuf_index: image.buffer,
                    cbuf_offset: image.offset,
                    count: 1,
                });
            }
        }

        for &index in ir.used_input_attributes() {
            info.loads.set_attribute(index, 0);
            if let AttributeIndex::Attribute(_) = index {
                for element in 0..4 {
                    info.loads.set_attribute(index, element);
                }
            }
        }
        for &index in ir.used_output_attributes() {
            info.stores.set_attribute(index, 0);
            if let AttributeIndex::Attribute(_) = index {
                for element in 0..4 {
                    info.stores.set_attribute(index, element);
                }
            }
        }
        for (bit, &used) in ir.used_clip_distances().iter().enumerate() {
            if used {
                info.clip_distances_mask |= 1 << bit;
            }
        }
        info.local_memory_size = ir.header().local_memory_size();
        info
    }

    /// Total descriptors declared by this stage, used for the
    /// push-descriptor eligibility check.
    pub fn descriptor_count(&self) -> u32 {
        self.constant_buffer_descriptors.iter().map(|d| d.count).sum::<u32>()
            + self.storage_buffers_descriptors.iter().map(|d| d.count).sum::<u32>()
            + self.texture_buffer_descriptors.iter().map(|d| d.count).sum::<u32>()
            + self.image_buffer_descriptors.iter().map(|d| d.count).sum::<u32>()
            + self.texture_descriptors.iter().map(|d| d.count).sum::<u32>()
            + self.image_descriptors.iter().map(|d| d.count).sum::<u32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varying_state_bits() {
        let mut state = VaryingState::default();
        state.set_attribute(AttributeIndex::Attribute(2), 1);
        assert!(state.get(9));
        assert!(!state.get(8));
        assert!(state.any_generic());
    }

    #[test]
    fn descriptor_count_sums_all_kinds() {
        let mut info = Info::default();
        info.constant_buffer_descriptors
            .push(ConstantBufferDescriptor { index: 0, count: 2 });
        info.texture_descriptors.push(TextureDescriptor {
            texture_type: TextureType::Texture2D,
            is_depth: false,
            is_array: false,
            cbuf_index: None,
            cbuf_offset: 8,
            count: 3,
        });
        assert_eq!(info.descriptor_count(), 5);
    }
}
