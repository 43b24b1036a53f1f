//! The Fixed-Pipeline-State cache key.
//!
//! The non-shader half of a graphics pipeline, packed into a byte
//! layout with unique object representation: no padding and no trap
//! values, so hashing and comparing raw bytes is well defined. The
//! hashed prefix shrinks when host capabilities make trailing sections
//! dynamic.

use bytemuck::{Pod, Zeroable};
use std::hash::{Hash, Hasher};
use std::mem::{offset_of, size_of};

pub const NUM_RENDER_TARGETS: usize = 8;
pub const NUM_VIEWPORTS: usize = 16;
pub const NUM_VERTEX_ATTRIBUTES: usize = 32;
pub const NUM_VERTEX_ARRAYS: usize = 32;
pub const NUM_XFB_BUFFERS: usize = 4;

#[inline]
fn bits(raw: u32, lo: u32, len: u32) -> u32 {
    (raw >> lo) & ((1u32 << len) - 1)
}

#[inline]
fn set_bits(raw: &mut u32, lo: u32, len: u32, value: u32) {
    let mask = ((1u32 << len) - 1) << lo;
    *raw = (*raw & !mask) | ((value << lo) & mask);
}

/// Per-attachment blend configuration packed into one word.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct BlendingAttachment {
    pub raw: u32,
}

impl BlendingAttachment {
    pub fn enable(&self) -> bool {
        bits(self.raw, 30, 1) != 0
    }

    pub fn set_enable(&mut self, enable: bool) {
        set_bits(&mut self.raw, 30, 1, enable as u32);
    }

    pub fn mask(&self) -> [bool; 4] {
        [
            bits(self.raw, 0, 1) != 0,
            bits(self.raw, 1, 1) != 0,
            bits(self.raw, 2, 1) != 0,
            bits(self.raw, 3, 1) != 0,
        ]
    }

    pub fn equation_rgb(&self) -> u32 {
        bits(self.raw, 4, 3)
    }

    pub fn equation_alpha(&self) -> u32 {
        bits(self.raw, 7, 3)
    }

    pub fn factor_source_rgb(&self) -> u32 {
        bits(self.raw, 10, 5)
    }

    pub fn factor_dest_rgb(&self) -> u32 {
        bits(self.raw, 15, 5)
    }

    pub fn factor_source_alpha(&self) -> u32 {
        bits(self.raw, 20, 5)
    }

    pub fn factor_dest_alpha(&self) -> u32 {
        bits(self.raw, 25, 5)
    }
}

/// Vertex attribute descriptor packed into one word.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct VertexAttribute {
    pub raw: u32,
}

impl VertexAttribute {
    pub fn enabled(&self) -> bool {
        bits(self.raw, 0, 1) != 0
    }

    pub fn buffer(&self) -> u32 {
        bits(self.raw, 1, 5)
    }

    pub fn offset(&self) -> u32 {
        bits(self.raw, 6, 14)
    }

    pub fn attribute_type(&self) -> u32 {
        bits(self.raw, 20, 3)
    }

    pub fn size(&self) -> u32 {
        bits(self.raw, 23, 6)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        set_bits(&mut self.raw, 0, 1, enabled as u32);
    }

    pub fn set_buffer(&mut self, buffer: u32) {
        set_bits(&mut self.raw, 1, 5, buffer);
    }

    pub fn set_offset(&mut self, offset: u32) {
        set_bits(&mut self.raw, 6, 14, offset);
    }
}

/// State that extended-dynamic-state capable hosts set at draw time.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct DynamicState {
    pub raw1: u32,
    pub raw2: u32,
    /// Vertex stride is a 12-bit value.
    pub vertex_strides: [u16; NUM_VERTEX_ARRAYS],
}

impl DynamicState {
    pub fn depth_test_enable(&self) -> bool {
        bits(self.raw1, 27, 1) != 0
    }

    pub fn depth_write_enable(&self) -> bool {
        bits(self.raw1, 25, 1) != 0
    }

    pub fn stencil_enable(&self) -> bool {
        bits(self.raw1, 24, 1) != 0
    }

    pub fn depth_test_func(&self) -> u32 {
        bits(self.raw1, 29, 3)
    }

    pub fn front_face(&self) -> u32 {
        bits(self.raw1, 28, 1)
    }

    pub fn cull_face(&self) -> u32 {
        bits(self.raw2, 0, 2)
    }

    pub fn cull_enable(&self) -> bool {
        bits(self.raw2, 2, 1) != 0
    }
}

/// One transform-feedback buffer layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct TransformFeedbackLayout {
    pub stream: u32,
    pub varying_count: u32,
    pub stride: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct TransformFeedbackState {
    pub layouts: [TransformFeedbackLayout; NUM_XFB_BUFFERS],
    pub varyings: [[u8; 32]; NUM_XFB_BUFFERS],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct FixedPipelineState {
    pub raw1: u32,
    pub raw2: u32,
    pub color_formats: [u8; NUM_RENDER_TARGETS],
    pub alpha_test_ref: u32,
    pub point_size: u32,
    pub attachments: [BlendingAttachment; NUM_RENDER_TARGETS],
    pub viewport_swizzles: [u16; NUM_VIEWPORTS],
    /// With dynamic vertex input this packs attribute base types, two
    /// bits each; otherwise the enabled-divisor mask.
    pub attribute_types: [u32; 2],
    pub attributes: [VertexAttribute; NUM_VERTEX_ATTRIBUTES],
    pub binding_divisors: [u32; NUM_VERTEX_ARRAYS],
    pub dynamic_state: DynamicState,
    pub xfb_state: TransformFeedbackState,
}

impl FixedPipelineState {
    // raw1 bit assignments.
    pub fn extended_dynamic_state(&self) -> bool {
        bits(self.raw1, 0, 1) != 0
    }

    pub fn set_extended_dynamic_state(&mut self, value: bool) {
        set_bits(&mut self.raw1, 0, 1, value as u32);
    }

    pub fn dynamic_vertex_input(&self) -> bool {
        bits(self.raw1, 1, 1) != 0
    }

    pub fn set_dynamic_vertex_input(&mut self, value: bool) {
        set_bits(&mut self.raw1, 1, 1, value as u32);
    }

    pub fn xfb_enabled(&self) -> bool {
        bits(self.raw1, 2, 1) != 0
    }

    pub fn set_xfb_enabled(&mut self, value: bool) {
        set_bits(&mut self.raw1, 2, 1, value as u32);
    }

    pub fn primitive_restart_enable(&self) -> bool {
        bits(self.raw1, 3, 1) != 0
    }

    pub fn depth_bias_enable(&self) -> bool {
        bits(self.raw1, 4, 1) != 0
    }

    pub fn depth_clamp_disabled(&self) -> bool {
        bits(self.raw1, 5, 1) != 0
    }

    pub fn ndc_minus_one_to_one(&self) -> bool {
        bits(self.raw1, 6, 1) != 0
    }

    pub fn polygon_mode(&self) -> u32 {
        bits(self.raw1, 7, 2)
    }

    pub fn patch_control_points(&self) -> u32 {
        bits(self.raw1, 9, 5) + 1
    }

    pub fn tessellation_primitive(&self) -> u32 {
        bits(self.raw1, 14, 2)
    }

    pub fn tessellation_spacing(&self) -> u32 {
        bits(self.raw1, 16, 2)
    }

    pub fn tessellation_clockwise(&self) -> bool {
        bits(self.raw1, 18, 1) != 0
    }

    pub fn logic_op_enable(&self) -> bool {
        bits(self.raw1, 19, 1) != 0
    }

    pub fn logic_op(&self) -> u32 {
        bits(self.raw1, 20, 4)
    }

    pub fn topology(&self) -> u32 {
        bits(self.raw1, 24, 4)
    }

    pub fn set_topology(&mut self, topology: u32) {
        set_bits(&mut self.raw1, 24, 4, topology);
    }

    pub fn msaa_mode(&self) -> u32 {
        bits(self.raw1, 28, 4)
    }

    // raw2 bit assignments.
    pub fn rasterize_enable(&self) -> bool {
        bits(self.raw2, 0, 1) != 0
    }

    pub fn alpha_test_func(&self) -> u32 {
        bits(self.raw2, 1, 3)
    }

    pub fn early_z(&self) -> bool {
        bits(self.raw2, 4, 1) != 0
    }

    pub fn set_early_z(&mut self, value: bool) {
        set_bits(&mut self.raw2, 4, 1, value as u32);
    }

    pub fn depth_enabled(&self) -> bool {
        bits(self.raw2, 5, 1) != 0
    }

    pub fn depth_format(&self) -> u32 {
        bits(self.raw2, 6, 5)
    }

    pub fn y_negate(&self) -> bool {
        bits(self.raw2, 11, 1) != 0
    }

    pub fn set_y_negate(&mut self, value: bool) {
        set_bits(&mut self.raw2, 11, 1, value as u32);
    }

    pub fn provoking_vertex_last(&self) -> bool {
        bits(self.raw2, 12, 1) != 0
    }

    pub fn conservative_raster_enable(&self) -> bool {
        bits(self.raw2, 13, 1) != 0
    }

    pub fn smooth_lines(&self) -> bool {
        bits(self.raw2, 14, 1) != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Number of meaningful bytes; trailing sections are dropped when
    /// the host sets them dynamically.
    pub fn size(&self) -> usize {
        if self.xfb_enabled() {
            // Transform feedback uses the whole struct.
            return size_of::<FixedPipelineState>();
        }
        if self.dynamic_vertex_input() {
            // Exclude dynamic state and attributes.
            return offset_of!(FixedPipelineState, attributes);
        }
        if self.extended_dynamic_state() {
            return offset_of!(FixedPipelineState, dynamic_state);
        }
        offset_of!(FixedPipelineState, xfb_state)
    }

    pub fn hash64(&self) -> u64 {
        fxhash::hash64(&self.as_bytes()[..self.size()])
    }

    pub fn dynamic_attribute_type(&self, index: usize) -> u32 {
        let packed = (u64::from(self.attribute_types[1]) << 32) | u64::from(self.attribute_types[0]);
        ((packed >> (index * 2)) & 0b11) as u32
    }
}

impl PartialEq for FixedPipelineState {
    fn eq(&self, other: &FixedPipelineState) -> bool {
        let size = self.size();
        size == other.size() && self.as_bytes()[..size] == other.as_bytes()[..size]
    }
}

impl Eq for FixedPipelineState {}

impl Hash for FixedPipelineState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.as_bytes()[..self.size()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(state: &FixedPipelineState) -> u64 {
        let mut hasher = DefaultHasher::new();
        state.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn no_padding() {
        // Pod derivation would fail on padding; double-check the layout
        // totals anyway.
        let expected = 4 + 4
            + NUM_RENDER_TARGETS
            + 4
            + 4
            + NUM_RENDER_TARGETS * 4
            + NUM_VIEWPORTS * 2
            + 8
            + NUM_VERTEX_ATTRIBUTES * 4
            + NUM_VERTEX_ARRAYS * 4
            + size_of::<DynamicState>()
            + size_of::<TransformFeedbackState>();
        assert_eq!(size_of::<FixedPipelineState>(), expected);
    }

    #[test]
    fn reflexive_hash_and_eq() {
        let mut state = FixedPipelineState::default();
        state.set_topology(3);
        state.attachments[0].set_enable(true);
        assert_eq!(state, state);
        assert_eq!(hash_of(&state), hash_of(&state));
        assert_eq!(state.hash64(), state.hash64());

        let copy = state;
        assert_eq!(state, copy);
        assert_eq!(hash_of(&state), hash_of(&copy));
    }

    #[test]
    fn size_truncates_with_capabilities() {
        let mut state = FixedPipelineState::default();
        let base = state.size();
        assert_eq!(base, offset_of!(FixedPipelineState, xfb_state));

        state.set_extended_dynamic_state(true);
        assert!(state.size() < base);

        state.set_dynamic_vertex_input(true);
        assert!(state.size() < offset_of!(FixedPipelineState, dynamic_state));

        state.set_xfb_enabled(true);
        assert_eq!(state.size(), size_of::<FixedPipelineState>());
    }

    #[test]
    fn trailing_bytes_do_not_affect_truncated_equality() {
        let mut a = FixedPipelineState::default();
        a.set_extended_dynamic_state(true);
        let mut b = a;
        // Differ only in the dynamic-state tail, which is excluded.
        b.dynamic_state.vertex_strides[0] = 16;
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        // The same difference matters when the tail is hashed.
        a.set_extended_dynamic_state(false);
        b.set_extended_dynamic_state(false);
        assert_ne!(a, b);
    }

    #[test]
    fn attribute_packing() {
        let mut attribute = VertexAttribute::default();
        attribute.set_enabled(true);
        attribute.set_buffer(3);
        attribute.set_offset(0x30);
        assert!(attribute.enabled());
        assert_eq!(attribute.buffer(), 3);
        assert_eq!(attribute.offset(), 0x30);
    }
}
